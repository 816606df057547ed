//! Integration tests for change streaming, ownership checks and program
//! generation.

mod common;

use std::io::Write;

use chrono::{Duration, Utc};
use futures::{StreamExt, TryStreamExt};
use uuid::Uuid;

use stride_core::PlanError;
use stride_core::audit::{ChangeCursor, ChangeFilter, stream_changes};
use stride_core::auth::{
    self, Caller, TokenConfig, authorize_entity, authorize_override, authorize_program,
};
use stride_core::edits::{InstancePatch, edit_instance};
use stride_core::external::{BundleFileGenerator, ProgramGenerator, generate_program};
use stride_core::overrides::{self, OverridePolicy, OverrideRequest};
use stride_core::program;
use stride_db::models::{Modification, OverrideReason, PlannedEntityRef};
use stride_db::queries::sessions;
use stride_test_utils::{create_test_db, drop_test_db};

use common::{bundle, start};

/// Apply `count` successive edits to the session on day 0.
async fn churn(pool: &sqlx::PgPool, program_id: Uuid, count: usize) {
    for n in 0..count {
        let live = sessions::get_live_session_at(pool, program_id, 0, 0)
            .await
            .expect("lookup")
            .expect("session");
        edit_instance(
            pool,
            PlannedEntityRef::session(live.id),
            &InstancePatch {
                session_kind: Some(format!("variant_{n}")),
                ..InstancePatch::default()
            },
            "churn",
        )
        .await
        .expect("edit");
    }
}

#[tokio::test]
async fn stream_pages_in_order_and_resumes() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    churn(&pool, created.id, 5).await;

    let all: Vec<_> = stream_changes(pool.clone(), ChangeFilter::Program(created.id), 2, None)
        .try_collect()
        .await
        .expect("stream");
    assert_eq!(all.len(), 5);
    assert!(
        all.windows(2)
            .all(|w| (w[0].created_at, w[0].id) < (w[1].created_at, w[1].id))
    );

    let head: Vec<_> = stream_changes(pool.clone(), ChangeFilter::Program(created.id), 2, None)
        .take(3)
        .try_collect()
        .await
        .expect("head");
    let cursor: ChangeCursor = head.last().expect("third event").into();
    let resumed: Vec<_> = stream_changes(
        pool.clone(),
        ChangeFilter::Program(created.id),
        2,
        Some(cursor.to_string().parse().expect("cursor text")),
    )
    .try_collect()
    .await
    .expect("resume");
    let ids: Vec<i64> = head.iter().chain(&resumed).map(|e| e.id).collect();
    assert_eq!(ids, all.iter().map(|e| e.id).collect::<Vec<_>>());

    let owner_window: Vec<_> = stream_changes(
        pool.clone(),
        ChangeFilter::Owner {
            owner_id: owner,
            from: Utc::now() - Duration::hours(1),
            to: Utc::now() + Duration::hours(1),
        },
        10,
        None,
    )
    .try_collect()
    .await
    .expect("owner stream");
    assert_eq!(owner_window.len(), 5);

    let reversed: Result<Vec<_>, _> = stream_changes(
        pool.clone(),
        ChangeFilter::Owner {
            owner_id: owner,
            from: Utc::now(),
            to: Utc::now() - Duration::hours(1),
        },
        10,
        None,
    )
    .try_collect()
    .await;
    assert!(matches!(reversed, Err(PlanError::Validation(_))));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn guards_reject_other_owners() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let session = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("session");
    let ov = overrides::request_override(
        &pool,
        &OverridePolicy::default(),
        &OverrideRequest {
            owner_id: owner,
            program_id: created.id,
            date: start(),
            reason_code: OverrideReason::ScheduleConflict,
            justification: String::new(),
            modification: Modification::default(),
        },
    )
    .await
    .expect("override");

    let config = TokenConfig::new(b"integration-secret".to_vec()).expect("config");
    let token = auth::generate_owner_token(&config, owner).expect("token");
    let caller = auth::validate_owner_token(&config, &token).expect("valid");
    assert_eq!(caller.owner_id, owner);

    authorize_program(&pool, &caller, created.id).await.expect("own program");
    let program_id = authorize_entity(&pool, &caller, PlannedEntityRef::session(session.id))
        .await
        .expect("own session");
    assert_eq!(program_id, created.id);
    authorize_override(&pool, &caller, ov.id).await.expect("own override");

    let stranger = Caller {
        owner_id: Uuid::new_v4(),
    };
    assert!(matches!(
        authorize_program(&pool, &stranger, created.id).await,
        Err(PlanError::Forbidden(_))
    ));
    assert!(matches!(
        authorize_entity(&pool, &stranger, PlannedEntityRef::session(session.id)).await,
        Err(PlanError::Forbidden(_))
    ));
    assert!(matches!(
        authorize_override(&pool, &stranger, ov.id).await,
        Err(PlanError::Forbidden(_))
    ));
    assert!(matches!(
        authorize_program(&pool, &caller, Uuid::new_v4()).await,
        Err(PlanError::NotFound(_))
    ));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn bundle_file_generator_creates_a_program() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();

    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    let body = serde_json::to_string(&bundle(owner)).expect("serialize");
    file.write_all(body.as_bytes()).expect("write");

    let generator = BundleFileGenerator::new(file.path());
    assert!(!generator.name().is_empty());
    let created = generate_program(&pool, &generator, owner, &serde_json::json!({}))
        .await
        .expect("generate");
    assert_eq!(created.owner_id, owner);

    let err = generate_program(&pool, &generator, Uuid::new_v4(), &serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}
