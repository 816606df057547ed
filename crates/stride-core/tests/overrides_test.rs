//! Integration tests for day overrides and effective targets.

mod common;

use uuid::Uuid;

use stride_core::PlanError;
use stride_core::adherence::{AdherenceInput, AdherencePolicy, record_adherence};
use stride_core::audit;
use stride_core::calendar;
use stride_core::overrides::{
    self, OverridePolicy, OverrideRequest, RETROACTIVE_REASON, effective_targets,
};
use stride_core::program;
use stride_db::models::{
    AdherenceStatus, CalendarEventType, ChangeType, Modification, OverrideReason, OverrideStatus,
    PlannedEntityRef,
};
use stride_db::queries::meals;
use stride_test_utils::{create_test_db, drop_test_db};

use common::{bundle, date, start};

fn request(owner_id: Uuid, program_id: Uuid, calorie_delta: f64) -> OverrideRequest {
    OverrideRequest {
        owner_id,
        program_id,
        date: start(),
        reason_code: OverrideReason::Travel,
        justification: "hotel breakfast only".into(),
        modification: Modification {
            calorie_delta,
            ..Modification::default()
        },
    }
}

#[tokio::test]
async fn second_request_supersedes_the_first() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = OverridePolicy::default();

    let a = overrides::request_override(&pool, &policy, &request(owner, created.id, -100.0))
        .await
        .expect("A");
    assert_eq!(a.status, OverrideStatus::AutoApplied);

    let b = overrides::request_override(&pool, &policy, &request(owner, created.id, -150.0))
        .await
        .expect("B");

    let a_now = overrides::get_override(&pool, a.id).await.expect("reload A");
    assert_eq!(a_now.status, OverrideStatus::Undone);
    assert_eq!(a_now.superseded_by, Some(b.id));
    assert!(a_now.undone_at.is_some());

    let active = overrides::get_active_override(&pool, owner, created.id, start())
        .await
        .expect("active")
        .expect("one active override");
    assert_eq!(active.id, b.id);

    let history = overrides::list_overrides(&pool, owner, created.id, start())
        .await
        .expect("history");
    assert_eq!(history.len(), 2);

    let day = calendar::list_calendar(&pool, created.id, start(), start())
        .await
        .expect("calendar");
    let shown: Vec<_> = day
        .iter()
        .filter(|e| e.event_type == CalendarEventType::Override)
        .map(|e| e.ref_id)
        .collect();
    assert_eq!(shown, vec![b.id]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn large_request_waits_for_approval() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = OverridePolicy::default();

    let pending = overrides::request_override(&pool, &policy, &request(owner, created.id, 600.0))
        .await
        .expect("request");
    assert_eq!(pending.status, OverrideStatus::Pending);

    let before = effective_targets(&pool, owner, created.id, start()).await.expect("targets");
    assert_eq!(before.macros, before.base_macros);
    assert_eq!(before.applied_override, None);

    let approved = overrides::approve_override(&pool, pending.id).await.expect("approve");
    assert_eq!(approved.status, OverrideStatus::Approved);
    assert!(approved.decided_at.is_some());

    let after = effective_targets(&pool, owner, created.id, start()).await.expect("targets");
    assert_eq!(after.applied_override, Some(pending.id));
    assert_eq!(after.macros.calories, after.base_macros.calories + 600.0);

    let err = overrides::approve_override(&pool, pending.id).await.unwrap_err();
    assert!(matches!(err, PlanError::InvalidTransition { .. }));

    let undone = overrides::undo_override(&pool, pending.id).await.expect("undo");
    assert_eq!(undone.status, OverrideStatus::Undone);
    let restored = effective_targets(&pool, owner, created.id, start()).await.expect("targets");
    assert_eq!(restored.macros, restored.base_macros);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn rejected_override_is_terminal() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = OverridePolicy::default();

    let pending = overrides::request_override(&pool, &policy, &request(owner, created.id, 900.0))
        .await
        .expect("request");
    overrides::reject_override(&pool, pending.id).await.expect("reject");

    let err = overrides::undo_override(&pool, pending.id).await.unwrap_err();
    assert!(matches!(err, PlanError::InvalidTransition { .. }));
    assert!(
        overrides::get_active_override(&pool, owner, created.id, start())
            .await
            .expect("query")
            .is_none()
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn requests_outside_program_or_owner_are_rejected() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = OverridePolicy::default();

    let late = OverrideRequest {
        date: date(2025, 6, 1),
        ..request(owner, created.id, -50.0)
    };
    let err = overrides::request_override(&pool, &policy, &late).await.unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));

    let stranger = request(Uuid::new_v4(), created.id, -50.0);
    let err = overrides::request_override(&pool, &policy, &stranger).await.unwrap_err();
    assert!(matches!(err, PlanError::Forbidden(_)));

    let err = overrides::approve_override(&pool, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, PlanError::NotFound(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn applying_an_override_after_adherence_is_audited() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let breakfast = meals::get_live_meal_at(&pool, created.id, 0, 0, 0)
        .await
        .expect("lookup")
        .expect("breakfast");
    let planned = PlannedEntityRef::meal(breakfast.id);

    record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &AdherenceInput {
            owner_id: owner,
            planned,
            status: AdherenceStatus::Completed,
            actual_ref: None,
            similarity_score: None,
        },
    )
    .await
    .expect("adherence");

    let ov = overrides::request_override(
        &pool,
        &OverridePolicy::default(),
        &request(owner, created.id, -120.0),
    )
    .await
    .expect("override");
    assert_eq!(ov.status, OverrideStatus::AutoApplied);

    let changes = audit::list_changes_for_program(&pool, created.id).await.expect("changes");
    let retro: Vec<_> = changes
        .iter()
        .filter(|c| c.reason_code == RETROACTIVE_REASON)
        .collect();
    assert_eq!(retro.len(), 1);
    assert_eq!(retro[0].change_type, ChangeType::Edit);
    assert_eq!(retro[0].planned_entity_id, breakfast.id);
    assert_eq!(retro[0].diff["override_id"], ov.id.to_string());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn withdrawing_an_applied_override_after_adherence_is_audited() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = OverridePolicy::default();
    let breakfast = meals::get_live_meal_at(&pool, created.id, 0, 0, 0)
        .await
        .expect("lookup")
        .expect("breakfast");
    record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &AdherenceInput {
            owner_id: owner,
            planned: PlannedEntityRef::meal(breakfast.id),
            status: AdherenceStatus::Completed,
            actual_ref: None,
            similarity_score: None,
        },
    )
    .await
    .expect("adherence");

    let program_id = created.id;
    let retro = move |pool: sqlx::PgPool| async move {
        audit::list_changes_for_program(&pool, program_id)
            .await
            .expect("changes")
            .into_iter()
            .filter(|c| c.reason_code == RETROACTIVE_REASON)
            .collect::<Vec<_>>()
    };

    let applied = overrides::request_override(&pool, &policy, &request(owner, created.id, -80.0))
        .await
        .expect("apply");
    overrides::undo_override(&pool, applied.id).await.expect("undo");
    let events = retro(pool.clone()).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].diff["override_id"], applied.id.to_string());
    assert_eq!(events[1].diff["status"], "undone");
    assert_eq!(events[1].diff["previous_status"], "auto_applied");

    // A pending request that supersedes an applied one takes the day back
    // to base targets.
    let second = overrides::request_override(&pool, &policy, &request(owner, created.id, -90.0))
        .await
        .expect("second");
    let pending = overrides::request_override(&pool, &policy, &request(owner, created.id, 900.0))
        .await
        .expect("pending");
    assert_eq!(pending.status, OverrideStatus::Pending);
    let events = retro(pool.clone()).await;
    assert_eq!(events.len(), 4);
    assert_eq!(events[3].diff["override_id"], second.id.to_string());
    assert_eq!(events[3].diff["status"], "undone");

    // Withdrawing an override that never applied leaves targets alone.
    overrides::undo_override(&pool, pending.id).await.expect("undo pending");
    assert_eq!(retro(pool.clone()).await.len(), 4);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancelling_sessions_requires_policy_permission() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let cancel = OverrideRequest {
        reason_code: OverrideReason::Illness,
        modification: Modification {
            cancel_sessions: true,
            ..Modification::default()
        },
        ..request(owner, created.id, 0.0)
    };

    let strict = overrides::request_override(&pool, &OverridePolicy::default(), &cancel)
        .await
        .expect("request");
    assert_eq!(strict.status, OverrideStatus::Pending);

    let lenient = OverridePolicy {
        allow_auto_session_cancel: true,
        ..OverridePolicy::default()
    };
    let applied = overrides::request_override(&pool, &lenient, &cancel)
        .await
        .expect("request");
    assert_eq!(applied.status, OverrideStatus::AutoApplied);

    let targets = effective_targets(&pool, owner, created.id, start()).await.expect("targets");
    assert!(targets.sessions_cancelled);
    assert_eq!(targets.sessions.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// Fire `writers` concurrent requests for the first day of the program and
/// return how many succeeded. Every failure must be a retryable conflict.
async fn race_requests(
    pool: &sqlx::PgPool,
    owner: Uuid,
    program_id: Uuid,
    writers: usize,
) -> usize {
    let policy = OverridePolicy::default();
    let handles: Vec<_> = (0..writers)
        .map(|i| {
            let pool = pool.clone();
            let req = request(owner, program_id, -10.0 * (i as f64 + 1.0));
            tokio::spawn(async move { overrides::request_override(&pool, &policy, &req).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.expect("join") {
            Ok(_) => succeeded += 1,
            Err(PlanError::Conflict { retryable: true, .. }) => {}
            Err(other) => panic!("unexpected error from concurrent request: {other:?}"),
        }
    }
    succeeded
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_on_empty_day_leave_one_active() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");

    let succeeded = race_requests(&pool, owner, created.id, 8).await;
    assert!(succeeded >= 1, "at least one writer must win");

    let history = overrides::list_overrides(&pool, owner, created.id, start())
        .await
        .expect("history");
    assert_eq!(history.len(), succeeded);
    let active: Vec<_> = history.iter().filter(|o| o.status.is_active()).collect();
    assert_eq!(active.len(), 1);
    assert!(
        history
            .iter()
            .filter(|o| o.status == OverrideStatus::Undone)
            .all(|o| o.superseded_by.is_some())
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_supersede_existing_override_once_each() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let first = overrides::request_override(
        &pool,
        &OverridePolicy::default(),
        &request(owner, created.id, -50.0),
    )
    .await
    .expect("first");

    let succeeded = race_requests(&pool, owner, created.id, 8).await;
    assert!(succeeded >= 1, "at least one writer must win");

    let first_now = overrides::get_override(&pool, first.id).await.expect("reload");
    assert_eq!(first_now.status, OverrideStatus::Undone);
    assert!(first_now.superseded_by.is_some());

    let history = overrides::list_overrides(&pool, owner, created.id, start())
        .await
        .expect("history");
    assert_eq!(history.len(), succeeded + 1);
    assert_eq!(history.iter().filter(|o| o.status.is_active()).count(), 1);
    assert_eq!(
        history
            .iter()
            .filter(|o| o.status == OverrideStatus::Undone)
            .count(),
        succeeded
    );

    let overrides_on_calendar = calendar::list_calendar(&pool, created.id, start(), start())
        .await
        .expect("calendar")
        .into_iter()
        .filter(|e| e.event_type == CalendarEventType::Override)
        .count();
    assert_eq!(overrides_on_calendar, 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}
