//! Integration tests for adherence recording and matching.

mod common;

use async_trait::async_trait;
use uuid::Uuid;

use stride_core::PlanError;
use stride_core::adherence::{
    self, AdherenceInput, AdherenceMatcher, AdherencePolicy, record_adherence,
    record_matched_adherence,
};
use stride_core::edits::{InstancePatch, edit_instance};
use stride_core::program;
use stride_db::models::{AdherenceStatus, InstanceState, PlannedEntityRef};
use stride_db::queries::{meals, sessions};
use stride_test_utils::{create_test_db, drop_test_db};

use common::bundle;

struct FixedMatcher(f64);

#[async_trait]
impl AdherenceMatcher for FixedMatcher {
    async fn similarity(&self, _planned: PlannedEntityRef, _actual_ref: &str) -> anyhow::Result<f64> {
        Ok(self.0)
    }
}

struct BrokenMatcher;

#[async_trait]
impl AdherenceMatcher for BrokenMatcher {
    async fn similarity(&self, _planned: PlannedEntityRef, _actual_ref: &str) -> anyhow::Result<f64> {
        anyhow::bail!("matcher offline")
    }
}

fn input(owner_id: Uuid, planned: PlannedEntityRef, status: AdherenceStatus) -> AdherenceInput {
    AdherenceInput {
        owner_id,
        planned,
        status,
        actual_ref: None,
        similarity_score: None,
    }
}

#[tokio::test]
async fn skipped_with_actual_entry_is_rejected() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let meal = meals::get_live_meal_at(&pool, created.id, 0, 0, 0)
        .await
        .expect("lookup")
        .expect("meal");
    let planned = PlannedEntityRef::meal(meal.id);

    let err = record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &AdherenceInput {
            actual_ref: Some("log-123".into()),
            ..input(owner, planned, AdherenceStatus::Skipped)
        },
    )
    .await
    .expect_err("skipped must not carry an actual entry");
    assert!(matches!(err, PlanError::Validation(_)));

    assert!(
        adherence::latest_adherence(&pool, planned)
            .await
            .expect("query")
            .is_none()
    );
    let stored = meals::get_meal(&pool, meal.id).await.expect("get").expect("meal");
    assert_eq!(stored.state, InstanceState::Planned);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn statuses_advance_planned_instances() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = AdherencePolicy::default();

    let cases = [
        (0, 0, 0, AdherenceStatus::Completed, InstanceState::Completed),
        (0, 0, 1, AdherenceStatus::Partial, InstanceState::Modified),
        (1, 0, 0, AdherenceStatus::Skipped, InstanceState::Skipped),
    ];
    for (week, day, order, status, expected) in cases {
        let meal = meals::get_live_meal_at(&pool, created.id, week, day, order)
            .await
            .expect("lookup")
            .expect("meal");
        let planned = PlannedEntityRef::meal(meal.id);
        let outcome = record_adherence(&pool, &policy, &input(owner, planned, status))
            .await
            .expect("record");
        assert_eq!(outcome.instance.state, expected, "{status}");
        assert_eq!(outcome.record.status, status);
    }

    let summary = adherence::adherence_summary(&pool, created.id).await.expect("summary");
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.partial, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.total, 3);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn unknown_status_leaves_state_alone() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let session = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("session");
    let planned = PlannedEntityRef::session(session.id);

    let outcome = record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &input(owner, planned, AdherenceStatus::Unknown),
    )
    .await
    .expect("record");
    assert_eq!(outcome.instance.state, InstanceState::Planned);

    let later = record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &input(owner, planned, AdherenceStatus::Completed),
    )
    .await
    .expect("record");
    assert_eq!(later.instance.state, InstanceState::Completed);

    let history = adherence::adherence_history(&pool, planned).await.expect("history");
    assert_eq!(history.len(), 2);
    let latest = adherence::latest_adherence(&pool, planned)
        .await
        .expect("latest")
        .expect("record");
    assert_eq!(latest.status, AdherenceStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn superseded_instance_keeps_its_state() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let session = sessions::get_live_session_at(&pool, created.id, 0, 2)
        .await
        .expect("lookup")
        .expect("session");
    let planned = PlannedEntityRef::session(session.id);

    edit_instance(
        &pool,
        planned,
        &InstancePatch {
            session_kind: Some("mobility".into()),
            ..InstancePatch::default()
        },
        "coach_edit",
    )
    .await
    .expect("edit");

    let outcome = record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &input(owner, planned, AdherenceStatus::Completed),
    )
    .await
    .expect("record is still stored");
    assert_eq!(outcome.instance.state, InstanceState::Superseded);
    assert_eq!(
        adherence::adherence_history(&pool, planned).await.expect("history").len(),
        1
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn other_owners_cannot_record() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let meal = meals::get_live_meal_at(&pool, created.id, 0, 0, 0)
        .await
        .expect("lookup")
        .expect("meal");

    let err = record_adherence(
        &pool,
        &AdherencePolicy::default(),
        &input(Uuid::new_v4(), PlannedEntityRef::meal(meal.id), AdherenceStatus::Completed),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Forbidden(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn matcher_score_drives_the_status() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let policy = AdherencePolicy::default();
    let breakfast = meals::get_live_meal_at(&pool, created.id, 0, 0, 0)
        .await
        .expect("lookup")
        .expect("meal");
    let dinner = meals::get_live_meal_at(&pool, created.id, 0, 0, 1)
        .await
        .expect("lookup")
        .expect("meal");

    let close = record_matched_adherence(
        &pool,
        &policy,
        &FixedMatcher(0.92),
        owner,
        PlannedEntityRef::meal(breakfast.id),
        "food-log-1",
    )
    .await
    .expect("match");
    assert_eq!(close.record.status, AdherenceStatus::Completed);
    assert_eq!(close.record.actual_ref.as_deref(), Some("food-log-1"));
    assert_eq!(close.instance.state, InstanceState::Completed);

    let loose = record_matched_adherence(
        &pool,
        &policy,
        &FixedMatcher(0.7),
        owner,
        PlannedEntityRef::meal(dinner.id),
        "food-log-2",
    )
    .await
    .expect("match");
    assert_eq!(loose.record.status, AdherenceStatus::Similar);
    assert_eq!(loose.instance.state, InstanceState::Modified);

    let err = record_matched_adherence(
        &pool,
        &policy,
        &BrokenMatcher,
        owner,
        PlannedEntityRef::meal(dinner.id),
        "food-log-3",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Storage(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn storage_check_violations_surface_as_validation() {
    let (pool, db_name) = create_test_db().await;
    let owner = Uuid::new_v4();
    let created = program::create_program(&pool, &bundle(owner)).await.expect("create");
    let meal = meals::list_meals_for_program(&pool, created.id)
        .await
        .expect("meals")
        .remove(0);

    let err = stride_db::queries::adherence::insert_adherence(
        &pool,
        &stride_db::queries::adherence::NewAdherenceRecord {
            owner_id: owner,
            planned: PlannedEntityRef::meal(meal.id),
            status: AdherenceStatus::Similar,
            actual_ref: Some("photo:7"),
            similarity_score: Some(1.2),
        },
    )
    .await
    .expect_err("score above 1 violates the check constraint");

    let err = PlanError::from(err);
    match &err {
        PlanError::Validation(message) => {
            assert!(message.contains("adherence_records_similarity_score_check"), "{message}")
        }
        other => panic!("expected validation, got {other:?}"),
    }
    assert!(!err.is_retryable());

    pool.close().await;
    drop_test_db(&db_name).await;
}
