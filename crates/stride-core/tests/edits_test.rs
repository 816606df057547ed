//! Integration tests for plan edits and their audit trail.

mod common;

use serde_json::json;
use uuid::Uuid;

use stride_core::PlanError;
use stride_core::audit;
use stride_core::calendar;
use stride_core::edits::{
    InstancePatch, cancel_instance, edit_instance, move_instance, reschedule_instance,
    swap_instances,
};
use stride_core::program;
use stride_core::state::mark_instance_state;
use stride_db::models::{
    CalendarEventType, ChangeType, InstanceState, MacroTargets, PlannedEntityRef,
};
use stride_db::queries::{meals, sessions};
use stride_test_utils::{create_test_db, drop_test_db};

use common::{bundle, date, start};

#[tokio::test]
async fn edit_supersedes_and_records_before_after() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let session = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("session");
    let entity = PlannedEntityRef::session(session.id);

    let patch = InstancePatch {
        parameters: Some(json!({ "rpe": 8 })),
        ..InstancePatch::default()
    };
    let event = edit_instance(&pool, entity, &patch, "coach_edit").await.expect("edit");
    assert_eq!(event.change_type, ChangeType::Edit);
    assert_eq!(event.planned_entity_id, session.id);
    assert_eq!(event.reason_code, "coach_edit");
    assert_eq!(event.diff["before"]["parameters"]["rpe"], 7);
    assert_eq!(event.diff["after"]["parameters"]["rpe"], 8);

    let old = sessions::get_session(&pool, session.id).await.expect("get").expect("old");
    assert_eq!(old.state, InstanceState::Superseded);

    let replacement_id = event.new_entity_id.expect("replacement");
    let live = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("live session");
    assert_eq!(live.id, replacement_id);
    assert_eq!(live.supersedes_id, Some(session.id));
    assert_eq!(live.session_kind, "strength");
    assert_eq!(
        sessions::list_exercises(&pool, live.id).await.expect("exercises").len(),
        1,
        "children are copied when the patch leaves them alone"
    );

    let day = calendar::list_calendar(&pool, created.id, start(), start())
        .await
        .expect("calendar");
    let session_rows: Vec<_> = day
        .iter()
        .filter(|e| e.event_type == CalendarEventType::Session)
        .collect();
    assert_eq!(session_rows.len(), 1);
    assert_eq!(session_rows[0].ref_id, replacement_id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn meal_edit_replaces_totals_and_items() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let dinner = meals::get_live_meal_at(&pool, created.id, 0, 0, 1)
        .await
        .expect("lookup")
        .expect("dinner");

    let patch = InstancePatch {
        totals: Some(MacroTargets {
            calories: 700.0,
            protein_g: 45.0,
            carbs_g: 50.0,
            fat_g: 18.0,
        }),
        items: Some(vec![]),
        ..InstancePatch::default()
    };
    let event = edit_instance(&pool, PlannedEntityRef::meal(dinner.id), &patch, "swap_dinner")
        .await
        .expect("edit");

    let replacement = meals::get_meal(&pool, event.new_entity_id.expect("new id"))
        .await
        .expect("get")
        .expect("meal");
    assert_eq!(replacement.order_index, 1);
    assert_eq!(replacement.totals.0.calories, 700.0);
    assert!(meals::list_meal_items(&pool, replacement.id).await.expect("items").is_empty());

    let err = edit_instance(
        &pool,
        PlannedEntityRef::meal(dinner.id),
        &InstancePatch {
            session_kind: Some("yoga".into()),
            ..InstancePatch::default()
        },
        "bad",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn settled_instances_cannot_be_edited() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let session = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("session");
    let entity = PlannedEntityRef::session(session.id);
    mark_instance_state(&pool, entity, InstanceState::Completed)
        .await
        .expect("complete");

    let err = move_instance(&pool, entity, 0, 4, "later").await.unwrap_err();
    assert!(matches!(err, PlanError::InvalidTransition { .. }));
    let err = cancel_instance(&pool, entity, "sick").await.unwrap_err();
    assert!(matches!(err, PlanError::InvalidTransition { .. }));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn swap_exchanges_slots() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let monday = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("day 0");
    let wednesday = sessions::get_live_session_at(&pool, created.id, 0, 2)
        .await
        .expect("lookup")
        .expect("day 2");

    let events = swap_instances(
        &pool,
        PlannedEntityRef::session(monday.id),
        PlannedEntityRef::session(wednesday.id),
        "schedule_clash",
    )
    .await
    .expect("swap");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.change_type == ChangeType::Swap));

    let now_monday = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("day 0");
    let now_wednesday = sessions::get_live_session_at(&pool, created.id, 0, 2)
        .await
        .expect("lookup")
        .expect("day 2");
    assert_eq!(now_monday.session_kind, "conditioning");
    assert_eq!(now_wednesday.session_kind, "strength");
    assert_eq!(now_monday.supersedes_id, Some(wednesday.id));

    let err = swap_instances(
        &pool,
        PlannedEntityRef::session(now_monday.id),
        PlannedEntityRef::meal(Uuid::new_v4()),
        "mixed",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn move_and_reschedule_respect_occupied_slots() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let monday = sessions::get_live_session_at(&pool, created.id, 0, 0)
        .await
        .expect("lookup")
        .expect("day 0");
    let entity = PlannedEntityRef::session(monday.id);

    let err = move_instance(&pool, entity, 0, 2, "busy").await.unwrap_err();
    assert!(matches!(err, PlanError::Conflict { retryable: false, .. }));

    let err = move_instance(&pool, entity, 5, 0, "far").await.unwrap_err();
    assert!(matches!(err, PlanError::Validation(_)));

    let moved = move_instance(&pool, entity, 0, 1, "busy").await.expect("move");
    assert_eq!(moved.change_type, ChangeType::Move);
    assert_eq!(moved.diff["to"]["day_index"], 1);
    let new_id = moved.new_entity_id.expect("replacement");

    let rescheduled = reschedule_instance(
        &pool,
        PlannedEntityRef::session(new_id),
        date(2025, 3, 12),
        "travel",
    )
    .await
    .expect("reschedule");
    assert_eq!(rescheduled.change_type, ChangeType::Reschedule);
    let landed = sessions::get_live_session_at(&pool, created.id, 1, 2)
        .await
        .expect("lookup")
        .expect("week 1 day 2");
    assert_eq!(Some(landed.id), rescheduled.new_entity_id);

    let first_day = calendar::list_calendar(&pool, created.id, start(), start())
        .await
        .expect("calendar");
    assert!(
        first_day
            .iter()
            .all(|e| e.event_type != CalendarEventType::Session),
        "the vacated day no longer shows a session"
    );

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cancel_skips_without_replacement() {
    let (pool, db_name) = create_test_db().await;
    let created = program::create_program(&pool, &bundle(Uuid::new_v4()))
        .await
        .expect("create");
    let breakfast = meals::get_live_meal_at(&pool, created.id, 0, 0, 0)
        .await
        .expect("lookup")
        .expect("breakfast");

    let event = cancel_instance(&pool, PlannedEntityRef::meal(breakfast.id), "fasting")
        .await
        .expect("cancel");
    assert_eq!(event.change_type, ChangeType::Cancel);
    assert_eq!(event.new_entity_id, None);

    let stored = meals::get_meal(&pool, breakfast.id).await.expect("get").expect("meal");
    assert_eq!(stored.state, InstanceState::Skipped);

    let changes = audit::list_changes_for_program(&pool, created.id).await.expect("changes");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].id, event.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}
