//! Shared test utilities for stride integration tests.
//!
//! Every test gets its own database inside one PostgreSQL server per test
//! binary. Set `STRIDE_TEST_PG_URL` to point at an already running server
//! (for example one started by a CI service); otherwise a container is
//! started through testcontainers on first use.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use stride_db::config::DbConfig;
use stride_db::models::{ExerciseSpec, MacroTargets, MealItemSpec, MealInstance, Program, SessionInstance};
use stride_db::pool;
use stride_db::queries::{meals, programs, sessions};

pub const PG_URL_ENV: &str = "STRIDE_TEST_PG_URL";

struct SharedPg {
    base_url: String,
    /// Keeps the container alive for the life of the test binary.
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

async fn init_shared_pg() -> SharedPg {
    if let Ok(url) = std::env::var(PG_URL_ENV) {
        return SharedPg {
            base_url: url.trim_end_matches('/').to_string(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");

    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedPg {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

/// Server root URL of the shared PostgreSQL, without a database name.
pub async fn pg_url() -> &'static str {
    let shared = SHARED_PG.get_or_init(init_shared_pg).await;
    &shared.base_url
}

async fn maintenance_pool() -> PgPool {
    let maint_url = format!("{}/postgres", pg_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&maint_url)
        .await
        .expect("failed to connect to maintenance database")
}

/// Create a uniquely named database with all migrations applied.
///
/// Returns `(pool, db_name)`; pass `db_name` to [`drop_test_db`] at the end
/// of the test.
pub async fn create_test_db() -> (PgPool, String) {
    let maint_pool = maintenance_pool().await;
    let db_name = format!("stride_test_{}", Uuid::new_v4().simple());
    maint_pool
        .execute(format!("CREATE DATABASE {db_name}").as_str())
        .await
        .unwrap_or_else(|e| panic!("failed to create temp database {db_name}: {e}"));
    maint_pool.close().await;

    let temp_url = format!("{}/{db_name}", pg_url().await);
    let config = DbConfig::new(temp_url)
        .with_max_connections(8)
        .with_acquire_timeout(Duration::from_secs(30));
    let temp_pool = pool::create_pool(&config)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to temp database {db_name}: {e}"));

    pool::run_migrations(&temp_pool)
        .await
        .expect("migrations should succeed");

    (temp_pool, db_name)
}

/// Drop a temporary database, terminating any connections still open.
pub async fn drop_test_db(db_name: &str) {
    let maint_pool = maintenance_pool().await;
    let terminate = format!(
        "SELECT pg_terminate_backend(pid) \
         FROM pg_stat_activity \
         WHERE datname = '{db_name}' AND pid <> pg_backend_pid()"
    );
    let _ = maint_pool.execute(terminate.as_str()).await;
    let _ = maint_pool
        .execute(format!("DROP DATABASE IF EXISTS {db_name}").as_str())
        .await;
    maint_pool.close().await;
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A program seeded straight through the storage layer.
#[derive(Debug, Clone)]
pub struct SeededProgram {
    pub program: Program,
    pub sessions: Vec<SessionInstance>,
    pub meals: Vec<MealInstance>,
}

pub fn sample_macros() -> MacroTargets {
    MacroTargets {
        calories: 2400.0,
        protein_g: 160.0,
        carbs_g: 260.0,
        fat_g: 80.0,
    }
}

/// Insert a one-week program starting at `start` with a session on days 0
/// and 2, and one breakfast meal on every day.
pub async fn seed_program(pool: &PgPool, owner_id: Uuid, start: NaiveDate) -> SeededProgram {
    let bundle = serde_json::json!({ "seeded": true });
    let safety = serde_json::json!({ "status": "ok" });
    let mut tx = pool.begin().await.expect("begin");

    let program = programs::insert_program(
        &mut *tx,
        &programs::NewProgram {
            owner_id,
            primary_goal: "recomposition",
            start_date: start,
            duration_weeks: 1,
            created_at: Utc::now(),
            valid_until: None,
            tdee: 2500,
            macros: sample_macros(),
            safety_report: &safety,
            full_bundle: &bundle,
        },
    )
    .await
    .expect("insert program");

    let params = serde_json::json!({ "rpe": 7 });
    let mut seeded_sessions = Vec::new();
    for day in [0, 2] {
        let session = sessions::insert_session(
            &mut *tx,
            &sessions::NewSessionInstance {
                program_id: program.id,
                week_index: 0,
                day_index: day,
                session_kind: "strength",
                parameters: &params,
                supersedes_id: None,
            },
        )
        .await
        .expect("insert session");
        sessions::insert_exercise(
            &mut *tx,
            session.id,
            &ExerciseSpec {
                order_index: 0,
                exercise_key: "back_squat".into(),
                name: "Back squat".into(),
                sets: Some(5),
                reps: Some("5".into()),
                load_kg: Some(100.0),
                rest_seconds: Some(180),
                notes: None,
            },
        )
        .await
        .expect("insert exercise");
        seeded_sessions.push(session);
    }

    let mut seeded_meals = Vec::new();
    for day in 0..7 {
        let meal = meals::insert_meal(
            &mut *tx,
            &meals::NewMealInstance {
                program_id: program.id,
                week_index: 0,
                day_index: day,
                order_index: 0,
                meal_type: "breakfast",
                totals: MacroTargets {
                    calories: 600.0,
                    protein_g: 40.0,
                    carbs_g: 70.0,
                    fat_g: 18.0,
                },
                supersedes_id: None,
            },
        )
        .await
        .expect("insert meal");
        meals::insert_meal_item(
            &mut *tx,
            meal.id,
            &MealItemSpec {
                order_index: 0,
                food_key: "oats".into(),
                name: "Oats".into(),
                quantity_g: 80.0,
            },
        )
        .await
        .expect("insert meal item");
        seeded_meals.push(meal);
    }

    tx.commit().await.expect("commit");
    SeededProgram {
        program,
        sessions: seeded_sessions,
        meals: seeded_meals,
    }
}
