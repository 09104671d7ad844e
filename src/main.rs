#[macro_use]
extern crate rocket;

mod api;
mod auth;
mod chat;
mod dashboard;
mod db;
mod env;
mod error;
mod gateway;
mod models;
mod telemetry;
#[cfg(test)]
mod test;
mod validation;

use std::sync::{Arc, Mutex};

use api::{
    api_add_goal, api_add_prerequisite, api_change_password, api_complete_checkpoint,
    api_create_chat_session, api_create_course, api_dashboard, api_enroll, api_get_all_users,
    api_get_chat_sessions, api_get_courses, api_get_transcript, api_login, api_login_activity,
    api_logout, api_me, api_me_unauthorized, api_register_user, api_send_message,
    api_teacher_dashboard, api_update_course, api_update_user, health,
};
use auth::unauthorized_api;
use chat::SessionLocks;
use db::clean_expired_sessions;
use gateway::{GatewayConfig, OpenAiGateway, TutorGateway};
use once_cell::sync::Lazy;
use rocket::{Build, Rocket, tokio};
use telemetry::{OtelGuard, TelemetryFairing, init_tracing};

use sqlx::SqlitePool;
use tracing::{error, info};

static TELEMETRY_GUARD: Lazy<Mutex<Option<OtelGuard>>> = Lazy::new(|| Mutex::new(None));

#[launch]
async fn rocket() -> _ {
    if let Err(e) = env::load_environment() {
        eprintln!("Failed to load environment files: {}", e);
    }

    if let Some(guard) = init_tracing() {
        *TELEMETRY_GUARD.lock().unwrap() = Some(guard);
    }

    let database_url = std::env::var("DATABASE_URL").unwrap_or_default();

    let pool = SqlitePool::connect(&database_url)
        .await
        .expect("Failed to connect to SQLite database");

    let pool_clone = pool.clone();

    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool_clone).await {
                Ok(count) => {
                    if count > 0 {
                        info!("Cleaned up {} expired sessions", count);
                    }
                }
                Err(e) => {
                    error!("Failed to clean expired sessions: {}", e);
                }
            }

            tokio::time::sleep(tokio::time::Duration::from_secs(3600)).await;
        }
    });

    info!("Running database migrations...");
    match sqlx::migrate!("./migrations").run(&pool).await {
        Ok(_) => info!("Migrations completed successfully"),
        Err(e) => {
            error!("Failed to run migrations: {}", e);
            panic!("Database migration failed: {}", e);
        }
    }

    let gateway: Arc<dyn TutorGateway> = Arc::new(OpenAiGateway::new(GatewayConfig::from_env()));

    init_rocket(pool, gateway).await
}

pub async fn init_rocket(pool: SqlitePool, gateway: Arc<dyn TutorGateway>) -> Rocket<Build> {
    info!("Starting alers backend");

    rocket::build()
        .manage(pool)
        .manage(gateway)
        .manage(SessionLocks::new())
        .mount(
            "/api",
            routes![
                api_login,
                api_logout,
                api_me,
                api_me_unauthorized,
                api_register_user,
                api_change_password,
                api_update_user,
                api_get_all_users,
                api_login_activity,
                api_get_courses,
                api_create_course,
                api_update_course,
                api_add_goal,
                api_add_prerequisite,
                api_enroll,
                api_complete_checkpoint,
                api_create_chat_session,
                api_get_chat_sessions,
                api_get_transcript,
                api_send_message,
                api_dashboard,
                api_teacher_dashboard,
            ],
        )
        .register("/api", catchers![unauthorized_api])
        .mount("/api", routes![health])
        .attach(TelemetryFairing)
}
