//! Read-only views over login events, enrollments, and chat sessions.
//! Nothing in here mutates source data; every figure is derived at read
//! time.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::instrument;

use crate::error::AppError;

#[derive(sqlx::FromRow, Serialize, Clone)]
pub struct LoginActivity {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub login_count: i64,
    pub last_seen: NaiveDateTime,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Clone)]
pub struct SessionStats {
    pub session_count: i64,
    pub completed_session_count: i64,
    /// Mean of (last_activity - created_at) over sessions with at least one
    /// assistant message. None when no session has completed a round trip;
    /// abandoned sessions never drag the average down.
    pub mean_session_seconds: Option<f64>,
}

#[derive(sqlx::FromRow, Serialize, Clone)]
pub struct EnrollmentOverview {
    pub enrollment_id: i64,
    pub student: String,
    pub course: String,
    pub enrolled_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub goals_total: i64,
    pub goals_completed: i64,
    pub mean_session_minutes: Option<f64>,
}

/// Per-user login counts and last-seen timestamps, newest activity first.
#[instrument(skip(pool))]
pub async fn login_activity(pool: &Pool<Sqlite>) -> Result<Vec<LoginActivity>, AppError> {
    let rows = sqlx::query_as::<_, LoginActivity>(
        "SELECT u.id AS user_id,
                u.username,
                u.display_name,
                COUNT(e.id) AS login_count,
                MAX(e.logged_in_at) AS last_seen
         FROM login_events e
         JOIN users u ON u.id = e.user_id
         GROUP BY u.id, u.username, u.display_name
         ORDER BY last_seen DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Chat-session statistics for one user across all of their enrollments.
#[instrument(skip(pool))]
pub async fn session_stats(pool: &Pool<Sqlite>, user_id: i64) -> Result<SessionStats, AppError> {
    let stats = sqlx::query_as::<_, SessionStats>(
        "SELECT COUNT(*) AS session_count,
                COUNT(CASE WHEN EXISTS (
                    SELECT 1 FROM messages m
                    WHERE m.session_id = s.id AND m.sender = 'assistant'
                ) THEN 1 END) AS completed_session_count,
                AVG(CASE WHEN EXISTS (
                    SELECT 1 FROM messages m
                    WHERE m.session_id = s.id AND m.sender = 'assistant'
                ) THEN (julianday(s.last_activity) - julianday(s.created_at)) * 86400.0 END)
                    AS mean_session_seconds
         FROM chat_sessions s
         JOIN enrollments en ON en.id = s.enrollment_id
         WHERE en.user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

/// Per-enrollment progress overview for the teacher dashboard.
#[instrument(skip(pool))]
pub async fn course_overview(pool: &Pool<Sqlite>) -> Result<Vec<EnrollmentOverview>, AppError> {
    let rows = sqlx::query_as::<_, EnrollmentOverview>(
        "SELECT en.id AS enrollment_id,
                u.username AS student,
                c.title AS course,
                en.enrolled_at,
                en.completed_at,
                (SELECT COUNT(*) FROM learning_goals g WHERE g.course_id = c.id) AS goals_total,
                (SELECT COUNT(*) FROM checkpoints cp WHERE cp.enrollment_id = en.id) AS goals_completed,
                (SELECT AVG((julianday(s.last_activity) - julianday(s.created_at)) * 1440.0)
                 FROM chat_sessions s
                 WHERE s.enrollment_id = en.id
                   AND EXISTS (
                       SELECT 1 FROM messages m
                       WHERE m.session_id = s.id AND m.sender = 'assistant'
                   )) AS mean_session_minutes
         FROM enrollments en
         JOIN users u ON u.id = en.user_id
         JOIN courses c ON c.id = en.course_id
         ORDER BY u.username, c.title",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
