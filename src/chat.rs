use std::collections::HashMap;
use std::sync::Arc;

use rocket::serde::Serialize;
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::auth::User;
use crate::db;
use crate::error::AppError;
use crate::gateway::{ChatPrompt, PromptMessage, TutorGateway};
use crate::models::{Course, LearningGoal, Message, MessageSender};

/// Transcript window handed to the gateway per turn: the most recent 32
/// messages, oldest first. Older context is dropped, not summarized.
const TRANSCRIPT_WINDOW: i64 = 32;

/// One completed round trip.
#[derive(Serialize)]
pub struct ChatTurn {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// Per-session serialization: a session has at most one in-flight
/// orchestration at a time, while distinct sessions proceed in parallel.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

fn build_system_preamble(course: &Course, goals: &[LearningGoal], completed: &[i64]) -> String {
    let mut lines = vec![
        "You are the course tutor. Keep answers within the scope of the course material below."
            .to_string(),
        String::new(),
        format!("Course: {}", course.title),
        format!("Description: {}", course.description),
    ];

    if !goals.is_empty() {
        lines.push(String::new());
        lines.push("Curriculum:".to_string());
        for (idx, goal) in goals.iter().enumerate() {
            let marker = if completed.contains(&goal.id) {
                " (COMPLETED)"
            } else {
                ""
            };
            lines.push(format!("{}. {}{}", idx + 1, goal.description, marker));
        }
    }

    lines.join("\n")
}

pub fn build_prompt(
    course: &Course,
    goals: &[LearningGoal],
    completed: &[i64],
    history: &[Message],
) -> ChatPrompt {
    let transcript = history
        .iter()
        .map(|message| PromptMessage {
            role: match message.sender {
                MessageSender::User => "user",
                MessageSender::Assistant => "assistant",
            },
            content: message.body.clone(),
        })
        .collect();

    ChatPrompt {
        system: build_system_preamble(course, goals, completed),
        transcript,
    }
}

/// Orchestrates one chat turn.
///
/// The user's message is persisted before the gateway is called, so a
/// failure past that point leaves a visible, recoverable record instead of
/// a lost message. The assistant reply and the session's last-activity bump
/// are committed together only on a successful round trip; on gateway
/// failure the caller gets a typed 503 and the transcript shows the pending
/// user message. Retrying is a fresh send on the same session.
#[instrument(skip_all, fields(session_id, username = %user.username))]
pub async fn send_message(
    pool: &Pool<Sqlite>,
    gateway: &dyn TutorGateway,
    locks: &SessionLocks,
    session_id: i64,
    user: &User,
    text: &str,
) -> Result<ChatTurn, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::Validation(
            "Message text must not be empty".to_string(),
        ));
    }

    let session = db::get_chat_session(pool, session_id).await?;
    let enrollment = db::get_enrollment(pool, session.enrollment_id).await?;

    if enrollment.user_id != user.id {
        return Err(AppError::Authorization(
            "Chat session belongs to another user".to_string(),
        ));
    }

    let lock = locks.acquire(session_id).await;
    let _serialized = lock.lock().await;

    let user_message = db::insert_message(pool, session_id, MessageSender::User, text).await?;

    let course = db::get_course(pool, enrollment.course_id).await?;
    let goals = db::get_learning_goals(pool, course.id).await?;
    let completed = db::get_checkpointed_goal_ids(pool, enrollment.id).await?;
    let history = db::get_recent_messages(pool, session_id, TRANSCRIPT_WINDOW).await?;

    let prompt = build_prompt(&course, &goals, &completed, &history);

    // Tier comes from the caller's role as of this turn; the gateway call
    // runs outside any database transaction.
    let tier = user.role.model_tier();
    let reply = gateway.complete(tier, &prompt).await?;

    let assistant_message = db::record_assistant_reply(pool, session_id, &reply).await?;

    info!(
        user_message_id = user_message.id,
        assistant_message_id = assistant_message.id,
        "Chat round trip completed"
    );

    Ok(ChatTurn {
        user_message,
        assistant_message,
    })
}
