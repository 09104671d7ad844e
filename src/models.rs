use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

fn to_utc(dt: Option<NaiveDateTime>) -> DateTime<Utc> {
    dt.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or_else(Utc::now)
}

#[derive(Serialize, Clone)]
pub struct Course {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbCourse {
    pub id: Option<i64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbCourse> for Course {
    fn from(course: DbCourse) -> Self {
        Self {
            id: course.id.unwrap_or_default(),
            title: course.title.unwrap_or_default(),
            description: course.description.unwrap_or_default(),
            created_by: course.created_by.unwrap_or_default(),
            created_at: to_utc(course.created_at),
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Clone)]
pub struct LearningGoal {
    pub id: i64,
    pub course_id: i64,
    pub position: i64,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Enrollment {
    pub id: i64,
    pub user_id: i64,
    pub course_id: i64,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbEnrollment {
    pub id: Option<i64>,
    pub user_id: Option<i64>,
    pub course_id: Option<i64>,
    pub enrolled_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl From<DbEnrollment> for Enrollment {
    fn from(db: DbEnrollment) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            user_id: db.user_id.unwrap_or_default(),
            course_id: db.course_id.unwrap_or_default(),
            enrolled_at: to_utc(db.enrolled_at),
            completed_at: db
                .completed_at
                .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)),
        }
    }
}

#[derive(Serialize, Clone)]
pub struct ChatSession {
    pub id: i64,
    pub enrollment_id: i64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbChatSession {
    pub id: Option<i64>,
    pub enrollment_id: Option<i64>,
    pub created_at: Option<NaiveDateTime>,
    pub last_activity: Option<NaiveDateTime>,
}

impl From<DbChatSession> for ChatSession {
    fn from(db: DbChatSession) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            enrollment_id: db.enrollment_id.unwrap_or_default(),
            created_at: to_utc(db.created_at),
            last_activity: to_utc(db.last_activity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Assistant,
}

impl MessageSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSender::User => "user",
            MessageSender::Assistant => "assistant",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "assistant" => MessageSender::Assistant,
            _ => MessageSender::User,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct Message {
    pub id: i64,
    pub session_id: i64,
    pub sender: MessageSender,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Clone)]
pub struct DbMessage {
    pub id: Option<i64>,
    pub session_id: Option<i64>,
    pub sender: Option<String>,
    pub body: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl From<DbMessage> for Message {
    fn from(db: DbMessage) -> Self {
        Self {
            id: db.id.unwrap_or_default(),
            session_id: db.session_id.unwrap_or_default(),
            sender: MessageSender::from_str(&db.sender.unwrap_or_default()),
            body: db.body.unwrap_or_default(),
            created_at: to_utc(db.created_at),
        }
    }
}
