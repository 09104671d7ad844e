use crate::{
    auth::{DbUser, DbUserSession, User, UserSession},
    error::AppError,
    models::{
        ChatSession, Course, DbChatSession, DbCourse, DbEnrollment, DbMessage, Enrollment,
        LearningGoal, Message, MessageSender,
    },
};
use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

// ---- users ----

#[instrument(skip(pool))]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => Ok(User::from(user)),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    let row = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(User::from))
}

#[instrument(skip_all, fields(username, role))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: &str,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Err(AppError::Validation(format!(
            "Username '{}' already exists",
            username
        )));
    }

    let hashed_password = bcrypt::hash(password, bcrypt::DEFAULT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role)
    .bind(display_name.unwrap_or_default())
    .execute(pool)
    .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip_all, fields(username))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    let record = sqlx::query_scalar::<_, String>(
        "SELECT password FROM users WHERE username = ? AND archived IS 0",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    let Some(hashed) = record else {
        return Ok(None);
    };

    let valid = bcrypt::verify(password, &hashed).unwrap_or(false);
    if !valid {
        return Ok(None);
    }

    find_user_by_username(pool, username).await
}

#[instrument(skip(pool))]
pub async fn update_user_display_name(
    pool: &Pool<Sqlite>,
    user_id: i64,
    display_name: &str,
) -> Result<(), AppError> {
    sqlx::query("UPDATE users SET display_name = ? WHERE id = ?")
        .bind(display_name)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip_all, fields(user_id))]
pub async fn update_user_password(
    pool: &Pool<Sqlite>,
    user_id: i64,
    new_password: &str,
) -> Result<(), AppError> {
    let hashed_password = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)?;

    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(hashed_password)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn update_user_role(
    pool: &Pool<Sqlite>,
    user_id: i64,
    role: &str,
) -> Result<(), AppError> {
    info!("Updating user role");

    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn set_user_archived(
    pool: &Pool<Sqlite>,
    user_id: i64,
    archive: bool,
) -> Result<(), AppError> {
    info!("Toggling user archived status");

    sqlx::query("UPDATE users SET archived = ? WHERE id = ?")
        .bind(archive)
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_all_users(pool: &Pool<Sqlite>) -> Result<Vec<User>, AppError> {
    let rows = sqlx::query_as::<_, DbUser>(
        "SELECT id, username, role, display_name, archived FROM users ORDER BY username",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(User::from).collect())
}

// ---- auth sessions ----

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res = sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

// ---- login events ----

#[instrument(skip(pool))]
pub async fn record_login_event(
    pool: &Pool<Sqlite>,
    user_id: i64,
    ip_address: Option<&str>,
) -> Result<i64, AppError> {
    info!("Recording login event");

    let now = Utc::now().naive_utc();
    let res =
        sqlx::query("INSERT INTO login_events (user_id, logged_in_at, ip_address) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(now)
            .bind(ip_address)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

// ---- courses ----

#[instrument(skip(pool, description))]
pub async fn create_course(
    pool: &Pool<Sqlite>,
    title: &str,
    description: &str,
    created_by: i64,
) -> Result<i64, AppError> {
    info!("Creating course");

    let res = sqlx::query("INSERT INTO courses (title, description, created_by) VALUES (?, ?, ?)")
        .bind(title)
        .bind(description)
        .bind(created_by)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_course(pool: &Pool<Sqlite>, id: i64) -> Result<Course, AppError> {
    let row = sqlx::query_as::<_, DbCourse>(
        "SELECT id, title, description, created_by, created_at FROM courses WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(course) => Ok(Course::from(course)),
        _ => Err(AppError::NotFound(format!(
            "Course with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_all_courses(pool: &Pool<Sqlite>) -> Result<Vec<Course>, AppError> {
    let rows = sqlx::query_as::<_, DbCourse>(
        "SELECT id, title, description, created_by, created_at FROM courses ORDER BY title",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Course::from).collect())
}

#[instrument(skip(pool, description))]
pub async fn update_course(
    pool: &Pool<Sqlite>,
    course_id: i64,
    title: &str,
    description: &str,
) -> Result<(), AppError> {
    // Structural edits stay limited to title and description; goals and
    // prerequisites have their own write paths so existing checkpoints
    // keep their targets.
    sqlx::query("UPDATE courses SET title = ?, description = ? WHERE id = ?")
        .bind(title)
        .bind(description)
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool, description))]
pub async fn add_learning_goal(
    pool: &Pool<Sqlite>,
    course_id: i64,
    description: &str,
) -> Result<i64, AppError> {
    get_course(pool, course_id).await?;

    let next_position = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM learning_goals WHERE course_id = ?",
    )
    .bind(course_id)
    .fetch_one(pool)
    .await?;

    let res =
        sqlx::query("INSERT INTO learning_goals (course_id, position, description) VALUES (?, ?, ?)")
            .bind(course_id)
            .bind(next_position)
            .bind(description)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_learning_goals(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<LearningGoal>, AppError> {
    let rows = sqlx::query_as::<_, LearningGoal>(
        "SELECT id, course_id, position, description FROM learning_goals
         WHERE course_id = ? ORDER BY position",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// All prerequisite edges as (course, prerequisite) pairs.
async fn get_prerequisite_edges(pool: &Pool<Sqlite>) -> Result<Vec<(i64, i64)>, AppError> {
    let rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT course_id, prerequisite_id FROM course_prerequisites",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

fn creates_cycle(edges: &[(i64, i64)], course_id: i64, prerequisite_id: i64) -> bool {
    // Adding course -> prerequisite closes a cycle iff course is already
    // reachable from prerequisite along existing prerequisite edges.
    let mut stack = vec![prerequisite_id];
    let mut seen = std::collections::HashSet::new();

    while let Some(current) = stack.pop() {
        if current == course_id {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        for (from, to) in edges {
            if *from == current {
                stack.push(*to);
            }
        }
    }

    false
}

#[instrument(skip(pool))]
pub async fn add_prerequisite(
    pool: &Pool<Sqlite>,
    course_id: i64,
    prerequisite_id: i64,
) -> Result<(), AppError> {
    info!("Adding course prerequisite");

    if course_id == prerequisite_id {
        return Err(AppError::Validation(
            "A course cannot be its own prerequisite".to_string(),
        ));
    }

    get_course(pool, course_id).await?;
    get_course(pool, prerequisite_id).await?;

    let edges = get_prerequisite_edges(pool).await?;
    if creates_cycle(&edges, course_id, prerequisite_id) {
        return Err(AppError::Validation(
            "Prerequisite would create a cycle".to_string(),
        ));
    }

    sqlx::query(
        "INSERT OR IGNORE INTO course_prerequisites (course_id, prerequisite_id) VALUES (?, ?)",
    )
    .bind(course_id)
    .bind(prerequisite_id)
    .execute(pool)
    .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn get_prerequisites(
    pool: &Pool<Sqlite>,
    course_id: i64,
) -> Result<Vec<i64>, AppError> {
    let rows = sqlx::query_scalar::<_, i64>(
        "SELECT prerequisite_id FROM course_prerequisites WHERE course_id = ?",
    )
    .bind(course_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---- enrollments ----

#[instrument(skip(pool))]
pub async fn find_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<Option<Enrollment>, AppError> {
    let row = sqlx::query_as::<_, DbEnrollment>(
        "SELECT id, user_id, course_id, enrolled_at, completed_at FROM enrollments
         WHERE user_id = ? AND course_id = ?",
    )
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Enrollment::from))
}

#[instrument(skip(pool))]
pub async fn get_enrollment(pool: &Pool<Sqlite>, id: i64) -> Result<Enrollment, AppError> {
    let row = sqlx::query_as::<_, DbEnrollment>(
        "SELECT id, user_id, course_id, enrolled_at, completed_at FROM enrollments WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(enrollment) => Ok(Enrollment::from(enrollment)),
        _ => Err(AppError::NotFound(format!(
            "Enrollment with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_user_enrollments(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Enrollment>, AppError> {
    let rows = sqlx::query_as::<_, DbEnrollment>(
        "SELECT id, user_id, course_id, enrolled_at, completed_at FROM enrollments
         WHERE user_id = ? ORDER BY enrolled_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

/// Idempotent: enrolling twice returns the existing row's id. Fails when any
/// prerequisite course lacks a completed enrollment for this user.
#[instrument(skip(pool))]
pub async fn enroll_user(
    pool: &Pool<Sqlite>,
    user_id: i64,
    course_id: i64,
) -> Result<i64, AppError> {
    info!("Enrolling user in course");

    get_course(pool, course_id).await?;

    if let Some(existing) = find_enrollment(pool, user_id, course_id).await? {
        return Ok(existing.id);
    }

    for prerequisite_id in get_prerequisites(pool, course_id).await? {
        let completed = find_enrollment(pool, user_id, prerequisite_id)
            .await?
            .map(|e| e.completed_at.is_some())
            .unwrap_or(false);

        if !completed {
            return Err(AppError::Validation(format!(
                "Prerequisite course {} is not completed",
                prerequisite_id
            )));
        }
    }

    let res = sqlx::query("INSERT INTO enrollments (user_id, course_id) VALUES (?, ?)")
        .bind(user_id)
        .bind(course_id)
        .execute(pool)
        .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_checkpointed_goal_ids(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
) -> Result<Vec<i64>, AppError> {
    let rows = sqlx::query_scalar::<_, i64>(
        "SELECT goal_id FROM checkpoints WHERE enrollment_id = ?",
    )
    .bind(enrollment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Records a checkpoint for one learning goal. When the last goal of the
/// course gets its checkpoint the enrollment is marked completed, which is
/// what unlocks dependant courses.
#[instrument(skip(pool))]
pub async fn complete_checkpoint(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
    goal_id: i64,
) -> Result<(), AppError> {
    info!("Recording checkpoint");

    let enrollment = get_enrollment(pool, enrollment_id).await?;

    let goal_course = sqlx::query_scalar::<_, i64>(
        "SELECT course_id FROM learning_goals WHERE id = ?",
    )
    .bind(goal_id)
    .fetch_optional(pool)
    .await?;

    match goal_course {
        Some(course_id) if course_id == enrollment.course_id => {}
        Some(_) => {
            return Err(AppError::Validation(
                "Learning goal belongs to a different course".to_string(),
            ));
        }
        _ => {
            return Err(AppError::NotFound(format!(
                "Learning goal with id {} not found in database",
                goal_id
            )));
        }
    }

    sqlx::query("INSERT OR IGNORE INTO checkpoints (enrollment_id, goal_id) VALUES (?, ?)")
        .bind(enrollment_id)
        .bind(goal_id)
        .execute(pool)
        .await?;

    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM learning_goals g
         WHERE g.course_id = ?
           AND NOT EXISTS (
               SELECT 1 FROM checkpoints c
               WHERE c.enrollment_id = ? AND c.goal_id = g.id
           )",
    )
    .bind(enrollment.course_id)
    .bind(enrollment_id)
    .fetch_one(pool)
    .await?;

    if remaining == 0 && enrollment.completed_at.is_none() {
        let now = Utc::now().naive_utc();
        sqlx::query("UPDATE enrollments SET completed_at = ? WHERE id = ?")
            .bind(now)
            .bind(enrollment_id)
            .execute(pool)
            .await?;
    }

    Ok(())
}

// ---- chat sessions & messages ----

#[instrument(skip(pool))]
pub async fn create_chat_session(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
) -> Result<i64, AppError> {
    info!("Creating chat session");

    get_enrollment(pool, enrollment_id).await?;

    let now = Utc::now().naive_utc();
    let res =
        sqlx::query("INSERT INTO chat_sessions (enrollment_id, created_at, last_activity) VALUES (?, ?, ?)")
            .bind(enrollment_id)
            .bind(now)
            .bind(now)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool))]
pub async fn get_chat_session(pool: &Pool<Sqlite>, id: i64) -> Result<ChatSession, AppError> {
    let row = sqlx::query_as::<_, DbChatSession>(
        "SELECT id, enrollment_id, created_at, last_activity FROM chat_sessions WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(session) => Ok(ChatSession::from(session)),
        _ => Err(AppError::NotFound(format!(
            "Chat session with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_enrollment_sessions(
    pool: &Pool<Sqlite>,
    enrollment_id: i64,
) -> Result<Vec<ChatSession>, AppError> {
    let rows = sqlx::query_as::<_, DbChatSession>(
        "SELECT id, enrollment_id, created_at, last_activity FROM chat_sessions
         WHERE enrollment_id = ? ORDER BY created_at DESC",
    )
    .bind(enrollment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(ChatSession::from).collect())
}

#[instrument(skip(pool, body))]
pub async fn insert_message(
    pool: &Pool<Sqlite>,
    session_id: i64,
    sender: MessageSender,
    body: &str,
) -> Result<Message, AppError> {
    let now = Utc::now().naive_utc();

    let res = sqlx::query(
        "INSERT INTO messages (session_id, sender, body, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(sender.as_str())
    .bind(body)
    .bind(now)
    .execute(pool)
    .await?;

    get_message(pool, res.last_insert_rowid()).await
}

#[instrument(skip(pool))]
pub async fn get_message(pool: &Pool<Sqlite>, id: i64) -> Result<Message, AppError> {
    let row = sqlx::query_as::<_, DbMessage>(
        "SELECT id, session_id, sender, body, created_at FROM messages WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(message) => Ok(Message::from(message)),
        _ => Err(AppError::NotFound(format!(
            "Message with id {} not found in database",
            id
        ))),
    }
}

#[instrument(skip(pool))]
pub async fn get_session_messages(
    pool: &Pool<Sqlite>,
    session_id: i64,
) -> Result<Vec<Message>, AppError> {
    let rows = sqlx::query_as::<_, DbMessage>(
        "SELECT id, session_id, sender, body, created_at FROM messages
         WHERE session_id = ? ORDER BY created_at, id",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Message::from).collect())
}

/// The most recent `limit` messages of a session, oldest first.
#[instrument(skip(pool))]
pub async fn get_recent_messages(
    pool: &Pool<Sqlite>,
    session_id: i64,
    limit: i64,
) -> Result<Vec<Message>, AppError> {
    let mut rows = sqlx::query_as::<_, DbMessage>(
        "SELECT id, session_id, sender, body, created_at FROM messages
         WHERE session_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.reverse();
    Ok(rows.into_iter().map(Message::from).collect())
}

/// Persists the assistant's reply and advances the session's last-activity
/// mark in a single transaction, so a session never shows a completed round
/// trip without the matching activity bump (or vice versa). The gateway call
/// has already happened by the time this runs; no transaction is ever open
/// across it.
#[instrument(skip(pool, body))]
pub async fn record_assistant_reply(
    pool: &Pool<Sqlite>,
    session_id: i64,
    body: &str,
) -> Result<Message, AppError> {
    let now = Utc::now().naive_utc();

    let mut tx = pool.begin().await?;

    let res = sqlx::query(
        "INSERT INTO messages (session_id, sender, body, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(MessageSender::Assistant.as_str())
    .bind(body)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    let message_id = res.last_insert_rowid();

    sqlx::query("UPDATE chat_sessions SET last_activity = ? WHERE id = ?")
        .bind(now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    get_message(pool, message_id).await
}
