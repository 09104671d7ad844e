use std::sync::Arc;

use rocket::State;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::{Deserialize, Serialize, json::Json};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{ClientIp, Permission, User, UserSession};
use crate::chat::{ChatTurn, SessionLocks, send_message};
use crate::dashboard::{EnrollmentOverview, LoginActivity, SessionStats};
use crate::db::{
    add_learning_goal, add_prerequisite, authenticate_user, complete_checkpoint, create_chat_session,
    create_course, create_user, create_user_session, enroll_user, find_enrollment,
    find_user_by_username, get_all_courses, get_all_users, get_chat_session, get_course,
    get_enrollment, get_enrollment_sessions, get_learning_goals, get_prerequisites,
    get_session_messages, get_user_enrollments, invalidate_session, record_login_event,
    set_user_archived, update_course, update_user_display_name, update_user_password,
    update_user_role,
};
use crate::error::AppError;
use crate::gateway::TutorGateway;
use crate::models::{Enrollment, LearningGoal, Message};
use crate::validation::AppErrorExt;
use crate::validation::JsonValidateExt;
use crate::validation::PermissionCheckExt;
use crate::validation::ValidationResponse;
use crate::{dashboard, models};

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Username is required"))]
    username: String,
    #[validate(length(min = 1, message = "Password is required"))]
    password: String,
}

#[derive(Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: Option<UserData>,
    pub error: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct UserData {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub archived: bool,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            role: user.role.to_string(),
            archived: user.archived,
        }
    }
}

#[post("/login", data = "<login>")]
pub async fn api_login(
    login: Json<LoginRequest>,
    client_ip: ClientIp,
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LoginResponse>, Custom<Json<ValidationResponse>>> {
    use chrono::Utc;
    use rocket::http::{Cookie, SameSite};

    let validated = login.validate_custom()?;

    match authenticate_user(db, &validated.username, &validated.password)
        .await
        .validate_custom()?
    {
        Some(user) => {
            record_login_event(db, user.id, client_ip.0.as_deref())
                .await
                .validate_custom()?;

            let token = UserSession::generate_token();
            let expires_at = Utc::now() + chrono::Duration::hours(1);

            create_user_session(db, user.id, &token, expires_at.naive_utc())
                .await
                .validate_custom()?;

            let cookie = Cookie::build(("session_token", token))
                .same_site(SameSite::Lax)
                .http_only(true)
                .max_age(rocket::time::Duration::hours(1));
            cookies.add_private(cookie);

            cookies.add_private(
                Cookie::build(("user_id", user.id.to_string()))
                    .same_site(SameSite::Lax)
                    .http_only(true)
                    .max_age(rocket::time::Duration::hours(1)),
            );

            cookies.add_private(
                Cookie::build(("logged_in", validated.username))
                    .same_site(SameSite::Lax)
                    .max_age(rocket::time::Duration::hours(1)),
            );

            cookies.add_private(
                Cookie::build(("user_role", user.role.to_string()))
                    .same_site(SameSite::Lax)
                    .max_age(rocket::time::Duration::hours(1)),
            );

            Ok(Json(LoginResponse {
                success: true,
                user: Some(UserData::from(user)),
                error: None,
            }))
        }
        None => Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        })),
    }
}

#[post("/logout")]
pub async fn api_logout(
    cookies: &rocket::http::CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Status {
    let token = cookies
        .get_private("session_token")
        .map(|cookie| cookie.value().to_string());

    if let Some(token) = token {
        let _ = invalidate_session(db, &token).await;
    }

    cookies.remove_private(rocket::http::Cookie::build("session_token"));
    cookies.remove_private(rocket::http::Cookie::build("user_id"));
    cookies.remove_private(rocket::http::Cookie::build("logged_in"));
    cookies.remove_private(rocket::http::Cookie::build("user_role"));

    Status::Ok
}

#[get("/me")]
pub async fn api_me(user: User) -> Json<UserData> {
    Json(UserData::from(user))
}

#[get("/me", rank = 2)]
pub async fn api_me_unauthorized() -> Status {
    Status::Unauthorized
}

#[derive(Deserialize, Validate, Clone)]
pub struct RegistrationRequest {
    #[validate(length(min = 3, max = 30, message = "Username must be 3-30 characters"))]
    username: String,
    #[validate(length(min = 1, max = 100, message = "Display name is required"))]
    display_name: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
}

/// Self-registration always lands on the student role; elevation is an
/// admin operation.
#[post("/register", data = "<registration>")]
pub async fn api_register_user(
    registration: Json<RegistrationRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    let validated = registration.validate_custom()?;

    let existing_user = find_user_by_username(db, &validated.username)
        .await
        .validate_custom()?;

    if existing_user.is_some() {
        return Err(Custom(
            Status::Conflict,
            Json(ValidationResponse::with_error(
                "username",
                "Username already exists",
            )),
        ));
    }

    create_user(
        db,
        &validated.username,
        &validated.password,
        "student",
        Some(&validated.display_name),
    )
    .await
    .validate_custom()?;

    Ok(Status::Created)
}

#[derive(Deserialize, Validate)]
pub struct PasswordChangeRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    current_password: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    new_password: String,
}

#[post("/change-password", data = "<password>")]
pub async fn api_change_password(
    password: Json<PasswordChangeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    let validated = password.validate_custom()?;

    let is_valid = authenticate_user(db, &user.username, &validated.current_password)
        .await
        .validate_custom()?;

    match is_valid {
        Some(_) => {
            update_user_password(db, user.id, &validated.new_password)
                .await
                .validate_custom()?;

            Ok(Status::Ok)
        }
        _ => Err(Custom(
            Status::Unauthorized,
            Json(ValidationResponse::with_error(
                "current_password",
                "Current password is incorrect",
            )),
        )),
    }
}

// ---- admin ----

#[derive(Deserialize)]
pub struct UserUpdateRequest {
    display_name: Option<String>,
    password: Option<String>,
    archived: Option<bool>,
    role: Option<String>,
}

#[put("/admin/users/<id>", data = "<update>")]
pub async fn api_update_user(
    id: i64,
    update: Json<UserUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::EditUserCredentials)?;

    if let Some(role) = &update.role {
        user.require_permission(Permission::EditUserRoles)?;

        crate::auth::Role::from_str(role)
            .map_err(|_| Status::BadRequest)?;
        update_user_role(db, id, role).await?;
    }

    if let Some(display_name) = &update.display_name {
        update_user_display_name(db, id, display_name).await?;
    }

    if let Some(password) = &update.password {
        update_user_password(db, id, password).await?;
    }

    if let Some(archived) = update.archived {
        set_user_archived(db, id, archived).await?;
    }

    Ok(Status::Ok)
}

#[get("/admin/users")]
pub async fn api_get_all_users(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<UserData>>, Status> {
    user.require_permission(Permission::EditUserRoles)?;

    let users = get_all_users(db).await?;

    Ok(Json(users.into_iter().map(UserData::from).collect()))
}

#[get("/admin/login_activity")]
pub async fn api_login_activity(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<LoginActivity>>, Status> {
    user.require_permission(Permission::ViewLoginActivity)?;

    let activity = dashboard::login_activity(db).await?;

    Ok(Json(activity))
}

// ---- courses & enrollment ----

#[derive(Serialize, Deserialize)]
pub struct CourseResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub goals: Vec<LearningGoal>,
    pub prerequisites: Vec<i64>,
}

async fn course_response(
    db: &Pool<Sqlite>,
    course: models::Course,
) -> Result<CourseResponse, AppError> {
    let goals = get_learning_goals(db, course.id).await?;
    let prerequisites = get_prerequisites(db, course.id).await?;

    Ok(CourseResponse {
        id: course.id,
        title: course.title,
        description: course.description,
        goals,
        prerequisites,
    })
}

#[get("/courses")]
pub async fn api_get_courses(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CourseResponse>>, Status> {
    let courses = get_all_courses(db).await?;

    let mut responses = Vec::with_capacity(courses.len());
    for course in courses {
        responses.push(course_response(db, course).await?);
    }

    Ok(Json(responses))
}

#[derive(Deserialize, Validate)]
pub struct CreateCourseRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    title: String,
    description: String,
    #[serde(default)]
    goals: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct CreateCourseResponse {
    pub course_id: i64,
}

#[post("/courses", data = "<request>")]
pub async fn api_create_course(
    request: Json<CreateCourseRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<CreateCourseResponse>, Custom<Json<ValidationResponse>>> {
    user.require_all_permissions(&[Permission::CreateCourses, Permission::EditCourses])
        .validate_custom()?;

    let validated = request.validate_custom()?;

    let course_id = create_course(db, &validated.title, &validated.description, user.id)
        .await
        .validate_custom()?;

    for goal in &validated.goals {
        add_learning_goal(db, course_id, goal)
            .await
            .validate_custom()?;
    }

    Ok(Json(CreateCourseResponse { course_id }))
}

#[derive(Deserialize, Validate)]
pub struct CourseUpdateRequest {
    #[validate(length(min = 1, max = 100, message = "Title must be 1-100 characters"))]
    title: String,
    description: String,
}

#[put("/courses/<id>", data = "<request>")]
pub async fn api_update_course(
    id: i64,
    request: Json<CourseUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::EditCourses)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    get_course(db, id).await.validate_custom()?;
    update_course(db, id, &validated.title, &validated.description)
        .await
        .validate_custom()?;

    Ok(Status::Ok)
}

#[derive(Deserialize, Validate)]
pub struct AddGoalRequest {
    #[validate(length(min = 1, max = 750, message = "Description must be 1-750 characters"))]
    description: String,
}

#[post("/courses/<id>/goals", data = "<request>")]
pub async fn api_add_goal(
    id: i64,
    request: Json<AddGoalRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::EditCourses)
        .validate_custom()?;

    let validated = request.validate_custom()?;

    add_learning_goal(db, id, &validated.description)
        .await
        .validate_custom()?;

    Ok(Status::Created)
}

#[derive(Deserialize)]
pub struct AddPrerequisiteRequest {
    prerequisite_id: i64,
}

#[post("/courses/<id>/prerequisites", data = "<request>")]
pub async fn api_add_prerequisite(
    id: i64,
    request: Json<AddPrerequisiteRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::EditCourses)
        .validate_custom()?;

    add_prerequisite(db, id, request.prerequisite_id)
        .await
        .validate_custom()?;

    Ok(Status::Created)
}

#[derive(Serialize, Deserialize)]
pub struct EnrollResponse {
    pub enrollment_id: i64,
}

#[post("/courses/<id>/enroll")]
pub async fn api_enroll(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<EnrollResponse>, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::EnrollInCourses)
        .validate_custom()?;

    let enrollment_id = enroll_user(db, user.id, id).await.validate_custom()?;

    Ok(Json(EnrollResponse { enrollment_id }))
}

#[post("/enrollments/<id>/checkpoints/<goal_id>")]
pub async fn api_complete_checkpoint(
    id: i64,
    goal_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, Status> {
    user.require_permission(Permission::RecordCheckpoints)?;

    complete_checkpoint(db, id, goal_id).await?;

    Ok(Status::Ok)
}

// ---- chat ----

#[derive(Serialize, Deserialize)]
pub struct ChatSessionResponse {
    pub session_id: i64,
}

#[post("/courses/<id>/chat/sessions")]
pub async fn api_create_chat_session(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ChatSessionResponse>, Custom<Json<ValidationResponse>>> {
    user.require_permission(Permission::ChatWithTutor)
        .validate_custom()?;

    let enrollment = find_enrollment(db, user.id, id).await.validate_custom()?;

    let Some(enrollment) = enrollment else {
        return Err(Custom(
            Status::NotFound,
            Json(ValidationResponse::with_error(
                "enrollment",
                "You are not enrolled in this course",
            )),
        ));
    };

    let session_id = create_chat_session(db, enrollment.id)
        .await
        .validate_custom()?;

    Ok(Json(ChatSessionResponse { session_id }))
}

#[get("/courses/<id>/chat/sessions")]
pub async fn api_get_chat_sessions(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<models::ChatSession>>, Status> {
    let enrollment = find_enrollment(db, user.id, id).await?;

    let Some(enrollment) = enrollment else {
        return Err(Status::NotFound);
    };

    let sessions = get_enrollment_sessions(db, enrollment.id).await?;

    Ok(Json(sessions))
}

#[derive(Serialize, Deserialize)]
pub struct TranscriptResponse {
    pub session_id: i64,
    pub course_id: i64,
    pub messages: Vec<Message>,
}

#[get("/chat/sessions/<id>")]
pub async fn api_get_transcript(
    id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<TranscriptResponse>, Status> {
    let session = get_chat_session(db, id).await?;
    let enrollment = get_enrollment(db, session.enrollment_id).await?;

    if enrollment.user_id != user.id {
        return Err(Status::Forbidden);
    }

    let messages = get_session_messages(db, id).await?;

    Ok(Json(TranscriptResponse {
        session_id: session.id,
        course_id: enrollment.course_id,
        messages,
    }))
}

#[derive(Deserialize, Validate)]
pub struct ChatMessageRequest {
    #[validate(length(min = 1, max = 4000, message = "Message must be 1-4000 characters"))]
    message: String,
}

#[post("/chat/sessions/<id>/messages", data = "<request>")]
pub async fn api_send_message(
    id: i64,
    request: Json<ChatMessageRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    gateway: &State<Arc<dyn TutorGateway>>,
    locks: &State<SessionLocks>,
) -> Result<Json<ChatTurn>, AppError> {
    user.require_permission(Permission::ChatWithTutor)
        .map_err(|_| AppError::Authorization("Chat access required".to_string()))?;

    let validated = request
        .validate_custom()
        .map_err(|_| AppError::Validation("Message must be 1-4000 characters".to_string()))?;

    let turn = send_message(
        db,
        gateway.inner().as_ref(),
        locks,
        id,
        &user,
        &validated.message,
    )
    .await?;

    Ok(Json(turn))
}

// ---- dashboards ----

#[derive(Serialize, Deserialize)]
pub struct DashboardResponse {
    pub enrollments: Vec<Enrollment>,
    pub stats: SessionStats,
    pub can_use_advanced_model: bool,
    pub can_record_checkpoints: bool,
}

#[get("/dashboard")]
pub async fn api_dashboard(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<DashboardResponse>, Status> {
    user.require_permission(Permission::ViewOwnDashboard)?;

    let enrollments = get_user_enrollments(db, user.id).await?;
    let stats = dashboard::session_stats(db, user.id).await?;

    Ok(Json(DashboardResponse {
        enrollments,
        stats,
        can_use_advanced_model: user.has_permission(Permission::UseAdvancedModel),
        can_record_checkpoints: user.has_permission(Permission::RecordCheckpoints),
    }))
}

#[get("/teacher/dashboard")]
pub async fn api_teacher_dashboard(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<EnrollmentOverview>>, Status> {
    user.require_permission(Permission::ViewCourseOverview)?;

    let overview = dashboard::course_overview(db).await?;

    Ok(Json(overview))
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
