#[cfg(test)]
pub mod test_db {
    use crate::auth::Role;
    use crate::db::{add_learning_goal, create_course, create_user, enroll_user};
    use crate::error::AppError;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use std::collections::HashMap;
    use std::sync::Once;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        courses: Vec<TestCourse>,
        enrollments: Vec<(String, String)>,
    }

    pub struct TestUser {
        pub username: String,
        pub display_name: Option<String>,
        pub role: Role,
        pub password: String,
    }

    pub struct TestCourse {
        pub title: String,
        pub description: String,
        pub goals: Vec<String>,
        pub creator_username: Option<String>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        fn user(mut self, username: &str, display_name: Option<&str>, role: Role) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role,
                password: STANDARD_PASSWORD.to_string(),
            });
            self
        }

        pub fn student(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Student)
        }

        pub fn teacher(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Teacher)
        }

        pub fn admin(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Admin)
        }

        pub fn gpt4_student(self, username: &str, display_name: Option<&str>) -> Self {
            self.user(username, display_name, Role::Gpt4Privileged)
        }

        pub fn course(mut self, title: &str, description: &str, goals: &[&str]) -> Self {
            self.courses.push(TestCourse {
                title: title.to_string(),
                description: description.to_string(),
                goals: goals.iter().map(|g| g.to_string()).collect(),
                creator_username: None,
            });
            self
        }

        pub fn enroll(mut self, username: &str, course_title: &str) -> Self {
            self.enrollments
                .push((username.to_string(), course_title.to_string()));
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = env_logger::builder().is_test(true).try_init();
            });

            // One connection only: every pooled connection to :memory: would
            // otherwise be its own empty database.
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await?;

            sqlx::migrate!("./migrations").run(&pool).await?;

            let mut user_id_map: HashMap<String, i64> = HashMap::new();
            let mut course_id_map: HashMap<String, i64> = HashMap::new();

            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    &user.password,
                    user.role.as_str(),
                    user.display_name.as_deref(),
                )
                .await?;

                user_id_map.insert(user.username.clone(), user_id);
            }

            for course in &self.courses {
                let creator_id = match &course.creator_username {
                    Some(name) => user_id_map.get(name).copied(),
                    None => self
                        .users
                        .iter()
                        .find(|u| matches!(u.role, Role::Teacher | Role::Admin))
                        .map(|u| user_id_map[&u.username]),
                }
                .or_else(|| user_id_map.values().next().copied())
                .unwrap_or(1);

                let course_id =
                    create_course(&pool, &course.title, &course.description, creator_id).await?;

                for goal in &course.goals {
                    add_learning_goal(&pool, course_id, goal).await?;
                }

                course_id_map.insert(course.title.clone(), course_id);
            }

            for (username, course_title) in &self.enrollments {
                let user_id = user_id_map
                    .get(username)
                    .copied()
                    .ok_or_else(|| AppError::NotFound(format!("No test user {}", username)))?;
                let course_id = course_id_map
                    .get(course_title)
                    .copied()
                    .ok_or_else(|| AppError::NotFound(format!("No test course {}", course_title)))?;

                enroll_user(&pool, user_id, course_id).await?;
            }

            Ok(TestDb {
                pool,
                user_id_map,
                course_id_map,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub course_id_map: HashMap<String, i64>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn course_id(&self, title: &str) -> Option<i64> {
            self.course_id_map.get(title).copied()
        }

        pub async fn enrollment_id(
            &self,
            username: &str,
            course_title: &str,
        ) -> Result<i64, sqlx::Error> {
            let user_id = self.user_id(username).ok_or(sqlx::Error::RowNotFound)?;
            let course_id = self.course_id(course_title).ok_or(sqlx::Error::RowNotFound)?;

            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM enrollments WHERE user_id = ? AND course_id = ?",
            )
            .bind(user_id)
            .bind(course_id)
            .fetch_one(&self.pool)
            .await
        }

        pub async fn goal_ids(&self, course_title: &str) -> Result<Vec<i64>, sqlx::Error> {
            let course_id = self.course_id(course_title).ok_or(sqlx::Error::RowNotFound)?;

            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM learning_goals WHERE course_id = ? ORDER BY position",
            )
            .bind(course_id)
            .fetch_all(&self.pool)
            .await
        }

        pub async fn message_count(
            &self,
            session_id: i64,
            sender: Option<&str>,
        ) -> Result<i64, sqlx::Error> {
            match sender {
                Some(sender) => {
                    sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*) FROM messages WHERE session_id = ? AND sender = ?",
                    )
                    .bind(session_id)
                    .bind(sender)
                    .fetch_one(&self.pool)
                    .await
                }
                None => {
                    sqlx::query_scalar::<_, i64>(
                        "SELECT COUNT(*) FROM messages WHERE session_id = ?",
                    )
                    .bind(session_id)
                    .fetch_one(&self.pool)
                    .await
                }
            }
        }

        pub async fn login_event_count(&self, username: &str) -> Result<i64, sqlx::Error> {
            let user_id = self.user_id(username).ok_or(sqlx::Error::RowNotFound)?;

            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM login_events WHERE user_id = ?")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
        }
    }
}

#[cfg(test)]
pub mod test_gateway {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::gateway::{ChatPrompt, GatewayError, ModelTier, TutorGateway};

    pub struct RecordedCall {
        pub tier: ModelTier,
        pub system: String,
        pub transcript_len: usize,
        pub last_content: Option<String>,
    }

    /// Scripted stand-in for the completion provider. Replies are popped in
    /// order; once the script runs out every call succeeds with a canned
    /// reply. All calls are recorded for assertions.
    pub struct MockGateway {
        replies: Mutex<VecDeque<Result<String, GatewayError>>>,
        pub calls: Mutex<Vec<RecordedCall>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self {
                replies: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(reply: &str) -> Self {
            let gateway = Self::new();
            gateway.push_reply(Ok(reply.to_string()));
            gateway
        }

        pub fn failing(error: GatewayError) -> Self {
            let gateway = Self::new();
            gateway.push_reply(Err(error));
            gateway
        }

        pub fn push_reply(&self, reply: Result<String, GatewayError>) {
            self.replies.lock().unwrap().push_back(reply);
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn last_tier(&self) -> Option<ModelTier> {
            self.calls.lock().unwrap().last().map(|call| call.tier)
        }

        pub fn last_transcript_len(&self) -> Option<usize> {
            self.calls
                .lock()
                .unwrap()
                .last()
                .map(|call| call.transcript_len)
        }
    }

    #[rocket::async_trait]
    impl TutorGateway for MockGateway {
        async fn complete(
            &self,
            tier: ModelTier,
            prompt: &ChatPrompt,
        ) -> Result<String, GatewayError> {
            self.calls.lock().unwrap().push(RecordedCall {
                tier,
                system: prompt.system.clone(),
                transcript_len: prompt.transcript.len(),
                last_content: prompt.transcript.last().map(|m| m.content.clone()),
            });

            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("This is a scripted tutor reply.".to_string()))
        }
    }
}

#[cfg(test)]
pub mod test_client {
    use std::sync::Arc;

    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use crate::gateway::TutorGateway;

    use super::test_db::{STANDARD_PASSWORD, TestDb, TestDbBuilder};
    use super::test_gateway::MockGateway;

    pub async fn create_standard_test_db() -> TestDb {
        TestDbBuilder::new()
            .admin("admin_user", Some("Admin User"))
            .teacher("teacher_user", Some("Teacher User"))
            .student("student_user", Some("Student User"))
            .gpt4_student("power_user", Some("Power User"))
            .course(
                "Embedded Systems",
                "Number systems, digital logic, microcontrollers",
                &["Number systems", "Digital logic"],
            )
            .enroll("student_user", "Embedded Systems")
            .enroll("power_user", "Embedded Systems")
            .build()
            .await
            .expect("Failed to build test DB")
    }

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb, Arc<MockGateway>) {
        let mock = Arc::new(MockGateway::new());
        let gateway: Arc<dyn TutorGateway> = mock.clone();

        let rocket = crate::init_rocket(test_db.pool.clone(), gateway).await;
        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");

        (client, test_db, mock)
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(
                json!({
                    "username": username,
                    "password": password,
                })
                .to_string(),
            )
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok, "login request failed");

        response
            .cookies()
            .iter()
            .map(|cookie| cookie.clone().into_owned())
            .collect()
    }

    pub async fn login_standard(client: &Client, username: &str) -> Vec<Cookie<'static>> {
        login_test_user(client, username, STANDARD_PASSWORD).await
    }
}
