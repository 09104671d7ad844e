use crate::error::AppError;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use serde::Serialize;
use std::collections::HashMap;
use validator::Validate;

#[derive(Debug, Serialize, Clone)]
pub struct ValidationResponse {
    pub status: &'static str,
    pub errors: HashMap<String, Vec<String>>,
}

impl ValidationResponse {
    pub fn new(errors: HashMap<String, Vec<String>>) -> Self {
        Self {
            status: "error",
            errors,
        }
    }

    pub fn with_error(field: &str, message: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.to_string()]);
        Self::new(errors)
    }
}

fn validation_errors_response(errors: validator::ValidationErrors) -> Custom<Json<ValidationResponse>> {
    let mut error_map = HashMap::new();

    for (field, field_errors) in errors.field_errors() {
        let error_messages: Vec<String> = field_errors
            .iter()
            .map(|error| {
                error
                    .message
                    .clone()
                    .unwrap_or_else(|| "Invalid value".into())
                    .to_string()
            })
            .collect();

        error_map.insert(field.to_string(), error_messages);
    }

    Custom(
        Status::UnprocessableEntity,
        Json(ValidationResponse::new(error_map)),
    )
}

fn app_error_response(error: AppError) -> Custom<Json<ValidationResponse>> {
    error.log_and_record("API validation");
    let status = error.status_code();

    let (field, message) = match &error {
        AppError::Database(db_err) => ("database", format!("Database error: {}", db_err)),
        AppError::Authentication(msg) => {
            ("authentication", format!("Authentication error: {}", msg))
        }
        AppError::Authorization(msg) => ("authorization", format!("Permission denied: {}", msg)),
        AppError::NotFound(msg) => ("resource", format!("Not found: {}", msg)),
        AppError::Validation(msg) => ("validation", msg.clone()),
        AppError::Gateway(err) => ("assistant", format!("Assistant unavailable: {}", err)),
        AppError::Internal(_) => ("server", "Internal server error".to_string()),
    };

    Custom(status, Json(ValidationResponse::with_error(field, &message)))
}

/// Validate a JSON body and hand back the inner value, or the field-keyed
/// error envelope the frontend renders.
pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>> {
        let inner = self.into_inner();
        match inner.validate() {
            Ok(()) => Ok(inner),
            Err(errors) => Err(validation_errors_response(errors)),
        }
    }
}

pub trait AppErrorExt<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>>;
}

impl<T> AppErrorExt<T> for Result<T, AppError> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>> {
        self.map_err(app_error_response)
    }
}

pub trait PermissionCheckExt<T> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>>;
}

impl<T> PermissionCheckExt<T> for Result<T, Status> {
    fn validate_custom(self) -> Result<T, Custom<Json<ValidationResponse>>> {
        self.map_err(|status| {
            let (field, message) = match status.code {
                403 => (
                    "permission",
                    "You don't have permission to perform this action",
                ),
                401 => ("authentication", "Authentication required"),
                404 => ("resource", "Resource not found"),
                409 => ("resource", "Resource already exists"),
                _ => ("error", "An error occurred"),
            };

            Custom(status, Json(ValidationResponse::with_error(field, message)))
        })
    }
}
