//! The facade's error envelope: `{request_uri, error_code, error_desc,
//! error_detail}`, matching spec.md §6/`asynxd/asynxd/apis.py`'s
//! `error_mapping` table exactly.

use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use taskwire_core::EngineError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: u32,
    desc: &'static str,
    detail: String,
    request_uri: String,
}

impl AppError {
    fn new(status: StatusCode, code: u32, desc: &'static str, detail: impl Into<String>) -> Self {
        AppError {
            status,
            code,
            desc,
            detail: detail.into(),
            request_uri: String::new(),
        }
    }

    /// `200100` — malformed JSON at the facade boundary.
    pub fn parse(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, 200_100, "Parsing failure", detail)
    }

    /// `200101` — well-formed JSON that fails schema/semantic validation
    /// (missing fields, out-of-range values, malformed URLs, etc).
    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, 200_101, "Validation failure", detail)
    }

    /// `207202`.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, 207_202, "Task not found", detail)
    }

    /// `207203`. Also used for the delete-by-id-while-running conflict
    /// (`TaskStatusNotMatched`): spec.md's error code table names no
    /// separate code for that 409, and `207203` is the only conflict code it
    /// defines, so this implementation reuses it rather than inventing an
    /// unnamed one (see DESIGN.md).
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, 207_203, "Task already exists", detail)
    }

    /// `107250`.
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, 107_250, "Internal server error", detail)
    }

    /// Stamps the originating request's URI, filled in once per handler
    /// right before the error is returned.
    pub fn at(mut self, uri: &Uri) -> Self {
        self.request_uri = uri.to_string();
        self
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.desc, self.code, self.detail)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "request_uri": self.request_uri,
            "error_code": self.code,
            "error_desc": self.desc,
            "error_detail": self.detail,
        }));
        (self.status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match &err {
            EngineError::TaskNotFound(id) => AppError::not_found(format!("task {id} not found")),
            EngineError::TaskAlreadyExists(cname) => {
                AppError::conflict(format!("task with cname {cname:?} already exists"))
            }
            EngineError::TaskStatusNotMatched(id) => {
                AppError::conflict(format!("task {id} is running and cannot be deleted by id"))
            }
            EngineError::TaskCNameRequired => {
                AppError::validation("a recurring task (schedule set) requires a cname")
            }
            EngineError::Store(_) | EngineError::Broker(_) | EngineError::Codec(_) | EngineError::Schedule(_) => {
                AppError::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_the_stamped_request_uri() {
        let uri: Uri = "/apps/test/taskqueues/default/tasks/id:9".parse().unwrap();
        let err = AppError::not_found("task 9 not found").at(&uri);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn task_not_found_maps_to_404_207202() {
        let err: AppError = EngineError::TaskNotFound("9".to_string()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, 207_202);
    }

    #[test]
    fn task_already_exists_maps_to_409_207203() {
        let err: AppError = EngineError::TaskAlreadyExists("a".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, 207_203);
    }

    #[test]
    fn running_task_status_conflict_also_reuses_207203() {
        let err: AppError = EngineError::TaskStatusNotMatched("9".to_string()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, 207_203);
    }

    #[test]
    fn cname_required_maps_to_422_200101() {
        let err: AppError = EngineError::TaskCNameRequired.into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, 200_101);
    }
}
