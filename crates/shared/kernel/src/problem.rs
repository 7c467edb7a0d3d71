use std::borrow::Cow;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use storm_tape_domain::LogicalPath;

/// The error envelope every HTTP handler returns on failure, serialised as
/// `application/problem+json`.
///
/// `ValidationError`/`NotFoundError`/`InvalidPathsError`/`Internal` are the
/// only kinds that ever reach a client: probe and persistence failures are
/// absorbed or turned into file state elsewhere and never surface here
/// directly (persistence failures that do escape become `Internal`).
#[derive(Debug)]
pub enum ApiError {
    Validation(Cow<'static, str>),
    NotFound,
    InvalidPaths { stage_id: String, paths: Vec<LogicalPath> },
    Internal(Cow<'static, str>),
}

impl ApiError {
    #[must_use]
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidPaths { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn title(&self) -> Cow<'static, str> {
        match self {
            Self::Validation(message) => message.clone(),
            Self::NotFound => Cow::Borrowed("Stage Not Found"),
            Self::InvalidPaths { .. } => Cow::Borrowed("File missing from stage request"),
            Self::Internal(message) => message.clone(),
        }
    }
}

/// Builds the human-readable sentence describing which paths were rejected
/// and why, appended to an `InvalidPathsError` response body.
fn invalid_paths_detail(stage_id: &str, paths: &[LogicalPath]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| format!("'{p}'")).collect();
    let (verb, plural) = if paths.len() > 1 { ("do", "s") } else { ("does", "") };
    format!(
        "The file{plural} {} {verb} not belong to the STAGE request {stage_id}. No modification has been made to this request.",
        quoted.join(" ")
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::InvalidPaths { stage_id, paths } => json!({
                "status": status.as_u16(),
                "title": self.title(),
                "detail": invalid_paths_detail(stage_id, paths),
            }),
            _ => json!({
                "status": status.as_u16(),
                "title": self.title(),
            }),
        };

        (status, [(header::CONTENT_TYPE, "application/problem+json")], axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let response = ApiError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_paths_lists_offending_files() {
        let err =
            ApiError::InvalidPaths { stage_id: "abc".into(), paths: vec![LogicalPath::new("/vo/missing")] };
        let detail = invalid_paths_detail("abc", &[LogicalPath::new("/vo/missing")]);
        assert!(detail.contains("'/vo/missing'"));
        assert!(detail.contains("No modification has been made to this request."));
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }
}
