use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub mod pipe;
pub mod system;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

pub struct ApiError {
    status: StatusCode,
    error: anyhow::Error,
}

impl ApiError {
    /// Rejects a request the caller got wrong; the message is returned as the body.
    pub fn bad_request(error: impl Into<anyhow::Error>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if !self.status.is_server_error() {
            log::debug!("ApiError: {} {}", self.status, self.error);
            return (self.status, self.error.to_string()).into_response();
        }
        log::error!("ApiError: {:?}", self.error);
        (
            self.status,
            "reconciler went wrong because of an internal error".to_string(),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: err.into(),
        }
    }
}
