use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;

use crate::config::cors::{USER_ID_HEADER, USER_ROLE_HEADER};
use crate::models::Requester;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod enrollments;
pub mod tickets;

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "conference-api",
    };

    success(payload, "Health check successful")
}

/// Caller identity forwarded by the session layer in front of this service.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Requester);

impl Caller {
    pub fn require_staff(&self) -> Result<Uuid, AppError> {
        if self.0.is_staff {
            Ok(self.0.user_id)
        } else {
            Err(AppError::Forbidden("staff access required".to_string()))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::AuthError("missing session identity".to_string()))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| AppError::AuthError("malformed session identity".to_string()))?;

        let is_staff = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| {
                role.eq_ignore_ascii_case("staff") || role.eq_ignore_ascii_case("admin")
            });

        Ok(Caller(Requester { user_id, is_staff }))
    }
}
