use std::sync::Arc;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::error::app_error::AppError;
use crate::store::csrf::CsrfTokenStore;
use rocket::http::{Method, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tracing::warn;

/// Header carrying the anti-forgery token on state-changing requests.
pub const CSRF_HEADER: &str = "X-CSRF-Token";

fn is_state_changing(method: Method) -> bool {
    matches!(method, Method::Post | Method::Put | Method::Patch | Method::Delete)
}

/// Anti-forgery guard. Reads are passed through untouched; state-changing
/// methods must present the client's current token in `X-CSRF-Token` or the
/// request is rejected with 403.
#[derive(Debug, Clone, Copy)]
pub struct CsrfProtected;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CsrfProtected {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if !is_state_changing(request.method()) {
            return Outcome::Success(CsrfProtected);
        }

        let store = match request.rocket().state::<Arc<CsrfTokenStore>>() {
            Some(store) => store,
            None => return Outcome::Success(CsrfProtected),
        };

        let request_id = request
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        let client_id = match request.client_ip() {
            Some(addr) => addr.to_string(),
            None => {
                // Without a client identifier there is no token to check
                // against; fail closed.
                warn!(
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    "client ip unavailable for csrf validation"
                );
                return Outcome::Error((Status::Forbidden, AppError::CsrfRejected));
            }
        };

        let presented = request.headers().get_one(CSRF_HEADER).unwrap_or("");
        if store.validate_token(&client_id, presented).await {
            return Outcome::Success(CsrfProtected);
        }

        if let Some(sink) = request.rocket().state::<Arc<dyn AuditSink>>() {
            sink.notify(AuditEvent::new(client_id.clone(), AuditKind::CsrfRejected)).await;
        }

        warn!(
            request_id = %request_id,
            method = %request.method(),
            uri = %request.uri(),
            client_id = %client_id,
            token_presented = !presented.is_empty(),
            "csrf validation failed"
        );
        Outcome::Error((Status::Forbidden, AppError::CsrfRejected))
    }
}

impl<'a> OpenApiFromRequest<'a> for CsrfProtected {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        responses.responses.insert(
            "403".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Forbidden".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

/// Issues (or rotates) the caller's anti-forgery token. Handlers that render
/// a form or complete a login request this guard and hand the token back to
/// the client.
#[derive(Debug, Clone)]
pub struct CsrfToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CsrfToken {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let store = match request.rocket().state::<Arc<CsrfTokenStore>>() {
            Some(store) => store,
            None => return Outcome::Forward(Status::InternalServerError),
        };

        let client_id = match request.client_ip() {
            Some(addr) => addr.to_string(),
            None => return Outcome::Error((Status::Forbidden, AppError::CsrfRejected)),
        };

        Outcome::Success(CsrfToken(store.issue_token(&client_id).await))
    }
}

impl<'a> OpenApiFromRequest<'a> for CsrfToken {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
