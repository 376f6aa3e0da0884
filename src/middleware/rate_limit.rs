use std::sync::Arc;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::error::app_error::AppError;
use crate::store::rate_limit::{RateDecision, RateLimiter};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tracing::warn;

/// Admission guard: every route carrying it is counted against the client's
/// sliding-window budget and rejected with 429 once the budget is spent.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit;

/// Retry hint stashed in `local_cache` for the 429 catcher.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRetryAfter(pub u64);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RateLimit {
    type Error = AppError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let limiter = match request.rocket().state::<Arc<RateLimiter>>() {
            Some(limiter) => limiter,
            None => return Outcome::Success(RateLimit),
        };

        let request_id = request
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        let client_id = match request.client_ip() {
            Some(addr) => addr.to_string(),
            None => {
                warn!(
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    "client ip unavailable for rate limiting"
                );
                "missing-ip".to_string()
            }
        };

        match limiter.check(&client_id).await {
            RateDecision::Allow => Outcome::Success(RateLimit),
            RateDecision::Limited { retry_after } => {
                let retry_after_secs = retry_after.as_secs().max(1);
                request.local_cache(|| Some(RateLimitRetryAfter(retry_after_secs)));

                if let Some(sink) = request.rocket().state::<Arc<dyn AuditSink>>() {
                    sink.notify(AuditEvent::new(client_id.clone(), AuditKind::RateLimited)).await;
                }

                warn!(
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    client_id = %client_id,
                    retry_after_secs = %retry_after_secs,
                    "rate limit exceeded"
                );
                Outcome::Error((Status::TooManyRequests, AppError::RateLimited { retry_after_secs }))
            }
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for RateLimit {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        responses.responses.insert(
            "429".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Too Many Requests".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}
