use std::sync::Arc;

use crate::audit::{AuditEvent, AuditKind, AuditSink};
use crate::error::app_error::AppError;
use crate::store::session::SessionRegistry;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome as RequestOutcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{Object, Responses, SecurityRequirement, SecurityScheme, SecuritySchemeData};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use serde::Serialize;
use uuid::Uuid;

/// Request-scoped identity resolved from the bearer token.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_id: Uuid,
    pub session_id: Uuid,
}

pub(crate) fn parse_bearer_header(value: &str) -> Option<&str> {
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() { None } else { Some(token) }
}

async fn audit_miss(req: &Request<'_>) {
    if let Some(sink) = req.rocket().state::<Arc<dyn AuditSink>>() {
        let client_id = req.client_ip().map(|ip| ip.to_string()).unwrap_or_else(|| "unknown".to_string());
        sink.notify(AuditEvent::new(client_id, AuditKind::SessionNotFound)).await;
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for CurrentUser {
    type Error = AppError;

    async fn from_request(req: &'r Request<'_>) -> RequestOutcome<Self, Self::Error> {
        let registry = match req.rocket().state::<Arc<SessionRegistry>>() {
            Some(registry) => registry,
            None => return RequestOutcome::Error((Status::InternalServerError, AppError::Unauthorized)),
        };

        let token = req.headers().get_one("Authorization").and_then(parse_bearer_header);
        let token = match token {
            Some(token) => token,
            None => {
                audit_miss(req).await;
                return RequestOutcome::Error((Status::Unauthorized, AppError::Unauthorized));
            }
        };

        let session = match registry.get_session_by_token(token).await {
            Some(session) => session,
            None => {
                audit_miss(req).await;
                return RequestOutcome::Error((Status::Unauthorized, AppError::Unauthorized));
            }
        };

        // Lookup and touch are two independent critical sections; the session
        // may have been invalidated in between, so re-check before trusting it.
        registry.touch(session.id).await;
        match registry.get_session(session.id).await {
            Some(session) => {
                let current_user = CurrentUser {
                    user_id: session.user_id,
                    session_id: session.id,
                };
                req.local_cache(|| Some(current_user.clone()));
                RequestOutcome::Success(current_user)
            }
            None => {
                audit_miss(req).await;
                RequestOutcome::Error((Status::Unauthorized, AppError::Unauthorized))
            }
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for CurrentUser {
    fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
        let security_scheme = SecurityScheme {
            description: Some("Bearer-token authentication. Obtain a token at login; sessions are tracked server-side.".to_string()),
            data: SecuritySchemeData::Http {
                scheme: "bearer".to_string(),
                bearer_format: Some("opaque".to_string()),
            },
            extensions: Object::default(),
        };

        let mut security_req = SecurityRequirement::new();
        security_req.insert("bearerAuth".to_string(), Vec::new());

        Ok(RequestHeaderInput::Security("bearerAuth".to_string(), security_scheme, security_req))
    }

    fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(Response {
                description: "Unauthorized - Authentication required".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use rocket::http::Header;
    use rocket::local::asynchronous::Client;
    use rocket::{get, routes};

    #[test]
    fn parse_bearer_header_valid() {
        assert_eq!(parse_bearer_header("Bearer abc123"), Some("abc123"));
    }

    #[test]
    fn parse_bearer_header_rejects_other_schemes() {
        assert!(parse_bearer_header("Basic abc123").is_none());
        assert!(parse_bearer_header("abc123").is_none());
    }

    #[test]
    fn parse_bearer_header_rejects_empty_token() {
        assert!(parse_bearer_header("Bearer ").is_none());
        assert!(parse_bearer_header("Bearer    ").is_none());
    }

    #[get("/me")]
    async fn me(user: CurrentUser) -> String {
        user.user_id.to_string()
    }

    fn test_rocket(registry: Arc<SessionRegistry>) -> rocket::Rocket<rocket::Build> {
        rocket::build().manage(registry).mount("/", routes![me])
    }

    #[rocket::async_test]
    async fn valid_bearer_token_resolves_the_owning_user() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let user_id = Uuid::new_v4();
        registry.create_session(user_id, "tok-1".to_string(), None, None).await;

        let client = Client::tracked(test_rocket(Arc::clone(&registry))).await.expect("valid rocket instance");
        let response = client.get("/me").header(Header::new("Authorization", "Bearer tok-1")).dispatch().await;

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), user_id.to_string());
    }

    #[rocket::async_test]
    async fn missing_or_unknown_token_yields_unauthorized() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let client = Client::tracked(test_rocket(registry)).await.expect("valid rocket instance");

        let response = client.get("/me").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);

        let response = client.get("/me").header(Header::new("Authorization", "Bearer nope")).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn invalidated_session_no_longer_authenticates() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let session = registry.create_session(Uuid::new_v4(), "tok-1".to_string(), None, None).await;

        let client = Client::tracked(test_rocket(Arc::clone(&registry))).await.expect("valid rocket instance");
        assert_eq!(
            client.get("/me").header(Header::new("Authorization", "Bearer tok-1")).dispatch().await.status(),
            Status::Ok
        );

        registry.invalidate(session.id).await;
        assert_eq!(
            client.get("/me").header(Header::new("Authorization", "Bearer tok-1")).dispatch().await.status(),
            Status::Unauthorized
        );
    }

    #[rocket::async_test]
    async fn successful_request_touches_last_seen() {
        let registry = Arc::new(SessionRegistry::new(SessionConfig::default()));
        let session = registry.create_session(Uuid::new_v4(), "tok-1".to_string(), None, None).await;

        let client = Client::tracked(test_rocket(Arc::clone(&registry))).await.expect("valid rocket instance");
        client.get("/me").header(Header::new("Authorization", "Bearer tok-1")).dispatch().await;

        let touched = registry.get_session(session.id).await.unwrap();
        assert!(touched.last_seen_at >= session.last_seen_at);
    }
}
