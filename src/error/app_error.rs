use rocket::http::{Header, Status};
use rocket::response::Responder;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use std::io::Cursor;
use thiserror::Error;
use tracing::warn;

/// The taxonomy is deliberately narrow: lookups surface as `Option`, rate
/// limit and CSRF rejections are expected outcomes, and configuration
/// failure is the only error that propagates.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("CSRF token missing or invalid")]
    CsrfRejected,
    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },
    #[error("Internal server error")]
    ConfigurationError {
        message: String,
        #[source]
        source: figment::Error,
    },
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::Unauthorized => Status::Unauthorized,
            AppError::CsrfRejected => Status::Forbidden,
            AppError::RateLimited { .. } => Status::TooManyRequests,
            AppError::ConfigurationError { .. } => Status::InternalServerError,
        }
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::ConfigurationError {
            message: "Failed to read configuration".to_string(),
            source: e,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        // Try to get request_id from local_cache
        let request_id = req
            .local_cache(|| None::<crate::middleware::RequestId>)
            .as_ref()
            .map(|r| r.0.as_str())
            .unwrap_or("unknown");

        warn!(
            error = ?self,
            request_id = %request_id,
            method = %method,
            uri = %uri,
            "request rejected"
        );

        let status = Status::from(&self);
        let body = self.to_string();

        let mut builder = Response::build();
        builder.status(status).sized_body(body.len(), Cursor::new(body));

        if let AppError::RateLimited { retry_after_secs } = self {
            builder.header(Header::new("Retry-After", retry_after_secs.to_string()));
        }

        builder.ok()
    }
}

impl OpenApiResponderInner for AppError {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        responses.responses.insert(
            "401".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Unauthorized".to_string(),
                ..Default::default()
            }),
        );
        responses.responses.insert(
            "403".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Forbidden".to_string(),
                ..Default::default()
            }),
        );
        responses.responses.insert(
            "429".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Too Many Requests".to_string(),
                ..Default::default()
            }),
        );
        responses.responses.insert(
            "500".to_string(),
            RefOr::Object(OpenApiResponse {
                description: "Internal Server Error".to_string(),
                ..Default::default()
            }),
        );
        Ok(responses)
    }
}
