use crate::middleware::rate_limit::RateLimitRetryAfter;
use rocket::http::{ContentType, Header, Status};
use rocket::response::Responder;
use rocket::serde::Serialize;
use rocket::serde::json::Json;
use rocket::{Request, Response, catch};
use std::io::Cursor;

#[derive(Serialize)]
#[serde(crate = "rocket::serde")]
pub struct Error {
    pub message: String,
}

#[catch(401)]
pub fn unauthorized(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Unauthorized".to_string(),
    })
}

#[catch(403)]
pub fn forbidden(_: &Request) -> Json<Error> {
    Json(Error {
        message: "Forbidden".to_string(),
    })
}

/// 429 body plus the retry hint the rate-limit guard stashed in local_cache.
pub struct TooManyRequests {
    retry_after_secs: u64,
}

impl<'r> Responder<'r, 'static> for TooManyRequests {
    fn respond_to(self, _req: &Request<'_>) -> rocket::response::Result<'static> {
        let body = serde_json::json!({ "message": "Too many requests" }).to_string();
        Response::build()
            .status(Status::TooManyRequests)
            .header(ContentType::JSON)
            .header(Header::new("Retry-After", self.retry_after_secs.to_string()))
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

#[catch(429)]
pub fn too_many_requests(req: &Request) -> TooManyRequests {
    let retry_after_secs = req
        .local_cache(|| None::<RateLimitRetryAfter>)
        .as_ref()
        .map(|hint| hint.0)
        .unwrap_or(1);

    TooManyRequests { retry_after_secs }
}
