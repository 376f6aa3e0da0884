pub mod audit;
pub mod auth;
pub mod catchers;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod store;

pub use auth::CurrentUser;
pub use config::Config;
pub use middleware::csrf::{CsrfProtected, CsrfToken};
pub use middleware::rate_limit::RateLimit;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::store::csrf::CsrfTokenStore;
use crate::store::rate_limit::RateLimiter;
use crate::store::session::SessionRegistry;
use rocket::fairing::AdHoc;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG can be used for fine-grained control per module, e.g.
    //   RUST_LOG=authgate::store=debug
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    if json_format {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Construct the three stores and the audit sink once at ignite, spawn their
/// background sweeps, and hand them to the request pipeline via managed
/// state. The stores never call into each other; the guards invoke them in
/// order: rate limit, then CSRF, then session lookup.
pub fn stage_security(config: Config) -> AdHoc {
    stage_security_with_sink(config, Arc::new(TracingAuditSink))
}

/// Same as [`stage_security`] but with a caller-supplied audit sink.
pub fn stage_security_with_sink(config: Config, sink: Arc<dyn AuditSink>) -> AdHoc {
    AdHoc::on_ignite("Security Core", move |rocket| {
        let registry = Arc::new(SessionRegistry::new(config.session.clone()));
        registry.clone().spawn_reaper_task();

        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        limiter.clone().spawn_cleanup_task();

        let csrf = Arc::new(CsrfTokenStore::new(config.csrf.clone()));

        Box::pin(async move { rocket.manage(registry).manage(limiter).manage(csrf).manage(sink) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::csrf::CSRF_HEADER;
    use crate::middleware::{ClientIp, RequestLogger, UserAgent};
    use rocket::State;
    use rocket::http::{Header, Status};
    use rocket::local::asynchronous::Client;
    use rocket::{catchers, get, post, routes};
    use std::net::SocketAddr;
    use uuid::Uuid;

    // Guard order is the pipeline order: rate limit, CSRF, session lookup.
    #[post("/protected")]
    async fn protected(_rate_limit: RateLimit, _csrf: CsrfProtected, user: CurrentUser) -> String {
        user.user_id.to_string()
    }

    #[get("/csrf")]
    async fn csrf_token(token: CsrfToken) -> String {
        token.0
    }

    // Stand-in for a host application's login handler: credentials are
    // checked elsewhere, the registry only records the resulting session.
    #[post("/session", data = "<user_id>")]
    async fn open_session(
        registry: &State<Arc<SessionRegistry>>,
        ip: ClientIp,
        agent: UserAgent,
        user_id: String,
    ) -> String {
        let user_id = Uuid::parse_str(&user_id).expect("test user id");
        let token = Uuid::new_v4().to_string();
        registry.create_session(user_id, token.clone(), ip.0, agent.0).await;
        token
    }

    fn remote() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    async fn pipeline_client(rate_limit: u32) -> Client {
        let config = Config {
            rate_limit: config::RateLimitConfig {
                limit: rate_limit,
                window_seconds: 60,
                cleanup_interval_seconds: 300,
            },
            ..Config::default()
        };

        let rocket = rocket::build()
            .attach(stage_security(config))
            .attach(RequestLogger)
            .mount("/", routes![protected, csrf_token, open_session])
            .register(
                "/",
                catchers![catchers::unauthorized, catchers::forbidden, catchers::too_many_requests],
            );

        Client::tracked(rocket).await.expect("valid rocket instance")
    }

    async fn login(client: &Client, token: &str) -> Uuid {
        let registry = client.rocket().state::<Arc<SessionRegistry>>().expect("staged registry");
        let user_id = Uuid::new_v4();
        registry
            .create_session(user_id, token.to_string(), Some("127.0.0.1".to_string()), None)
            .await;
        user_id
    }

    #[rocket::async_test]
    async fn login_route_captures_client_metadata() {
        let client = pipeline_client(100).await;
        let user_id = Uuid::new_v4();

        let token = client
            .post("/session")
            .remote(remote())
            .header(Header::new("User-Agent", "authgate-tests/1.0"))
            .body(user_id.to_string())
            .dispatch()
            .await
            .into_string()
            .await
            .unwrap();

        let registry = client.rocket().state::<Arc<SessionRegistry>>().unwrap();
        let session = registry.get_session_by_token(&token).await.unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.ip_address.as_deref(), Some("127.0.0.1"));
        assert_eq!(session.user_agent.as_deref(), Some("authgate-tests/1.0"));
    }

    #[rocket::async_test]
    async fn full_pipeline_admits_a_well_formed_request() {
        let client = pipeline_client(100).await;
        let user_id = login(&client, "tok-1").await;

        let csrf = client.get("/csrf").remote(remote()).dispatch().await.into_string().await.unwrap();
        let response = client
            .post("/protected")
            .remote(remote())
            .header(Header::new(CSRF_HEADER, csrf))
            .header(Header::new("Authorization", "Bearer tok-1"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), user_id.to_string());
    }

    #[rocket::async_test]
    async fn csrf_check_runs_before_session_lookup() {
        let client = pipeline_client(100).await;
        login(&client, "tok-1").await;

        // Valid bearer token but no CSRF header: rejected with 403, not 401.
        let response = client
            .post("/protected")
            .remote(remote())
            .header(Header::new("Authorization", "Bearer tok-1"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn authenticated_request_without_session_is_unauthorized() {
        let client = pipeline_client(100).await;

        let csrf = client.get("/csrf").remote(remote()).dispatch().await.into_string().await.unwrap();
        let response = client
            .post("/protected")
            .remote(remote())
            .header(Header::new(CSRF_HEADER, csrf))
            .header(Header::new("Authorization", "Bearer unknown"))
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn rate_limit_rejects_before_everything_else() {
        let client = pipeline_client(1).await;
        login(&client, "tok-1").await;

        // The CSRF issuance route is not rate limited; spend the budget on
        // the protected route.
        let csrf = client.get("/csrf").remote(remote()).dispatch().await.into_string().await.unwrap();
        let first = client
            .post("/protected")
            .remote(remote())
            .header(Header::new(CSRF_HEADER, csrf.clone()))
            .header(Header::new("Authorization", "Bearer tok-1"))
            .dispatch()
            .await;
        assert_eq!(first.status(), Status::Ok);

        let second = client
            .post("/protected")
            .remote(remote())
            .header(Header::new(CSRF_HEADER, csrf))
            .header(Header::new("Authorization", "Bearer tok-1"))
            .dispatch()
            .await;
        assert_eq!(second.status(), Status::TooManyRequests);
        assert!(second.headers().get_one("Retry-After").is_some());
    }
}
