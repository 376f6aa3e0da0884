use std::collections::HashMap;

use crate::config::CsrfConfig;
use rand::distr::{Alphanumeric, SampleString};
use tokio::sync::Mutex;
use tracing::debug;

const TOKEN_LENGTH: usize = 32;

/// Per-client anti-forgery tokens, last-issued-wins.
///
/// When `dev_loopback_aliasing` is enabled, the configured loopback aliases
/// (`127.0.0.1`, `::1`, `localhost` by default) share one logical entry: a
/// token issued under any alias validates under all of them. This exists so
/// a same-machine browser can load a form via `localhost` and submit it via
/// `127.0.0.1`; it is a deliberate development relaxation, not a general
/// security policy, and should be switched off in production.
#[derive(Debug)]
pub struct CsrfTokenStore {
    config: CsrfConfig,
    tokens: Mutex<HashMap<String, String>>,
}

impl CsrfTokenStore {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            config,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn is_loopback_alias(&self, client_id: &str) -> bool {
        self.config.dev_loopback_aliasing && self.config.loopback_aliases.iter().any(|alias| alias == client_id)
    }

    /// Issue a fresh token for `client_id`, superseding any prior one. For a
    /// loopback alias the token is written under every alias in the set.
    pub async fn issue_token(&self, client_id: &str) -> String {
        let token = Alphanumeric.sample_string(&mut rand::rng(), TOKEN_LENGTH);

        let mut tokens = self.tokens.lock().await;
        if self.is_loopback_alias(client_id) {
            for alias in &self.config.loopback_aliases {
                tokens.insert(alias.clone(), token.clone());
            }
        } else {
            tokens.insert(client_id.to_string(), token.clone());
        }

        debug!(client_id = %client_id, "csrf token issued");
        token
    }

    /// True iff `presented` matches the token currently stored for
    /// `client_id` (or, for a loopback alias, for any alias in the set).
    /// No stored token fails closed.
    pub async fn validate_token(&self, client_id: &str, presented: &str) -> bool {
        let tokens = self.tokens.lock().await;

        if self.is_loopback_alias(client_id) {
            return self
                .config
                .loopback_aliases
                .iter()
                .filter_map(|alias| tokens.get(alias))
                .any(|stored| constant_time_eq(stored.as_bytes(), presented.as_bytes()));
        }

        tokens
            .get(client_id)
            .is_some_and(|stored| constant_time_eq(stored.as_bytes(), presented.as_bytes()))
    }

    /// Drop the stored token for `client_id` (all aliases for a loopback
    /// client), typically on logout.
    pub async fn revoke_token(&self, client_id: &str) {
        let mut tokens = self.tokens.lock().await;
        if self.is_loopback_alias(client_id) {
            for alias in &self.config.loopback_aliases {
                tokens.remove(alias);
            }
        } else {
            tokens.remove(client_id);
        }
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
