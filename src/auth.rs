//! Authenticator port (spec §4.7): token verification is delegated to an
//! injected implementation; this crate only ships reference doubles for
//! tests.

use std::collections::HashSet;

use async_trait::async_trait;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Validates a bearer token. May suspend (spec §5).
    async fn authenticate_from_token(&self, token: &str) -> bool;
}

/// Accepts any non-empty token. Useful for tests/demos that don't exercise
/// auth failure paths.
#[derive(Default)]
pub struct AllowAllAuthenticator;

#[async_trait]
impl Authenticator for AllowAllAuthenticator {
    async fn authenticate_from_token(&self, token: &str) -> bool {
        !token.is_empty()
    }
}

/// Accepts only tokens from a fixed allow-list, for tests exercising the
/// auth-rejected path.
pub struct TokenListAuthenticator {
    allowed: HashSet<String>,
}

impl TokenListAuthenticator {
    pub fn new(allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        TokenListAuthenticator {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Authenticator for TokenListAuthenticator {
    async fn authenticate_from_token(&self, token: &str) -> bool {
        self.allowed.contains(token)
    }
}
