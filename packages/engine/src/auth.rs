//! Access token seam. Acquiring and refreshing tokens happens elsewhere; the
//! engine only asks for the current one before each remote call.

use std::future::Future;

pub trait TokenProvider {
    /// Current access token, or `None` for anonymous access.
    fn access_token(&self) -> impl Future<Output = Option<String>>;
}

/// A fixed token (or none) handed in at startup.
#[derive(Clone, Debug, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        self.0.clone()
    }
}
