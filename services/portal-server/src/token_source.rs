//! Bridges the token refresher into the upstream client

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use exact_client::{TokenError, TokenSource};
use exact_tokens::TokenRefresher;

/// `TokenSource` backed by the process-wide refresher.
pub struct RefresherTokenSource(pub Arc<TokenRefresher>);

impl TokenSource for RefresherTokenSource {
    fn access_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<String, TokenError>> + Send + '_>> {
        Box::pin(async move {
            self.0.access_token().await.map_err(|e| match e {
                exact_tokens::Error::NoTokenAvailable => TokenError::Unavailable,
                other => TokenError::Failed(other.to_string()),
            })
        })
    }
}
