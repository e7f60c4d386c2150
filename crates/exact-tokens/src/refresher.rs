//! Request-time token refresh with single-flight
//!
//! Every caller goes through one async mutex for the read-check-refresh-persist
//! sequence. When N requests arrive with a stale token, the first one refreshes
//! and the rest re-read the store after it releases the lock, so upstream sees
//! one refresh and the rotated refresh token is never sent twice.

use std::sync::Arc;
use std::time::Duration;

use exact_auth::{OAuthClient, TokenResponse, TokenSet, TokenStore, now_millis};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};

/// Refresh when the token expires within this window.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Hands out valid access tokens, refreshing through the OAuth client when the
/// stored set is within `margin` of expiry.
pub struct TokenRefresher {
    store: Arc<dyn TokenStore>,
    oauth: OAuthClient,
    margin: Duration,
    refresh_lock: Mutex<()>,
}

impl TokenRefresher {
    pub fn new(store: Arc<dyn TokenStore>, oauth: OAuthClient, margin: Duration) -> Self {
        info!(
            store = store.kind(),
            margin_secs = margin.as_secs(),
            "token refresher initialized"
        );
        Self {
            store,
            oauth,
            margin,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return a valid access token, refreshing it first if needed.
    ///
    /// Fails with `NoTokenAvailable` when no token set was ever stored. A
    /// failed refresh is returned to the caller as-is; nothing is retried.
    #[instrument(skip_all)]
    pub async fn access_token(&self) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        let tokens = self.store.load().await.ok_or(Error::NoTokenAvailable)?;
        let now = now_millis();
        if !tokens.needs_refresh(now, self.margin.as_millis() as u64) {
            return Ok(tokens.access_token);
        }

        debug!(
            expires_at = tokens.expires_at,
            "access token expired or about to expire, refreshing"
        );
        let response = match self.oauth.refresh(&tokens.refresh_token).await {
            Ok(r) => r,
            Err(exact_auth::Error::InvalidCredentials(msg)) => {
                metrics::counter!("portal_token_refreshes_total", "outcome" => "rejected")
                    .increment(1);
                warn!(error = %msg, "refresh token rejected, re-authorization required");
                return Err(Error::RefreshRejected(msg));
            }
            Err(e) => {
                metrics::counter!("portal_token_refreshes_total", "outcome" => "failed")
                    .increment(1);
                warn!(error = %e, "token refresh failed");
                return Err(Error::RefreshFailed(e.to_string()));
            }
        };

        let refreshed = TokenSet::from_response(response, now_millis());
        let access_token = refreshed.access_token.clone();
        if let Err(e) = self.store.save(refreshed).await {
            // The store still holds the new set in memory; only durability is lost
            warn!(store = self.store.kind(), error = %e, "failed to persist refreshed tokens");
        }
        metrics::counter!("portal_token_refreshes_total", "outcome" => "refreshed").increment(1);
        info!("access token refreshed");
        Ok(access_token)
    }

    /// Store a token set obtained from the authorization code flow.
    ///
    /// Takes the refresh lock so an in-flight refresh cannot overwrite the
    /// freshly authorized tokens with ones derived from the old refresh token.
    pub async fn install(&self, response: TokenResponse) -> Result<TokenSet> {
        let _guard = self.refresh_lock.lock().await;
        let tokens = TokenSet::from_response(response, now_millis());
        self.store
            .save(tokens.clone())
            .await
            .map_err(|e| Error::Store(e.to_string()))?;
        info!(expires_at = tokens.expires_at, "installed authorized tokens");
        Ok(tokens)
    }

    /// Current token set without refreshing (health reporting).
    pub async fn current(&self) -> Option<TokenSet> {
        self.store.load().await
    }

    pub fn store_kind(&self) -> &'static str {
        self.store.kind()
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }
}
