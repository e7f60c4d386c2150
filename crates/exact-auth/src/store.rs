//! Token storage for the process-wide `TokenSet`
//!
//! Two backends share one contract:
//! - `FileTokenStore` keeps a JSON file next to the server (atomic writes, 0600)
//! - `MemoryTokenStore` lives in memory, optionally seeded from an env var,
//!   for hosts without a writable disk
//!
//! Both hold the current value in memory; `load` never touches the disk.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// OAuth credentials for the upstream API.
///
/// `expires_at` is a unix timestamp in milliseconds (absolute, not a delta).
/// A stored set without it deserializes to `0`, which is always stale.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl TokenSet {
    /// Convert a token endpoint response received at `now_millis`.
    pub fn from_response(response: TokenResponse, now_millis: u64) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at: now_millis.saturating_add(response.expires_in.saturating_mul(1000)),
            token_type: response.token_type,
        }
    }

    /// Whether the access token expires before `now_millis + margin_millis`.
    pub fn needs_refresh(&self, now_millis: u64, margin_millis: u64) -> bool {
        self.expires_at < now_millis.saturating_add(margin_millis)
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Backing store for the single `TokenSet`.
///
/// Uses `Pin<Box<dyn Future>>` return types so the store can be shared as
/// `Arc<dyn TokenStore>`.
pub trait TokenStore: Send + Sync {
    /// Backend name for logging and the health endpoint
    fn kind(&self) -> &'static str;

    /// Current token set, if one was ever issued.
    fn load(&self) -> Pin<Box<dyn Future<Output = Option<TokenSet>> + Send + '_>>;

    /// Replace the token set.
    fn save(&self, tokens: TokenSet) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// JSON file store.
///
/// The file is read once at startup. Saves replace the in-memory copy before
/// writing, so a rotated refresh token survives a failed disk write for as
/// long as the process runs.
pub struct FileTokenStore {
    path: PathBuf,
    state: RwLock<Option<TokenSet>>,
}

impl FileTokenStore {
    /// Open the store at `path`.
    ///
    /// A missing or unparsable file is not an error: the server starts without
    /// tokens and waits for the operator to authorize via `/oauth/authorize`.
    pub async fn open(path: PathBuf) -> Self {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<TokenSet>(&contents) {
                Ok(tokens) => {
                    info!(path = %path.display(), expires_at = tokens.expires_at, "loaded tokens");
                    Some(tokens)
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "token file unreadable, authorization required"
                    );
                    None
                }
            },
            Err(e) => {
                info!(
                    path = %path.display(),
                    error = %e,
                    "no token file yet, authorization required"
                );
                None
            }
        };

        Self {
            path,
            state: RwLock::new(state),
        }
    }
}

impl TokenStore for FileTokenStore {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Option<TokenSet>> + Send + '_>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn save(&self, tokens: TokenSet) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let result = write_atomic(&self.path, &tokens).await;
            *state = Some(tokens);
            result
        })
    }
}

/// Write the token set to a file atomically.
///
/// Writes a temp file in the same directory, then renames it over the target.
/// Permissions are 0600 on unix since the file holds live credentials.
async fn write_atomic(path: &Path, tokens: &TokenSet) -> Result<()> {
    let json = serde_json::to_string_pretty(tokens)
        .map_err(|e| Error::TokenParse(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token path has no parent directory".into()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("tokens.json");
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}

/// In-memory store. Refreshed tokens live only as long as the process.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: RwLock<Option<TokenSet>>,
}

impl MemoryTokenStore {
    pub fn new(initial: Option<TokenSet>) -> Self {
        Self {
            state: RwLock::new(initial),
        }
    }

    /// Seed from a JSON `TokenSet` held in environment variable `key`.
    ///
    /// An unset or empty variable yields an empty store; malformed JSON is an
    /// error so a bad deploy fails at startup instead of at first login.
    pub fn from_env(key: &str) -> Result<Self> {
        let raw = std::env::var(key).unwrap_or_default();
        if raw.trim().is_empty() {
            info!(env = key, "no seeded tokens, authorization required");
            return Ok(Self::default());
        }
        let tokens: TokenSet = serde_json::from_str(&raw)
            .map_err(|e| Error::TokenParse(format!("parsing {key}: {e}")))?;
        info!(env = key, expires_at = tokens.expires_at, "seeded tokens from environment");
        Ok(Self::new(Some(tokens)))
    }
}

impl TokenStore for MemoryTokenStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn load(&self) -> Pin<Box<dyn Future<Output = Option<TokenSet>> + Send + '_>> {
        Box::pin(async move { self.state.read().await.clone() })
    }

    fn save(&self, tokens: TokenSet) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            *self.state.write().await = Some(tokens);
            debug!("replaced in-memory tokens");
            Ok(())
        })
    }
}
