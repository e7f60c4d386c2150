//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Exact client secret and the session signing key come from the
//! environment only (`CLIENT_SECRET`, `JWT_SECRET`), never from the TOML.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub exact: ExactConfig,
    #[serde(default)]
    pub tokens: TokenConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub login: LoginConfig,
    #[serde(default)]
    pub products: ProductsConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Browser origins allowed by CORS
    pub allowed_origins: Vec<String>,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            allowed_origins: [
                "http://localhost:3000",
                "http://www.feitengacp.eu",
                "https://www.feitengacp.eu",
                "http://feitengacp.eu",
                "https://feitengacp.eu",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_connections: 1000,
        }
    }
}

/// Exact Online app registration and division
#[derive(Debug, Deserialize)]
pub struct ExactConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Administration id embedded in every API path
    pub division: u64,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub redirect_uri: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Refresh the access token when it expires within this many seconds
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

/// Where the upstream token set lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    /// JSON file on local disk
    File,
    /// In memory, seeded from an environment variable
    Env,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    pub backend: TokenBackend,
    pub path: PathBuf,
    pub env_var: String,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            backend: TokenBackend::File,
            path: PathBuf::from("tokens.json"),
            env_var: "EXACT_TOKENS".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    #[serde(skip)]
    pub jwt_secret: Option<Secret<String>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            jwt_secret: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoginConfig {
    /// Contact field compared against the submitted password
    pub secret_field: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            secret_field: "SocialSecurityNumber".into(),
        }
    }
}

/// Stock position filtering and optional enrichment
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProductsConfig {
    /// Codes containing this (case-insensitive) belong to an internal family
    pub marker: String,
    pub excluded_prefixes: Vec<String>,
    /// Codes with these prefixes are kept only while stock is expected
    pub conditional_prefixes: Vec<String>,
    pub enrich: bool,
    pub enrich_stagger_ms: u64,
}

impl Default for ProductsConfig {
    fn default() -> Self {
        Self {
            marker: "EBRI".into(),
            excluded_prefixes: [
                "20", "21", "22", "30", "317", "32", "33", "35", "60", "61", "615", "62", "63",
                "645", "65", "66", "71", "777", "97", "98", "981", "982", "230",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            conditional_prefixes: vec!["9".into()],
            enrich: false,
            enrich_stagger_ms: 100,
        }
    }
}

fn default_base_url() -> String {
    exact_auth::DEFAULT_BASE_URL.to_string()
}

fn default_refresh_margin() -> u64 {
    exact_tokens::DEFAULT_REFRESH_MARGIN.as_secs()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Environment overlay:
    /// - `CLIENT_ID`, `REDIRECT_URI` replace the file values when set
    /// - `PORT` replaces the listen port
    /// - `CLIENT_SECRET`, `JWT_SECRET` are required
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Some(id) = env_value("CLIENT_ID") {
            config.exact.client_id = id;
        }
        if let Some(uri) = env_value("REDIRECT_URI") {
            config.exact.redirect_uri = uri;
        }
        if let Some(port) = env_value("PORT") {
            let port: u16 = port
                .parse()
                .map_err(|_| common::Error::Config(format!("PORT is not a port number: {port}")))?;
            config.server.listen_addr.set_port(port);
        }

        config.exact.client_secret = Some(
            Secret::from_env("CLIENT_SECRET")
                .ok_or_else(|| common::Error::MissingEnv("CLIENT_SECRET".into()))?,
        );
        config.session.jwt_secret = Some(
            Secret::from_env("JWT_SECRET")
                .ok_or_else(|| common::Error::MissingEnv("JWT_SECRET".into()))?,
        );

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let base_url = &self.exact.base_url;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(common::Error::Config(format!(
                "exact.base_url must start with http:// or https://, got: {}",
                self.exact.base_url
            )));
        }
        if self.exact.division == 0 {
            return Err(common::Error::Config(
                "exact.division must be greater than 0".into(),
            ));
        }
        if self.exact.client_id.trim().is_empty() {
            return Err(common::Error::Config(
                "exact.client_id is empty (set it in the file or CLIENT_ID)".into(),
            ));
        }
        if self.exact.redirect_uri.trim().is_empty() {
            return Err(common::Error::Config(
                "exact.redirect_uri is empty (set it in the file or REDIRECT_URI)".into(),
            ));
        }
        if self.session.ttl_secs == 0 {
            return Err(common::Error::Config(
                "session.ttl_secs must be greater than 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(common::Error::Config(
                "server.max_connections must be greater than 0".into(),
            ));
        }
        if self.login.secret_field.trim().is_empty() {
            return Err(common::Error::Config("login.secret_field is empty".into()));
        }
        let prefixes = self
            .products
            .excluded_prefixes
            .iter()
            .chain(&self.products.conditional_prefixes);
        if prefixes.into_iter().any(|p| p.is_empty()) {
            return Err(common::Error::Config(
                "product prefixes must not be empty strings".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("portal-server.toml")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
