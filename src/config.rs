//! Configuration types for bundle-mirror
//!
//! The configuration file is TOML. Missing keys fall back to defaults, unknown
//! keys are ignored so that files written by older releases keep loading.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Template written on first run when no configuration file exists
pub const CONFIG_TEMPLATE: &str = r#"# bundle-mirror configuration

# Value of the `_simpleauth_sess` cookie from a logged-in browser session.
session_cookie = ""

# Where purchased files are mirrored.
download_dir = "downloads"

# Where downloaded.json / orphaned.json / not-downloaded.json are kept.
state_dir = "."

# Where files that vanished from the catalog are moved.
# Defaults to "<download_dir>/orphaned".
# orphan_dir = "downloads/orphaned"

# Parallel workers for metadata and file transfers.
download_limit = 6

# Only consider the N newest purchases, 0 for all.
purchase_limit = 0

# Fetch smallest files first.
smallest_first = false

[http]
connect_timeout = 15
request_timeout = 60
idle_timeout = 60

[retry]
max_attempts = 3
initial_delay = 1
max_delay = 30
backoff_multiplier = 2.0
jitter = true
"#;

/// Main configuration for a mirror run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Session cookie sent to the catalog API
    #[serde(default)]
    pub session_cookie: String,

    /// Catalog API origin
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Download directory (default: "downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Directory holding the persisted record files (default: ".")
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Orphan storage root (default: "<download_dir>/orphaned")
    #[serde(default)]
    pub orphan_dir: Option<PathBuf>,

    /// Maximum parallel workers per phase (default: 6)
    #[serde(default = "default_download_limit")]
    pub download_limit: usize,

    /// Number of most recent purchases to consider, 0 for all (default: 0)
    #[serde(default)]
    pub purchase_limit: usize,

    /// Fetch smallest files first instead of largest first
    #[serde(default)]
    pub smallest_first: bool,

    /// HTTP timeouts
    #[serde(default)]
    pub http: HttpConfig,

    /// Retry policy for transient network failures
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_cookie: String::new(),
            api_base_url: default_api_base_url(),
            download_dir: default_download_dir(),
            state_dir: default_state_dir(),
            orphan_dir: None,
            download_limit: default_download_limit(),
            purchase_limit: 0,
            smallest_first: false,
            http: HttpConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })
    }

    /// Load the configuration at `path`, writing the template if it does not exist.
    ///
    /// A freshly created file always yields an error: the template has no
    /// session cookie, and the user has to fill it in before the first run.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let config = Self::from_toml(&text)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, CONFIG_TEMPLATE)?;
                tracing::warn!(path = %path.display(), "No config file found, wrote default");
                Err(Error::config(
                    "session_cookie",
                    format!("created {}, set session_cookie and run again", path.display()),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check invariants the rest of the crate relies on
    pub fn validate(&self) -> Result<()> {
        if self.session_cookie.trim().is_empty() {
            return Err(Error::config("session_cookie", "no valid session cookie"));
        }
        if url::Url::parse(&self.api_base_url).is_err() {
            return Err(Error::config("api_base_url", "not a valid URL"));
        }
        if self.download_limit == 0 {
            return Err(Error::config("download_limit", "must be at least 1"));
        }
        Ok(())
    }

    /// Root directory orphaned files are moved into
    pub fn orphan_dir(&self) -> PathBuf {
        self.orphan_dir
            .clone()
            .unwrap_or_else(|| self.download_dir.join("orphaned"))
    }
}

/// HTTP client timeouts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// TCP/TLS connect timeout (default: 15 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Whole-request timeout for catalog API calls (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum gap between two chunks of a file transfer (default: 60 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,

    /// User-Agent header override
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            idle_timeout: default_idle_timeout(),
            user_agent: None,
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

fn default_api_base_url() -> String {
    "https://www.humblebundle.com".to_string()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_download_limit() -> usize {
    6
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
