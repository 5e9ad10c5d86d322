//! Engine configuration types.

use serde::{Deserialize, Serialize};

/// Global engine configuration, loaded from `{data_dir}/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Database URL override. When absent, the store derives a default
    /// from the data directory.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Fallback per-attempt timeout, as a duration string (e.g.
    /// "5 minutes"). The runner threads this into its step executors;
    /// it applies to every step that doesn't set its own timeout.
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout: String,

    /// How long a SQLite connection waits on a locked database before
    /// giving up, in seconds.
    #[serde(default = "default_busy_timeout_secs")]
    pub sqlite_busy_timeout_secs: u64,

    /// Upper bound on concurrent SQLite reader connections.
    #[serde(default = "default_max_readers")]
    pub sqlite_max_readers: u32,
}

fn default_step_timeout() -> String {
    "5 minutes".to_string()
}

fn default_busy_timeout_secs() -> u64 {
    5
}

fn default_max_readers() -> u32 {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            default_step_timeout: default_step_timeout(),
            sqlite_busy_timeout_secs: default_busy_timeout_secs(),
            sqlite_max_readers: default_max_readers(),
        }
    }
}
