use std::sync::LazyLock;

use config::Config;
use serde::Deserialize;

/// CareTask's application configuration. Parsed once from environment
/// variables with the `CARETASK__` prefix, `__` separator.
#[derive(Debug, Deserialize)]
#[allow(unused)]
pub struct AppConfig {
    /// Path to the SQLite storage file, or `:memory:` for an in-process-only
    /// store.
    /// Default is `caretask.scheduler.storage.sqlite`.
    /// Env var: CARETASK__STORAGE_PATH
    pub storage_path: String,

    /// The per-pass notification request ceiling this scheduler claims for
    /// itself, leaving the remainder of the OS-wide limit for other apps.
    /// Default is 64.
    /// Env var: CARETASK__NOTIFICATION_LIMIT
    pub notification_limit: u32,

    /// How many days ahead of "now" the notification planner looks for
    /// candidate tasks.
    /// Default is 14.
    /// Env var: CARETASK__SCHEDULING_INTERVAL_DAYS
    pub scheduling_interval_days: i64,

    /// Namespace prefix used to build notification identifiers and thread
    /// identifiers.
    /// Default is "com.caretask.scheduler".
    /// Env var: CARETASK__REVERSE_DNS_PREFIX
    pub reverse_dns_prefix: String,

    /// Whether the reconciler should request provisional notification
    /// authorization automatically when the OS reports `notDetermined`.
    /// Default is false.
    /// Env var: CARETASK__AUTOMATICALLY_REQUEST_PROVISIONAL
    pub automatically_request_provisional: bool,
}

fn parse_config() -> AppConfig {
    #[allow(clippy::expect_used)]
    let config = Config::builder()
        .add_source(config::Environment::with_prefix("CARETASK").try_parsing(true).separator("__"))
        .set_default("storage_path", "caretask.scheduler.storage.sqlite")
        .expect("failed to set default storage_path")
        .set_default("notification_limit", 64)
        .expect("failed to set default notification_limit")
        .set_default("scheduling_interval_days", 14)
        .expect("failed to set default scheduling_interval_days")
        .set_default("reverse_dns_prefix", "com.caretask.scheduler")
        .expect("failed to set default reverse_dns_prefix")
        .set_default("automatically_request_provisional", false)
        .expect("failed to set default automatically_request_provisional")
        .build()
        .expect("failed to build the configuration object");

    #[allow(clippy::expect_used)]
    config.try_deserialize().expect("failed to deserialize the configuration object")
}

pub static APP_CONFIG: LazyLock<AppConfig> = LazyLock::new(parse_config);
