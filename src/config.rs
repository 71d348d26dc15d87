use std::time::Duration;

use crate::Variant;

/// Configuration for [`ExperimentClient`](crate::ExperimentClient).
///
/// ```
/// # use std::time::Duration;
/// # use skylab::{ExperimentConfig, Variant};
/// let config = ExperimentConfig::new()
///     .with_instance_name("Checkout")
///     .with_poll_interval(Duration::from_secs(60))
///     .with_fallback_variant(Variant::new("control"));
/// assert_eq!(config.instance_name(), "checkout");
/// ```
// Not implementing `Copy` as we may add non-copyable fields in the future.
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub(crate) instance_name: String,
    pub(crate) server_url: String,
    pub(crate) poll_interval: Duration,
    pub(crate) fetch_timeout: Duration,
    pub(crate) fallback_variant: Variant,
}

impl ExperimentConfig {
    /// Name of the default instance.
    pub const DEFAULT_INSTANCE_NAME: &'static str = "";
    /// Default server URL for API calls.
    pub const DEFAULT_SERVER_URL: &'static str = "https://api.lab.amplitude.com/";
    /// Default interval between polls.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);
    /// Default timeout of a single fetch request.
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a configuration with default settings.
    pub fn new() -> ExperimentConfig {
        ExperimentConfig::default()
    }

    /// Set the instance name. Names are case-insensitive.
    pub fn with_instance_name(mut self, instance_name: impl AsRef<str>) -> ExperimentConfig {
        self.instance_name = normalize_instance_name(instance_name.as_ref());
        self
    }

    /// Override the server URL. Clients should use the default setting in most cases.
    pub fn with_server_url(mut self, server_url: impl Into<String>) -> ExperimentConfig {
        self.server_url = server_url.into();
        self
    }

    /// Set the interval between polls started with
    /// [`ExperimentClient::start_polling`](crate::ExperimentClient::start_polling).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> ExperimentConfig {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the timeout of a single fetch request.
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> ExperimentConfig {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Set the variant returned by
    /// [`ExperimentClient::get_variant`](crate::ExperimentClient::get_variant) for flags without
    /// an assignment.
    pub fn with_fallback_variant(mut self, fallback_variant: Variant) -> ExperimentConfig {
        self.fallback_variant = fallback_variant;
        self
    }

    /// Normalized instance name.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// Server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Fetch timeout.
    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    /// Fallback variant.
    pub fn fallback_variant(&self) -> &Variant {
        &self.fallback_variant
    }
}

impl Default for ExperimentConfig {
    fn default() -> ExperimentConfig {
        ExperimentConfig {
            instance_name: ExperimentConfig::DEFAULT_INSTANCE_NAME.to_owned(),
            server_url: ExperimentConfig::DEFAULT_SERVER_URL.to_owned(),
            poll_interval: ExperimentConfig::DEFAULT_POLL_INTERVAL,
            fetch_timeout: ExperimentConfig::DEFAULT_FETCH_TIMEOUT,
            fallback_variant: Variant::empty(),
        }
    }
}

/// Instance names are case-insensitive. The empty name is the default instance.
pub(crate) fn normalize_instance_name(name: &str) -> String {
    name.to_lowercase()
}
