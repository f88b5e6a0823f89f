//! Device abstraction: identity, reachability and cached command collection.
//!
//! Implementations provide the transport (`refresh`, `collect_raw`); the
//! trait's provided methods add the parts every device shares: reachability
//! memoization and single-flight command caching over a [`DeviceBase`].

use std::collections::HashSet;
use std::sync::{LazyLock, RwLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error, warn};

use netcheck_eapi::{EapiClient, EapiConfig, EapiError, RawCommand, ResponseFormat, Version};

use crate::cache::{CacheStatistics, CommandCache};
use crate::command::{Command, CommandFailure, CommandOutcome};

/// Outcome of a transport-level probe.
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// The device address is reachable and the service port is open.
    pub is_online: bool,
    /// Hardware model reported by the device, when obtainable.
    pub hw_model: Option<String>,
}

impl ProbeReport {
    /// A device is established once it is online and identified itself.
    pub fn established(&self) -> bool {
        self.is_online && self.hw_model.as_deref().is_some_and(|model| !model.is_empty())
    }
}

/// State shared by every device implementation.
#[derive(Debug)]
pub struct DeviceBase {
    name: String,
    tags: HashSet<String>,
    hw_model: RwLock<Option<String>>,
    established: tokio::sync::OnceCell<bool>,
    cache: Option<CommandCache>,
}

impl DeviceBase {
    /// Creates the shared state with caching enabled.
    ///
    /// A device always carries its own name as a tag, so single-device tag
    /// selection needs no special casing.
    pub fn new(name: impl Into<String>, tags: HashSet<String>) -> Self {
        Self::build(name, tags, true)
    }

    /// Creates the shared state with command caching disabled.
    pub fn without_cache(name: impl Into<String>, tags: HashSet<String>) -> Self {
        Self::build(name, tags, false)
    }

    fn build(name: impl Into<String>, mut tags: HashSet<String>, cache: bool) -> Self {
        let name = name.into();
        tags.insert(name.clone());
        Self {
            name,
            tags,
            hw_model: RwLock::new(None),
            established: tokio::sync::OnceCell::new(),
            cache: cache.then(CommandCache::new),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }

    pub fn hw_model(&self) -> Option<String> {
        self.hw_model.read().expect("hw_model lock poisoned").clone()
    }

    pub(crate) fn set_hw_model(&self, model: Option<String>) {
        *self.hw_model.write().expect("hw_model lock poisoned") = model;
    }

    pub fn cache(&self) -> Option<&CommandCache> {
        self.cache.as_ref()
    }
}

/// One managed network endpoint under verification.
///
/// `refresh` and `collect_raw` are the transport seam; everything else is
/// provided. Devices are shared across concurrently running checks, so the
/// trait is object-safe and all state lives behind [`DeviceBase`].
#[async_trait]
pub trait Device: Send + Sync {
    fn base(&self) -> &DeviceBase;

    /// Transport-level probe: reachability plus hardware identity.
    async fn refresh(&self) -> ProbeReport;

    /// Collects one command from the device, bypassing the cache.
    async fn collect_raw(&self, command: &Command, collection_id: Option<&str>) -> CommandOutcome;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn tags(&self) -> &HashSet<String> {
        self.base().tags()
    }

    fn hw_model(&self) -> Option<String> {
        self.base().hw_model()
    }

    /// Hardware series derived from the model, for family-based filtering.
    fn hw_series(&self) -> Option<String> {
        self.hw_model().as_deref().and_then(derive_hw_series)
    }

    /// Probes the device once and memoizes the outcome for the run.
    ///
    /// The first caller performs the probe; every later caller gets the
    /// memoized answer without touching the network.
    async fn ensure_established(&self) -> bool {
        *self
            .base()
            .established
            .get_or_init(|| async {
                let report = self.refresh().await;
                self.base().set_hw_model(report.hw_model.clone());
                let established = report.established();
                if !established {
                    warn!("could not establish a session to device {}", self.name());
                }
                established
            })
            .await
    }

    /// Collects one command, consulting the device cache when allowed.
    async fn collect(&self, command: &Command, collection_id: Option<&str>) -> CommandOutcome {
        match self.base().cache() {
            Some(cache) if command.use_cache => {
                cache
                    .get_or_collect(&command.uid(), || async {
                        self.collect_raw(command, collection_id).await
                    })
                    .await
            }
            _ => self.collect_raw(command, collection_id).await,
        }
    }

    /// Collects a batch of commands concurrently, preserving order.
    async fn collect_commands(&self, commands: &[Command], collection_id: Option<&str>) -> Vec<CommandOutcome> {
        futures::future::join_all(commands.iter().map(|command| self.collect(command, collection_id))).await
    }

    /// Cache statistics for end-of-run logging; `None` when caching is off.
    fn cache_statistics(&self) -> Option<CacheStatistics> {
        self.base().cache().map(CommandCache::statistics)
    }
}

static HW_SERIES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[A-Za-z]{2,4}-)?([A-Za-z0-9]+)").unwrap());

/// Derives the platform family token from a hardware model string,
/// e.g. `DCS-7280SR3-48YC8` yields `7280SR3`.
fn derive_hw_series(model: &str) -> Option<String> {
    HW_SERIES
        .captures(model)
        .map(|capture| capture.get(1).unwrap().as_str().to_string())
}

/// Production [`Device`] backed by an eAPI client.
#[derive(Debug)]
pub struct EapiDevice {
    base: DeviceBase,
    client: EapiClient,
}

impl EapiDevice {
    /// Builds a device from an eAPI configuration.
    ///
    /// When `name` is `None` the device is named `host:port`, matching how
    /// it appears in transport logs.
    pub fn new(name: Option<String>, tags: HashSet<String>, config: EapiConfig) -> Result<Self, EapiError> {
        let client = EapiClient::new(config)?;
        let name = name.unwrap_or_else(|| format!("{}:{}", client.host(), client.port()));
        Ok(Self {
            base: DeviceBase::new(name, tags),
            client,
        })
    }

    /// Maximum simultaneous transport connections, for run-info logging.
    pub fn max_connections(&self) -> usize {
        self.client.max_connections()
    }
}

#[async_trait]
impl Device for EapiDevice {
    fn base(&self) -> &DeviceBase {
        &self.base
    }

    async fn refresh(&self) -> ProbeReport {
        debug!("refreshing device {}", self.name());
        if !self.client.check_connection().await {
            warn!("could not connect to {}: cannot open eAPI port", self.name());
            return ProbeReport::default();
        }

        let commands = [RawCommand::new("show version")];
        let hw_model = match self
            .client
            .cli(&commands, ResponseFormat::Json, Version::Latest, "netcheck-refresh")
            .await
        {
            Ok(outputs) => {
                let model = outputs
                    .first()
                    .and_then(|output| output.get("modelName"))
                    .and_then(serde_json::Value::as_str)
                    .map(String::from);
                if model.as_deref().is_none_or(str::is_empty) {
                    error!("cannot parse 'show version' returned by device {}", self.name());
                }
                model
            }
            Err(e) => {
                warn!("cannot get hardware information from device {}: {}", self.name(), e);
                None
            }
        };

        ProbeReport {
            is_online: true,
            hw_model,
        }
    }

    async fn collect_raw(&self, command: &Command, collection_id: Option<&str>) -> CommandOutcome {
        let raw = match command.revision {
            Some(revision) => RawCommand::with_revision(command.command.clone(), revision),
            None => RawCommand::new(command.command.clone()),
        };
        let request_id = match collection_id {
            Some(id) => format!("netcheck-{id}"),
            None => "netcheck".to_string(),
        };

        match self.client.cli(&[raw], command.format, command.version, &request_id).await {
            Ok(mut outputs) => match outputs.pop() {
                Some(output) => CommandOutcome::Collected(output),
                None => CommandOutcome::Failed(CommandFailure::Transport {
                    message: "empty result in eAPI reply".to_string(),
                }),
            },
            Err(e) if e.is_transport() => {
                error!("transport failure while sending '{}' to {}: {}", command.command, self.name(), e);
                CommandOutcome::Failed(CommandFailure::Transport { message: e.to_string() })
            }
            Err(e) => {
                error!("command '{}' failed on {}", command.command, self.name());
                CommandOutcome::Failed(CommandFailure::Rejected {
                    errors: e.into_messages(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hw_series_from_model() {
        assert_eq!(derive_hw_series("DCS-7280SR3-48YC8"), Some("7280SR3".to_string()));
        assert_eq!(derive_hw_series("DCS-7500R3-36CQ"), Some("7500R3".to_string()));
        assert_eq!(derive_hw_series("cEOSLab"), Some("cEOSLab".to_string()));
        assert_eq!(derive_hw_series(""), None);
    }

    #[test]
    fn test_base_always_carries_name_tag() {
        let base = DeviceBase::new("leaf1", HashSet::from(["leaf".to_string()]));
        assert!(base.tags().contains("leaf1"));
        assert!(base.tags().contains("leaf"));
    }

    #[test]
    fn test_without_cache_has_no_statistics() {
        let base = DeviceBase::without_cache("leaf1", HashSet::new());
        assert!(base.cache().is_none());
    }

    #[test]
    fn test_eapi_device_default_name() {
        let device = EapiDevice::new(
            None,
            HashSet::new(),
            EapiConfig::new("10.0.0.1", "admin", "admin"),
        )
        .unwrap();
        assert_eq!(device.name(), "10.0.0.1:443");
    }
}
