//! Test doubles for the engine: an instrumented mock device and a scripted
//! check. Used by the crate's own tests and available to downstream crates
//! writing checks.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{Command, CommandFailure, CommandOutcome};
use crate::device::{Device, DeviceBase, ProbeReport};
use crate::lifecycle::{Check, CheckError, CollectedCommand, CommandDecl, PreCheck};
use crate::result::TestResult;

/// Tracks how many collections are in their I/O phase at once.
///
/// Share one gauge across every mock device of a scenario to assert the
/// scheduler's global concurrency bound.
#[derive(Debug, Clone, Default)]
pub struct InFlightGauge {
    inner: Arc<GaugeInner>,
}

#[derive(Debug, Default)]
struct GaugeInner {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl InFlightGauge {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self) -> GaugeGuard {
        let now = self.inner.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max.fetch_max(now, Ordering::SeqCst);
        GaugeGuard { inner: Arc::clone(&self.inner) }
    }

    /// The highest number of simultaneous in-flight collections observed.
    pub fn max_seen(&self) -> usize {
        self.inner.max.load(Ordering::SeqCst)
    }
}

struct GaugeGuard {
    inner: Arc<GaugeInner>,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.inner.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An in-memory [`Device`] with scripted payloads and instrumentation.
pub struct MockDevice {
    base: DeviceBase,
    online: bool,
    probed_hw_model: Option<String>,
    responses: Mutex<HashMap<String, CommandOutcome>>,
    failure: Option<String>,
    collect_delay: Option<Duration>,
    gauge: Option<InFlightGauge>,
    transport_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
}

impl MockDevice {
    /// A reachable device reporting the given hardware model.
    pub fn reachable(name: &str, tags: &[&str], hw_model: &str) -> Self {
        Self {
            base: DeviceBase::new(name, tags.iter().map(|t| (*t).to_string()).collect::<HashSet<_>>()),
            online: true,
            probed_hw_model: Some(hw_model.to_string()),
            responses: Mutex::new(HashMap::new()),
            failure: None,
            collect_delay: None,
            gauge: None,
            transport_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// A device whose probe never comes back online.
    pub fn unreachable(name: &str) -> Self {
        let mut device = Self::reachable(name, &[], "");
        device.online = false;
        device.probed_hw_model = None;
        device
    }

    /// Scripts the payload returned for one command text.
    pub fn with_response(self, command: &str, payload: serde_json::Value) -> Self {
        self.responses
            .lock()
            .expect("responses lock poisoned")
            .insert(command.to_string(), CommandOutcome::Collected(payload));
        self
    }

    /// Makes every unscripted collection fail with a transport error.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Holds every collection open for `delay`, to force overlap.
    pub fn with_collect_delay(mut self, delay: Duration) -> Self {
        self.collect_delay = Some(delay);
        self
    }

    /// Attaches a shared in-flight gauge.
    pub fn with_gauge(mut self, gauge: InFlightGauge) -> Self {
        self.gauge = Some(gauge);
        self
    }

    /// Number of transport-level collections performed (cache misses).
    pub fn transport_calls(&self) -> usize {
        self.transport_calls.load(Ordering::SeqCst)
    }

    /// Number of reachability probes performed.
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Device for MockDevice {
    fn base(&self) -> &DeviceBase {
        &self.base
    }

    async fn refresh(&self) -> ProbeReport {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        ProbeReport {
            is_online: self.online,
            hw_model: self.probed_hw_model.clone(),
        }
    }

    async fn collect_raw(&self, command: &Command, _collection_id: Option<&str>) -> CommandOutcome {
        self.transport_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.gauge.as_ref().map(InFlightGauge::enter);
        if let Some(delay) = self.collect_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .responses
            .lock()
            .expect("responses lock poisoned")
            .get(&command.command)
            .cloned();
        if let Some(outcome) = scripted {
            return outcome;
        }
        match &self.failure {
            Some(message) => CommandOutcome::Failed(CommandFailure::Transport {
                message: message.clone(),
            }),
            None => CommandOutcome::Collected(serde_json::json!({})),
        }
    }
}

type VerifyFn = Arc<dyn Fn(&[CollectedCommand], &mut TestResult) -> Result<(), CheckError> + Send + Sync>;

/// A [`Check`] assembled from closures, for exercising the lifecycle.
#[derive(Clone)]
pub struct ScriptedCheck {
    name: &'static str,
    commands: Vec<CommandDecl>,
    pre_checks: Vec<PreCheck>,
    verify: VerifyFn,
}

impl std::fmt::Debug for ScriptedCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedCheck")
            .field("name", &self.name)
            .field("commands", &self.commands)
            .field("pre_checks", &self.pre_checks)
            .finish_non_exhaustive()
    }
}

impl ScriptedCheck {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            commands: Vec::new(),
            pre_checks: Vec::new(),
            verify: Arc::new(|_, _| Ok(())),
        }
    }

    pub fn with_commands(mut self, commands: Vec<CommandDecl>) -> Self {
        self.commands = commands;
        self
    }

    pub fn with_pre_checks(mut self, pre_checks: Vec<PreCheck>) -> Self {
        self.pre_checks = pre_checks;
        self
    }

    pub fn with_verify<F>(mut self, verify: F) -> Self
    where
        F: Fn(&[CollectedCommand], &mut TestResult) -> Result<(), CheckError> + Send + Sync + 'static,
    {
        self.verify = Arc::new(verify);
        self
    }
}

impl Check for ScriptedCheck {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "Scripted check"
    }

    fn categories(&self) -> &'static [&'static str] {
        &["testing"]
    }

    fn commands(&self) -> Vec<CommandDecl> {
        self.commands.clone()
    }

    fn pre_checks(&self) -> Vec<PreCheck> {
        self.pre_checks.clone()
    }

    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError> {
        (self.verify)(commands, result)
    }
}
