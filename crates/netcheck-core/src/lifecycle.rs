//! Check trait and the per-instance test lifecycle.
//!
//! A [`TestInstance`] binds one check to one device for one run and drives
//! the `unset -> {skipped | success | failure | error}` machine:
//! pre-checks, reachability, command rendering, collection, verification.
//! Whatever happens inside, an instance always resolves to exactly one
//! terminal [`TestResult`]; nothing escapes the instance boundary.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::command::{Command, CommandOutcome, CommandTemplate, TemplateError};
use crate::device::Device;
use crate::result::TestResult;

/// Whether a platform filter lists the platforms to run on or to skip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterAction {
    Run,
    Skip,
}

/// A cross-cutting pre-check applied before the verification body.
///
/// Pre-checks run in order; each observes an already-terminal status and
/// does nothing in that case, so chains short-circuit cleanly.
#[derive(Debug, Clone)]
pub enum PreCheck {
    /// Logs a deprecation warning, optionally naming replacement checks.
    Deprecated { replaced_by: Vec<String> },
    /// Skips or runs the check based on the device's hardware model.
    PlatformModels { models: Vec<String>, action: FilterAction },
    /// Skips or runs the check based on the device's hardware series.
    PlatformSeries { series: Vec<String>, action: FilterAction },
}

impl PreCheck {
    fn apply(&self, check_name: &str, device: &dyn Device, result: &mut TestResult) {
        match self {
            PreCheck::Deprecated { replaced_by } => {
                if replaced_by.is_empty() {
                    warn!("{check_name} check is deprecated.");
                } else {
                    warn!(
                        "{check_name} check is deprecated. Consider using the following new checks: {}.",
                        replaced_by.join(", ")
                    );
                }
            }
            PreCheck::PlatformModels { models, action } => {
                let Some(model) = device.hw_model() else {
                    warn!("platform filter is ignored for {check_name}: the hardware model of {} is not known", device.name());
                    return;
                };
                let listed = models.iter().any(|candidate| *candidate == model);
                if excluded(listed, *action) {
                    result.skip(format!("{check_name} check is not supported on {model}."));
                }
            }
            PreCheck::PlatformSeries { series, action } => {
                let Some(device_series) = device.hw_series() else {
                    warn!("platform series filter is ignored for {check_name}: the hardware series of {} is not known", device.name());
                    return;
                };
                let listed = series.iter().any(|candidate| *candidate == device_series);
                if excluded(listed, *action) {
                    let model = device.hw_model().unwrap_or_default();
                    result.skip(format!("{check_name} check is not supported on {model}."));
                }
            }
        }
    }
}

fn excluded(listed: bool, action: FilterAction) -> bool {
    match action {
        FilterAction::Run => !listed,
        FilterAction::Skip => listed,
    }
}

/// A command a check declares: either already rendered, or a template plus
/// one parameter set per command to render from it.
#[derive(Debug, Clone)]
pub enum CommandDecl {
    Fixed(Command),
    Template {
        template: CommandTemplate,
        params: Vec<HashMap<String, String>>,
    },
}

/// A rendered command paired with its collection outcome, as handed to the
/// verification body.
#[derive(Debug, Clone)]
pub struct CollectedCommand {
    pub command: Command,
    pub outcome: CommandOutcome,
}

impl CollectedCommand {
    pub fn is_collected(&self) -> bool {
        self.outcome.is_collected()
    }

    /// The payload, or a [`CheckError::MissingOutput`] carrying the recorded
    /// collection failure, so bodies can escalate with `?`.
    pub fn payload(&self) -> Result<&serde_json::Value, CheckError> {
        self.outcome.payload().ok_or_else(|| CheckError::MissingOutput {
            command: self.command.command.clone(),
            reason: self.outcome.errors().join("; "),
        })
    }
}

/// Errors a verification body may return.
///
/// The instance boundary converts these (and panics) into status `error`,
/// keeping the error's type name in the message.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("command '{command}' was not collected: {reason}")]
    MissingOutput { command: String, reason: String },

    #[error("unexpected payload for command '{command}': {reason}")]
    UnexpectedPayload { command: String, reason: String },

    #[error("{0}")]
    Custom(String),
}

impl CheckError {
    fn kind(&self) -> &'static str {
        match self {
            CheckError::MissingOutput { .. } => "CheckError::MissingOutput",
            CheckError::UnexpectedPayload { .. } => "CheckError::UnexpectedPayload",
            CheckError::Custom(_) => "CheckError::Custom",
        }
    }
}

/// A verification body with its validated inputs bound.
///
/// Implementations declare the commands they need and assert over the
/// collected payloads; they never perform device I/O themselves. The body
/// runs to completion without suspending, so it is synchronous by design.
pub trait Check: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn categories(&self) -> &'static [&'static str];

    /// Commands to collect before verification.
    fn commands(&self) -> Vec<CommandDecl>;

    /// Ordered pre-checks applied before any command is rendered.
    fn pre_checks(&self) -> Vec<PreCheck> {
        Vec::new()
    }

    /// The verification body. Must only mutate `result` through its
    /// status/message/atomic primitives.
    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError>;
}

/// Completion counter for one run, shared by every instance.
#[derive(Debug, Clone, Default)]
pub struct RunProgress {
    inner: Arc<ProgressInner>,
}

#[derive(Debug, Default)]
struct ProgressInner {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl RunProgress {
    pub fn new(total: usize) -> Self {
        let progress = Self::default();
        progress.inner.total.store(total, Ordering::Relaxed);
        progress
    }

    pub fn tick(&self) {
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.inner.total.load(Ordering::Relaxed)
    }
}

/// A single-use binding of one check to one device.
///
/// The scheduler constructs a fresh instance per (device, definition) pair;
/// re-running an instance is not a thing, since `run` consumes it.
pub struct TestInstance {
    device: Arc<dyn Device>,
    check: Arc<dyn Check>,
    result: TestResult,
    progress: Option<RunProgress>,
}

impl TestInstance {
    pub fn new(device: Arc<dyn Device>, check: Arc<dyn Check>) -> Self {
        let result = TestResult::new(
            device.name(),
            check.name(),
            check.categories().iter().map(|c| (*c).to_string()).collect(),
            check.description(),
        );
        Self {
            device,
            check,
            result,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: RunProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn result(&self) -> &TestResult {
        &self.result
    }

    /// Drives the instance to a terminal result.
    ///
    /// Progress is reported exactly once, no matter where the lifecycle
    /// exits.
    pub async fn run(mut self) -> TestResult {
        self.execute().await;
        debug!("{}", self.result);
        if let Some(progress) = &self.progress {
            progress.tick();
        }
        self.result
    }

    async fn execute(&mut self) {
        for pre_check in self.check.pre_checks() {
            if self.result.status().is_terminal() {
                break;
            }
            pre_check.apply(self.check.name(), self.device.as_ref(), &mut self.result);
        }
        if self.result.status().is_terminal() {
            return;
        }

        if !self.device.ensure_established().await {
            self.result.failure(format!("device {} is unreachable", self.device.name()));
            return;
        }

        let commands = match render_commands(&self.check.commands()) {
            Ok(commands) => commands,
            Err(e) => {
                self.result.error(format!("TemplateError: {e}"));
                return;
            }
        };

        let outcomes = self.device.collect_commands(&commands, Some(self.check.name())).await;
        let collected: Vec<CollectedCommand> = commands
            .into_iter()
            .zip(outcomes)
            .map(|(command, outcome)| CollectedCommand { command, outcome })
            .collect();

        // The only place an escaping verification error becomes a status.
        let verdict = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.check.verify(&collected, &mut self.result)
        }));
        match verdict {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.result.error(format!("{}: {e}", e.kind())),
            Err(payload) => self.result.error(format!("panic: {}", panic_message(&payload))),
        }

        self.result.settle();
    }
}

fn render_commands(declarations: &[CommandDecl]) -> Result<Vec<Command>, TemplateError> {
    let mut commands = Vec::new();
    for declaration in declarations {
        match declaration {
            CommandDecl::Fixed(command) => commands.push(command.clone()),
            CommandDecl::Template { template, params } => {
                for param_set in params {
                    commands.push(template.render(param_set)?);
                }
            }
        }
    }
    Ok(commands)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
