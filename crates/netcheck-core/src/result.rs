//! Result model: status vocabulary, per-check results and atomic sub-results.

use serde::Serialize;

/// Outcome of a check (or of one atomic sub-check).
///
/// `Unset` is the only non-terminal state. A status never regresses once
/// set; failure and error only deepen (success may still be overridden by a
/// later failure or error before the result settles).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Unset,
    Skipped,
    Success,
    Failure,
    Error,
}

impl TestStatus {
    pub fn is_terminal(self) -> bool {
        self != TestStatus::Unset
    }

    fn accepts(self, new: TestStatus) -> bool {
        matches!(
            (self, new),
            (TestStatus::Unset, _)
                | (TestStatus::Success, TestStatus::Failure | TestStatus::Error)
                | (TestStatus::Failure, TestStatus::Error)
        )
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TestStatus::Unset => "unset",
            TestStatus::Skipped => "skipped",
            TestStatus::Success => "success",
            TestStatus::Failure => "failure",
            TestStatus::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// One independently reported fact inside a check (e.g. one BGP peer out of
/// many), with its own status and messages.
#[derive(Debug, Clone, Serialize)]
pub struct AtomicResult {
    pub description: String,
    status: TestStatus,
    messages: Vec<String>,
}

impl AtomicResult {
    fn new(description: String) -> Self {
        Self {
            description,
            status: TestStatus::Unset,
            messages: Vec::new(),
        }
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn success(&mut self) {
        self.set_status(TestStatus::Success, None);
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        self.set_status(TestStatus::Failure, Some(message.into()));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.set_status(TestStatus::Error, Some(message.into()));
    }

    fn set_status(&mut self, status: TestStatus, message: Option<String>) {
        if let Some(message) = message {
            self.messages.push(message);
        }
        if self.status.accepts(status) {
            self.status = status;
        }
    }
}

/// The result of one check on one device.
///
/// Messages are append-only; the status follows the
/// `unset -> {skipped | success | failure | error}` machine. When atomic
/// sub-results are present the top-level status is success only if none of
/// them reported failure or error.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    /// Device name the check ran against.
    pub name: String,
    /// Check name.
    pub test: String,
    pub categories: Vec<String>,
    pub description: String,
    status: TestStatus,
    messages: Vec<String>,
    atomic_results: Vec<AtomicResult>,
    /// Free-form field for integrations; never interpreted by the engine.
    pub custom_field: Option<String>,
}

impl TestResult {
    pub fn new(
        device: impl Into<String>,
        test: impl Into<String>,
        categories: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: device.into(),
            test: test.into(),
            categories,
            description: description.into(),
            status: TestStatus::Unset,
            messages: Vec::new(),
            atomic_results: Vec::new(),
            custom_field: None,
        }
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn atomic_results(&self) -> &[AtomicResult] {
        &self.atomic_results
    }

    /// Appends an atomic sub-result and returns it for status reporting.
    pub fn add_atomic(&mut self, description: impl Into<String>) -> &mut AtomicResult {
        self.atomic_results.push(AtomicResult::new(description.into()));
        self.atomic_results.last_mut().unwrap()
    }

    pub fn success(&mut self) {
        self.set_status(TestStatus::Success, None);
    }

    pub fn failure(&mut self, message: impl Into<String>) {
        self.set_status(TestStatus::Failure, Some(message.into()));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.set_status(TestStatus::Error, Some(message.into()));
    }

    pub fn skip(&mut self, message: impl Into<String>) {
        self.set_status(TestStatus::Skipped, Some(message.into()));
    }

    fn set_status(&mut self, status: TestStatus, message: Option<String>) {
        if let Some(message) = message {
            self.messages.push(message);
        }
        if self.status.accepts(status) {
            self.status = status;
        }
    }

    /// Rolls atomic sub-results up into the top-level status and defaults an
    /// untouched result to success. Called once when the instance finishes.
    pub(crate) fn settle(&mut self) {
        let worst = self
            .atomic_results
            .iter()
            .map(AtomicResult::status)
            .max_by_key(|status| match status {
                TestStatus::Error => 2,
                TestStatus::Failure => 1,
                _ => 0,
            });
        match worst {
            Some(TestStatus::Error) => self.set_status(TestStatus::Error, None),
            Some(TestStatus::Failure) => self.set_status(TestStatus::Failure, None),
            _ => {}
        }
        if self.status == TestStatus::Unset {
            self.status = TestStatus::Success;
        }
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Check '{}' (on '{}'): {}\nMessages: {:?}",
            self.test, self.name, self.status, self.messages
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result() -> TestResult {
        TestResult::new("leaf1", "VerifyUptime", vec!["system".to_string()], "Verifies uptime")
    }

    #[test]
    fn test_status_machine_never_regresses() {
        let mut r = result();
        assert_eq!(r.status(), TestStatus::Unset);

        r.failure("first");
        assert_eq!(r.status(), TestStatus::Failure);

        // Repeated failures append messages without changing status.
        r.failure("second");
        assert_eq!(r.status(), TestStatus::Failure);
        assert_eq!(r.messages().len(), 2);

        // A failure never becomes a success.
        r.success();
        assert_eq!(r.status(), TestStatus::Failure);

        // But it may deepen to an error.
        r.error("boom");
        assert_eq!(r.status(), TestStatus::Error);
    }

    #[test]
    fn test_skipped_is_terminal() {
        let mut r = result();
        r.skip("not supported on this platform");

        r.success();
        r.failure("ignored");
        assert_eq!(r.status(), TestStatus::Skipped);
        assert_eq!(r.messages().len(), 2);
    }

    #[test]
    fn test_settle_defaults_to_success() {
        let mut r = result();
        r.settle();
        assert_eq!(r.status(), TestStatus::Success);
    }

    #[test]
    fn test_settle_rolls_up_atomic_failure() {
        let mut r = result();
        r.add_atomic("peer 10.0.0.1").success();
        r.add_atomic("peer 10.0.0.2").failure("session down");

        r.settle();
        assert_eq!(r.status(), TestStatus::Failure);
    }

    #[test]
    fn test_settle_prefers_atomic_error_over_failure() {
        let mut r = result();
        r.add_atomic("peer a").failure("down");
        r.add_atomic("peer b").error("unparsable payload");

        r.settle();
        assert_eq!(r.status(), TestStatus::Error);
    }

    #[test]
    fn test_explicit_success_with_clean_atomics_stands() {
        let mut r = result();
        r.add_atomic("peer a").success();
        r.success();

        r.settle();
        assert_eq!(r.status(), TestStatus::Success);
    }

    #[test]
    fn test_atomic_failure_overrides_explicit_success() {
        let mut r = result();
        r.add_atomic("peer a").failure("down");
        r.success();

        r.settle();
        assert_eq!(r.status(), TestStatus::Failure);
    }
}
