//! Software image checks.

use serde::Deserialize;
use serde_json::Value;

use crate::command::Command;
use crate::lifecycle::{Check, CheckError, CollectedCommand, CommandDecl};
use crate::result::TestResult;

/// Verifies the device runs one of the allowed software versions.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyRunningVersion {
    /// Versions the device is allowed to run.
    pub versions: Vec<String>,
}

impl Check for VerifyRunningVersion {
    fn name(&self) -> &'static str {
        "VerifyRunningVersion"
    }

    fn description(&self) -> &'static str {
        "Verifies the device is running one of the allowed software versions."
    }

    fn categories(&self) -> &'static [&'static str] {
        &["software"]
    }

    fn commands(&self) -> Vec<CommandDecl> {
        vec![CommandDecl::Fixed(Command::new("show version"))]
    }

    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError> {
        let payload = commands[0].payload()?;
        let version = payload
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| CheckError::UnexpectedPayload {
                command: commands[0].command.command.clone(),
                reason: "missing 'version' field".to_string(),
            })?;

        if self.versions.iter().any(|allowed| allowed == version) {
            result.success();
        } else {
            result.failure(format!(
                "device is running version \"{version}\" not in expected versions: {:?}",
                self.versions
            ));
        }
        Ok(())
    }
}
