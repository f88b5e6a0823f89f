//! System-level checks: uptime, reload cause, NTP.

use serde::Deserialize;
use serde_json::Value;

use crate::command::Command;
use crate::lifecycle::{Check, CheckError, CollectedCommand, CommandDecl};
use crate::result::TestResult;

/// Verifies the device uptime is at least a minimum number of seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyUptime {
    /// Minimum uptime in seconds.
    pub minimum: f64,
}

impl Check for VerifyUptime {
    fn name(&self) -> &'static str {
        "VerifyUptime"
    }

    fn description(&self) -> &'static str {
        "Verifies the device uptime."
    }

    fn categories(&self) -> &'static [&'static str] {
        &["system"]
    }

    fn commands(&self) -> Vec<CommandDecl> {
        vec![CommandDecl::Fixed(Command::new("show uptime"))]
    }

    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError> {
        let payload = commands[0].payload()?;
        let uptime = payload
            .get("upTime")
            .and_then(Value::as_f64)
            .ok_or_else(|| CheckError::UnexpectedPayload {
                command: commands[0].command.command.clone(),
                reason: "missing 'upTime' field".to_string(),
            })?;

        if uptime >= self.minimum {
            result.success();
        } else {
            result.failure(format!("Device uptime is {uptime} seconds"));
        }
        Ok(())
    }
}

/// Reload causes considered part of normal operations.
const ALLOWED_RELOAD_CAUSES: [&str; 2] = ["Reload requested by the user.", "Reload requested after FPGA upgrade"];

/// Verifies the last reload was requested by a user or an upgrade.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyReloadCause {}

impl Check for VerifyReloadCause {
    fn name(&self) -> &'static str {
        "VerifyReloadCause"
    }

    fn description(&self) -> &'static str {
        "Verifies the last reload cause of the device."
    }

    fn categories(&self) -> &'static [&'static str] {
        &["system"]
    }

    fn commands(&self) -> Vec<CommandDecl> {
        vec![CommandDecl::Fixed(Command::new("show reload cause"))]
    }

    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError> {
        let payload = commands[0].payload()?;
        let causes = payload
            .get("resetCauses")
            .and_then(Value::as_array)
            .ok_or_else(|| CheckError::UnexpectedPayload {
                command: commands[0].command.command.clone(),
                reason: "missing 'resetCauses' field".to_string(),
            })?;

        // A device that never reloaded reports no cause at all.
        let Some(first) = causes.first() else {
            result.success();
            return Ok(());
        };
        let description = first
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| CheckError::UnexpectedPayload {
                command: commands[0].command.command.clone(),
                reason: "reset cause without a description".to_string(),
            })?;

        if ALLOWED_RELOAD_CAUSES.contains(&description) {
            result.success();
        } else {
            result.failure(format!("Reload cause is: '{description}'"));
        }
        Ok(())
    }
}

/// One expected NTP association.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NtpServer {
    pub server_address: String,
    /// Expected to be the synchronization source.
    #[serde(default)]
    pub preferred: bool,
    pub stratum: u8,
}

/// Verifies each expected NTP server's association, one atomic sub-result
/// per server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyNtpAssociations {
    pub ntp_servers: Vec<NtpServer>,
}

impl Check for VerifyNtpAssociations {
    fn name(&self) -> &'static str {
        "VerifyNtpAssociations"
    }

    fn description(&self) -> &'static str {
        "Verifies the NTP associations."
    }

    fn categories(&self) -> &'static [&'static str] {
        &["system"]
    }

    fn commands(&self) -> Vec<CommandDecl> {
        vec![CommandDecl::Fixed(Command::new("show ntp associations"))]
    }

    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError> {
        let payload = commands[0].payload()?;
        let peers = payload.get("peers").and_then(Value::as_object);

        for server in &self.ntp_servers {
            let atomic = result.add_atomic(format!("Server: {}", server.server_address));
            let Some(peer) = peers.and_then(|peers| peers.get(&server.server_address)) else {
                atomic.failure("NTP server is not configured");
                continue;
            };

            let expected_condition = if server.preferred { "sys.peer" } else { "candidate" };
            let condition = peer.get("condition").and_then(Value::as_str).unwrap_or("unknown");
            let stratum = peer.get("stratumLevel").and_then(Value::as_u64);

            if condition != expected_condition {
                atomic.failure(format!("Expected condition '{expected_condition}' but found '{condition}'"));
            }
            if stratum != Some(u64::from(server.stratum)) {
                let found = stratum.map_or_else(|| "unknown".to_string(), |s| s.to_string());
                atomic.failure(format!("Expected stratum {} but found {found}", server.stratum));
            }
            if atomic.status() == crate::result::TestStatus::Unset {
                atomic.success();
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandOutcome;
    use crate::result::TestStatus;
    use serde_json::json;

    fn collected(check_command: &str, payload: Value) -> Vec<CollectedCommand> {
        vec![CollectedCommand {
            command: Command::new(check_command),
            outcome: CommandOutcome::Collected(payload),
        }]
    }

    fn result() -> TestResult {
        TestResult::new("leaf1", "check", vec!["system".to_string()], "")
    }

    #[test]
    fn test_uptime_above_minimum() {
        let check = VerifyUptime { minimum: 600.0 };
        let mut result = result();
        check
            .verify(&collected("show uptime", json!({ "upTime": 1000.48 })), &mut result)
            .unwrap();
        assert_eq!(result.status(), TestStatus::Success);
    }

    #[test]
    fn test_uptime_below_minimum() {
        let check = VerifyUptime { minimum: 600.0 };
        let mut result = result();
        check
            .verify(&collected("show uptime", json!({ "upTime": 30.0 })), &mut result)
            .unwrap();
        assert_eq!(result.status(), TestStatus::Failure);
        assert!(result.messages()[0].contains("30"));
    }

    #[test]
    fn test_uptime_unexpected_payload() {
        let check = VerifyUptime { minimum: 600.0 };
        let error = check
            .verify(&collected("show uptime", json!({})), &mut result())
            .unwrap_err();
        assert!(matches!(error, CheckError::UnexpectedPayload { .. }));
    }

    #[test]
    fn test_reload_cause_allowed() {
        let check = VerifyReloadCause {};
        let payload = json!({ "resetCauses": [{ "description": "Reload requested by the user." }] });
        let mut result = result();
        check.verify(&collected("show reload cause", payload), &mut result).unwrap();
        assert_eq!(result.status(), TestStatus::Success);
    }

    #[test]
    fn test_reload_cause_unexpected() {
        let check = VerifyReloadCause {};
        let payload = json!({ "resetCauses": [{ "description": "Kernel panic" }] });
        let mut result = result();
        check.verify(&collected("show reload cause", payload), &mut result).unwrap();
        assert_eq!(result.status(), TestStatus::Failure);
    }

    #[test]
    fn test_reload_cause_never_reloaded() {
        let check = VerifyReloadCause {};
        let mut result = result();
        check
            .verify(&collected("show reload cause", json!({ "resetCauses": [] })), &mut result)
            .unwrap();
        assert_eq!(result.status(), TestStatus::Success);
    }

    fn ntp_check() -> VerifyNtpAssociations {
        VerifyNtpAssociations {
            ntp_servers: vec![
                NtpServer {
                    server_address: "10.0.0.1".to_string(),
                    preferred: true,
                    stratum: 1,
                },
                NtpServer {
                    server_address: "10.0.0.2".to_string(),
                    preferred: false,
                    stratum: 2,
                },
            ],
        }
    }

    #[test]
    fn test_ntp_associations_all_healthy() {
        let payload = json!({ "peers": {
            "10.0.0.1": { "condition": "sys.peer", "stratumLevel": 1 },
            "10.0.0.2": { "condition": "candidate", "stratumLevel": 2 },
        }});
        let mut result = result();
        ntp_check()
            .verify(&collected("show ntp associations", payload), &mut result)
            .unwrap();

        result.settle();
        assert_eq!(result.status(), TestStatus::Success);
        assert_eq!(result.atomic_results().len(), 2);
    }

    #[test]
    fn test_ntp_associations_one_peer_degraded() {
        let payload = json!({ "peers": {
            "10.0.0.1": { "condition": "sys.peer", "stratumLevel": 1 },
            "10.0.0.2": { "condition": "reject", "stratumLevel": 9 },
        }});
        let mut result = result();
        ntp_check()
            .verify(&collected("show ntp associations", payload), &mut result)
            .unwrap();

        result.settle();
        assert_eq!(result.status(), TestStatus::Failure);
        let degraded = &result.atomic_results()[1];
        assert_eq!(degraded.status(), TestStatus::Failure);
        assert_eq!(degraded.messages().len(), 2);
    }

    #[test]
    fn test_ntp_associations_missing_peer() {
        let payload = json!({ "peers": {
            "10.0.0.1": { "condition": "sys.peer", "stratumLevel": 1 },
        }});
        let mut result = result();
        ntp_check()
            .verify(&collected("show ntp associations", payload), &mut result)
            .unwrap();

        result.settle();
        assert_eq!(result.status(), TestStatus::Failure);
        assert!(result.atomic_results()[1].messages()[0].contains("not configured"));
    }
}
