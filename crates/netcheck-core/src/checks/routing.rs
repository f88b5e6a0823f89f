//! Generic routing-table checks.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::command::CommandTemplate;
use crate::lifecycle::{Check, CheckError, CollectedCommand, CommandDecl};
use crate::result::TestResult;

fn default_vrf() -> String {
    "default".to_string()
}

/// Verifies the provided routes are present in the routing table of a VRF.
///
/// One lookup command is rendered per route from a shared template.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyRoutingTableEntry {
    /// VRF context.
    #[serde(default = "default_vrf")]
    pub vrf: String,
    /// Routes that must be present.
    pub routes: Vec<String>,
}

impl Check for VerifyRoutingTableEntry {
    fn name(&self) -> &'static str {
        "VerifyRoutingTableEntry"
    }

    fn description(&self) -> &'static str {
        "Verifies that the provided routes are present in the routing table of a specified VRF."
    }

    fn categories(&self) -> &'static [&'static str] {
        &["routing"]
    }

    fn commands(&self) -> Vec<CommandDecl> {
        let params = self
            .routes
            .iter()
            .map(|route| {
                HashMap::from([
                    ("vrf".to_string(), self.vrf.clone()),
                    ("route".to_string(), route.clone()),
                ])
            })
            .collect();
        vec![CommandDecl::Template {
            template: CommandTemplate::new("show ip route vrf {vrf} {route}").with_revision(4),
            params,
        }]
    }

    fn verify(&self, commands: &[CollectedCommand], result: &mut TestResult) -> Result<(), CheckError> {
        let mut present: Vec<&str> = Vec::new();
        for collected in commands {
            let payload = collected.payload()?;
            let routes = payload
                .pointer(&format!("/vrfs/{}/routes", self.vrf))
                .and_then(Value::as_object)
                .ok_or_else(|| CheckError::UnexpectedPayload {
                    command: collected.command.command.clone(),
                    reason: format!("missing routes for VRF '{}'", self.vrf),
                })?;
            present.extend(routes.keys().map(String::as_str));
        }

        let missing: Vec<&str> = self
            .routes
            .iter()
            .map(String::as_str)
            .filter(|route| !present.iter().any(|entry| route_matches(entry, route)))
            .collect();

        if missing.is_empty() {
            result.success();
        } else {
            result.failure(format!(
                "The following route(s) are missing from the routing table of VRF {}: {missing:?}",
                self.vrf
            ));
        }
        Ok(())
    }
}

/// A routing-table entry (`10.1.0.1/32`) matches a queried address with or
/// without its prefix length.
fn route_matches(entry: &str, address: &str) -> bool {
    entry == address || entry.split('/').next() == Some(address)
}
