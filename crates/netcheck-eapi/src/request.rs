//! Wire types for the eAPI `runCmds` JSON-RPC method.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// eAPI protocol version requested for command output.
///
/// `Latest` asks the device for the most recent output schema; pinning to
/// version 1 keeps the schema stable across OS releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Version {
    #[default]
    Latest,
    One,
}

impl Version {
    /// The value placed in the `params.version` field.
    pub fn as_value(self) -> Value {
        match self {
            Version::Latest => Value::from("latest"),
            Version::One => Value::from(1),
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::Latest => write!(f, "latest"),
            Version::One => write!(f, "1"),
        }
    }
}

/// Output structure requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

impl std::fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseFormat::Json => write!(f, "json"),
            ResponseFormat::Text => write!(f, "text"),
        }
    }
}

/// A single command entry in a `runCmds` batch.
///
/// Commands are sent as plain strings unless a revision is pinned, in which
/// case eAPI expects an object form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub cmd: String,
    pub revision: Option<u8>,
}

impl RawCommand {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            revision: None,
        }
    }

    pub fn with_revision(cmd: impl Into<String>, revision: u8) -> Self {
        Self {
            cmd: cmd.into(),
            revision: Some(revision),
        }
    }

    fn to_value(&self) -> Value {
        match self.revision {
            Some(revision) => serde_json::json!({ "cmd": self.cmd, "revision": revision }),
            None => Value::from(self.cmd.clone()),
        }
    }
}

/// A `runCmds` JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct EapiRequest {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
    pub id: String,
}

impl EapiRequest {
    /// Builds a `runCmds` request for a batch of commands.
    pub fn run_cmds(commands: &[RawCommand], format: ResponseFormat, version: Version, id: impl Into<String>) -> Self {
        let cmds: Vec<Value> = commands.iter().map(RawCommand::to_value).collect();
        Self {
            jsonrpc: "2.0",
            method: "runCmds",
            params: serde_json::json!({
                "version": version.as_value(),
                "cmds": cmds,
                "format": format,
            }),
            id: id.into(),
        }
    }
}

/// The error object of a failed JSON-RPC call.
///
/// `data` holds the per-command outputs collected up to and including the
/// failing command; the failing entry carries an `errors` list.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl RpcError {
    /// Extracts the device-reported error strings from the failing entry.
    pub fn command_errors(&self) -> Vec<String> {
        self.data
            .iter()
            .filter_map(|entry| entry.get("errors"))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect()
    }
}

/// A `runCmds` JSON-RPC response, successful or not.
#[derive(Debug, Clone, Deserialize)]
pub struct EapiResponse {
    #[allow(dead_code)]
    pub id: Option<Value>,
    pub result: Option<Vec<Value>>,
    pub error: Option<RpcError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_cmds_plain_command() {
        let request = EapiRequest::run_cmds(
            &[RawCommand::new("show version")],
            ResponseFormat::Json,
            Version::Latest,
            "netcheck-1",
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["method"], "runCmds");
        assert_eq!(value["params"]["cmds"][0], "show version");
        assert_eq!(value["params"]["version"], "latest");
        assert_eq!(value["params"]["format"], "json");
    }

    #[test]
    fn test_run_cmds_revisioned_command() {
        let request = EapiRequest::run_cmds(
            &[RawCommand::with_revision("show bgp summary", 3)],
            ResponseFormat::Json,
            Version::One,
            "netcheck-2",
        );

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["params"]["cmds"][0]["cmd"], "show bgp summary");
        assert_eq!(value["params"]["cmds"][0]["revision"], 3);
        assert_eq!(value["params"]["version"], 1);
    }

    #[test]
    fn test_rpc_error_command_errors() {
        let raw = serde_json::json!({
            "code": 1002,
            "message": "CLI command 2 of 2 'show bogus' failed: invalid command",
            "data": [
                { "uptime": 42 },
                { "errors": ["Invalid input (at token 1: 'bogus')"] }
            ]
        });
        let error: RpcError = serde_json::from_value(raw).unwrap();

        assert_eq!(error.command_errors(), vec!["Invalid input (at token 1: 'bogus')"]);
    }

    #[test]
    fn test_response_success_roundtrip() {
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": "netcheck-1",
            "result": [{ "modelName": "DCS-7280SR3-48YC8" }]
        });
        let response: EapiResponse = serde_json::from_value(raw).unwrap();

        assert!(response.error.is_none());
        assert_eq!(response.result.unwrap()[0]["modelName"], "DCS-7280SR3-48YC8");
    }
}
