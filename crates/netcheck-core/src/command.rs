//! Command model: rendered commands, templates and collection outcomes.
//!
//! A [`Command`] is the unit sent to a device; its [`uid`](Command::uid) is
//! the cache key, so two commands differing only in output-format version are
//! distinct cache entries. A [`CommandTemplate`] carries `{placeholder}`
//! fields substituted at render time.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub use netcheck_eapi::{ResponseFormat, Version};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

/// A fully rendered command ready to be collected from a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    /// The CLI command text.
    pub command: String,
    /// eAPI protocol version for the output schema.
    pub version: Version,
    /// Pinned output revision, if any.
    pub revision: Option<u8>,
    /// Requested output structure.
    pub format: ResponseFormat,
    /// Whether the device command cache may serve this command.
    pub use_cache: bool,
}

impl Command {
    /// A JSON command with the latest output schema, cache enabled.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            version: Version::Latest,
            revision: None,
            format: ResponseFormat::Json,
            use_cache: true,
        }
    }

    /// A text-format command with the latest output schema, cache enabled.
    pub fn text(command: impl Into<String>) -> Self {
        Self {
            format: ResponseFormat::Text,
            ..Self::new(command)
        }
    }

    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Opts this command out of the device command cache.
    pub fn no_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// The cache key: command text plus every output qualifier.
    pub fn uid(&self) -> String {
        let revision = self
            .revision
            .map_or_else(|| "none".to_string(), |revision| revision.to_string());
        format!("{}_{}_{}_{}", self.command, self.version, revision, self.format)
    }
}

/// A command with `{placeholder}` fields to substitute before collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    pub template: String,
    pub version: Version,
    pub revision: Option<u8>,
    pub format: ResponseFormat,
}

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            version: Version::Latest,
            revision: None,
            format: ResponseFormat::Json,
        }
    }

    pub fn with_revision(mut self, revision: u8) -> Self {
        self.revision = Some(revision);
        self
    }

    /// The placeholder names this template requires, in order of appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        PLACEHOLDER
            .captures_iter(&self.template)
            .map(|capture| capture.get(1).unwrap().as_str())
            .collect()
    }

    /// Substitutes `params` into the template.
    ///
    /// Every placeholder must have a value; a missing one is a definition
    /// error surfaced by the requesting check, never a panic.
    pub fn render(&self, params: &HashMap<String, String>) -> Result<Command, TemplateError> {
        let mut rendered = self.template.clone();
        for placeholder in self.placeholders() {
            let value = params.get(placeholder).ok_or_else(|| TemplateError::MissingParameter {
                template: self.template.clone(),
                parameter: placeholder.to_string(),
            })?;
            rendered = rendered.replace(&format!("{{{placeholder}}}"), value);
        }
        Ok(Command {
            command: rendered,
            version: self.version,
            revision: self.revision,
            format: self.format,
            use_cache: true,
        })
    }
}

/// Why a command could not be collected.
///
/// `Rejected` means the device answered and refused the command; `Transport`
/// covers timeouts, connection failures and malformed replies. Checks decide
/// for themselves how to interpret either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    Rejected { errors: Vec<String> },
    Transport { message: String },
}

impl CommandFailure {
    pub fn messages(&self) -> Vec<String> {
        match self {
            CommandFailure::Rejected { errors } => errors.clone(),
            CommandFailure::Transport { message } => vec![message.clone()],
        }
    }
}

/// The stored outcome of one collection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Collected(Value),
    Failed(CommandFailure),
}

impl CommandOutcome {
    pub fn is_collected(&self) -> bool {
        matches!(self, CommandOutcome::Collected(_))
    }

    /// The collected payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            CommandOutcome::Collected(value) => Some(value),
            CommandOutcome::Failed(_) => None,
        }
    }

    /// The `output` field of a text-format payload.
    pub fn text_output(&self) -> Option<&str> {
        self.payload().and_then(|value| value.get("output")).and_then(Value::as_str)
    }

    /// Error strings recorded for a failed collection.
    pub fn errors(&self) -> Vec<String> {
        match self {
            CommandOutcome::Collected(_) => Vec::new(),
            CommandOutcome::Failed(failure) => failure.messages(),
        }
    }
}

/// Errors rendering a [`CommandTemplate`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template '{template}' has no value for parameter '{parameter}'")]
    MissingParameter { template: String, parameter: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_distinguishes_output_qualifiers() {
        let latest = Command::new("show version");
        let pinned = Command::new("show version").with_version(Version::One);
        let revisioned = Command::new("show version").with_revision(3);
        let text = Command::text("show version");

        let uids = [latest.uid(), pinned.uid(), revisioned.uid(), text.uid()];
        for (i, uid) in uids.iter().enumerate() {
            for other in &uids[i + 1..] {
                assert_ne!(uid, other);
            }
        }
    }

    #[test]
    fn test_template_render() {
        let template = CommandTemplate::new("show ip route vrf {vrf} {route}").with_revision(4);
        let params = HashMap::from([
            ("vrf".to_string(), "default".to_string()),
            ("route".to_string(), "10.1.0.1".to_string()),
        ]);

        let command = template.render(&params).unwrap();
        assert_eq!(command.command, "show ip route vrf default 10.1.0.1");
        assert_eq!(command.revision, Some(4));
    }

    #[test]
    fn test_template_missing_parameter() {
        let template = CommandTemplate::new("show ip route vrf {vrf}");
        let error = template.render(&HashMap::new()).unwrap_err();

        assert_eq!(
            error,
            TemplateError::MissingParameter {
                template: "show ip route vrf {vrf}".to_string(),
                parameter: "vrf".to_string(),
            }
        );
    }

    #[test]
    fn test_placeholders_in_order() {
        let template = CommandTemplate::new("show bgp {afi} {safi} summary vrf {vrf}");
        assert_eq!(template.placeholders(), vec!["afi", "safi", "vrf"]);
    }

    #[test]
    fn test_outcome_accessors() {
        let collected = CommandOutcome::Collected(serde_json::json!({ "output": "hello" }));
        assert!(collected.is_collected());
        assert_eq!(collected.text_output(), Some("hello"));
        assert!(collected.errors().is_empty());

        let failed = CommandOutcome::Failed(CommandFailure::Transport {
            message: "connection refused".to_string(),
        });
        assert!(!failed.is_collected());
        assert_eq!(failed.errors(), vec!["connection refused"]);
    }
}
