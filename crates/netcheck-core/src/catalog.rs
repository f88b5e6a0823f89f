//! Catalog of test definitions and its tag indexes.
//!
//! The catalog holds an ordered sequence of definitions plus two derived
//! indexes: the untagged set (applies to every device) and tag -> tagged
//! definitions. Indexes are invalidated by any mutation and must be rebuilt
//! before tag queries; the runner never consults stale indexes.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::lifecycle::Check;
use crate::registry::CheckRegistry;

/// Index of a definition within its catalog. Stable until the catalog is
/// mutated, which also invalidates the tag indexes.
pub type DefinitionId = usize;

/// One catalog entry: a built check plus an optional tag requirement.
///
/// `tags: None` means the definition applies to every device.
#[derive(Clone)]
pub struct TestDefinition {
    check: Arc<dyn Check>,
    tags: Option<HashSet<String>>,
}

impl TestDefinition {
    pub fn new(check: Arc<dyn Check>) -> Self {
        Self { check, tags: None }
    }

    /// A definition restricted to devices carrying the given tags.
    /// An empty set is normalized to "no restriction".
    pub fn with_tags(check: Arc<dyn Check>, tags: HashSet<String>) -> Self {
        Self {
            check,
            tags: (!tags.is_empty()).then_some(tags),
        }
    }

    pub fn name(&self) -> &'static str {
        self.check.name()
    }

    pub fn check(&self) -> &Arc<dyn Check> {
        &self.check
    }

    pub fn tags(&self) -> Option<&HashSet<String>> {
        self.tags.as_ref()
    }
}

impl std::fmt::Debug for TestDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDefinition")
            .field("check", &self.name())
            .field("tags", &self.tags)
            .finish()
    }
}

/// Errors building or querying a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("unknown check '{name}' in catalog")]
    UnknownCheck { name: String },

    #[error("invalid inputs for check '{check}': {source}")]
    InvalidInputs {
        check: String,
        source: serde_json::Error,
    },

    #[error("malformed catalog document: {0}")]
    InvalidFormat(String),

    #[error("cannot read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse catalog YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("catalog indexes are stale; rebuild them before querying")]
    StaleIndexes,
}

/// The ordered collection of test definitions with derived tag indexes.
#[derive(Default)]
pub struct Catalog {
    definitions: Vec<TestDefinition>,
    untagged: BTreeSet<DefinitionId>,
    tag_index: HashMap<String, BTreeSet<DefinitionId>>,
    indexes_built: bool,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: Vec<TestDefinition>) -> Self {
        Self {
            definitions,
            ..Self::default()
        }
    }

    /// Parses the YAML catalog format: a mapping from check name to a list
    /// of input documents, each optionally carrying `filters: { tags: [..] }`.
    pub fn parse(text: &str, registry: &CheckRegistry) -> Result<Self, CatalogError> {
        let mapping: serde_yaml::Mapping = serde_yaml::from_str(text)?;
        let mut definitions = Vec::new();

        for (key, value) in mapping {
            let name = key
                .as_str()
                .ok_or_else(|| CatalogError::InvalidFormat("check names must be strings".to_string()))?
                .to_string();
            let documents = match value {
                serde_yaml::Value::Sequence(sequence) => sequence,
                serde_yaml::Value::Null => vec![serde_yaml::Value::Null],
                _ => {
                    return Err(CatalogError::InvalidFormat(format!(
                        "inputs for '{name}' must be a sequence of documents"
                    )));
                }
            };

            for document in documents {
                let json: Value = serde_yaml::from_value(document)?;
                let mut inputs = match json {
                    Value::Null => Value::Object(serde_json::Map::new()),
                    Value::Object(_) => json,
                    _ => {
                        return Err(CatalogError::InvalidFormat(format!(
                            "each input document for '{name}' must be a mapping"
                        )));
                    }
                };

                let tags = extract_filter_tags(&name, &mut inputs)?;
                let check = registry.build(&name, inputs)?;
                definitions.push(match tags {
                    Some(tags) => TestDefinition::with_tags(check, tags),
                    None => TestDefinition::new(check),
                });
            }
        }

        Ok(Self::from_definitions(definitions))
    }

    pub fn from_file(path: &Path, registry: &CheckRegistry) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, registry)
    }

    pub fn definitions(&self) -> &[TestDefinition] {
        &self.definitions
    }

    pub fn definition(&self, id: DefinitionId) -> Option<&TestDefinition> {
        self.definitions.get(id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Appends a definition, invalidating the indexes.
    pub fn add(&mut self, definition: TestDefinition) {
        self.definitions.push(definition);
        self.indexes_built = false;
    }

    /// Concatenates another catalog's definitions into this one, duplicates
    /// included. `other` is left untouched; the indexes are invalidated.
    pub fn merge(&mut self, other: &Catalog) {
        self.definitions.extend_from_slice(&other.definitions);
        self.indexes_built = false;
    }

    pub fn indexes_built(&self) -> bool {
        self.indexes_built
    }

    /// Partitions definitions into the untagged set and tag -> definitions.
    ///
    /// When `restrict_to` is given, definitions whose check name is not in
    /// the set are left out of both indexes (used to run a named subset).
    pub fn build_indexes(&mut self, restrict_to: Option<&HashSet<String>>) {
        self.untagged.clear();
        self.tag_index.clear();

        for (id, definition) in self.definitions.iter().enumerate() {
            if restrict_to.is_some_and(|names| !names.contains(definition.name())) {
                continue;
            }
            match definition.tags() {
                None => {
                    self.untagged.insert(id);
                }
                Some(tags) => {
                    for tag in tags {
                        self.tag_index.entry(tag.clone()).or_default().insert(id);
                    }
                }
            }
        }
        self.indexes_built = true;
    }

    /// Resolves the definitions applicable to a set of tags.
    ///
    /// Non-strict: the union of the untagged set and, per query tag, the
    /// definitions requiring that tag (any overlap selects). Strict: only
    /// definitions whose entire tag requirement is contained in the query;
    /// untagged definitions are excluded.
    pub fn tests_for_tags(&self, tags: &HashSet<String>, strict: bool) -> Result<BTreeSet<DefinitionId>, CatalogError> {
        if !self.indexes_built {
            return Err(CatalogError::StaleIndexes);
        }

        let mut selected = BTreeSet::new();
        for tag in tags {
            if let Some(ids) = self.tag_index.get(tag) {
                selected.extend(ids.iter().copied());
            }
        }

        if strict {
            selected.retain(|id| {
                self.definitions[*id]
                    .tags()
                    .is_some_and(|required| required.is_subset(tags))
            });
        } else {
            selected.extend(self.untagged.iter().copied());
        }
        Ok(selected)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("definitions", &self.definitions)
            .field("indexes_built", &self.indexes_built)
            .finish()
    }
}

/// Pulls `filters.tags` out of an input document, leaving the check's own
/// inputs behind.
fn extract_filter_tags(name: &str, inputs: &mut Value) -> Result<Option<HashSet<String>>, CatalogError> {
    let document = inputs.as_object_mut().expect("inputs normalized to an object");
    let Some(filters) = document.remove("filters") else {
        return Ok(None);
    };

    let tags = filters
        .get("tags")
        .and_then(Value::as_array)
        .ok_or_else(|| CatalogError::InvalidFormat(format!("'filters.tags' for '{name}' must be a list of strings")))?
        .iter()
        .map(|tag| {
            tag.as_str().map(String::from).ok_or_else(|| {
                CatalogError::InvalidFormat(format!("'filters.tags' for '{name}' must be a list of strings"))
            })
        })
        .collect::<Result<HashSet<String>, CatalogError>>()?;
    Ok(Some(tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCheck;

    fn definition(name: &'static str, tags: &[&str]) -> TestDefinition {
        let check = Arc::new(ScriptedCheck::new(name));
        if tags.is_empty() {
            TestDefinition::new(check)
        } else {
            TestDefinition::with_tags(check, tags.iter().map(|t| (*t).to_string()).collect())
        }
    }

    fn tag_set(tags: &[&str]) -> HashSet<String> {
        tags.iter().map(|t| (*t).to_string()).collect()
    }

    fn fixture() -> Catalog {
        Catalog::from_definitions(vec![
            definition("VerifyUptime", &[]),
            definition("VerifyReloadCause", &["leaf"]),
            definition("VerifyRunningVersion", &["leaf", "spine"]),
            definition("VerifyNtpAssociations", &["spine"]),
        ])
    }

    #[test]
    fn test_stale_indexes_are_rejected() {
        let catalog = fixture();
        assert!(!catalog.indexes_built());
        assert!(matches!(
            catalog.tests_for_tags(&tag_set(&["leaf"]), false),
            Err(CatalogError::StaleIndexes)
        ));
    }

    #[test]
    fn test_union_selection_includes_untagged() {
        let mut catalog = fixture();
        catalog.build_indexes(None);

        let selected = catalog.tests_for_tags(&tag_set(&["leaf"]), false).unwrap();
        // Untagged VerifyUptime plus both leaf-tagged definitions.
        assert_eq!(selected, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn test_strict_selection_requires_subset() {
        let mut catalog = fixture();
        catalog.build_indexes(None);

        // Only VerifyReloadCause requires exactly {leaf}; VerifyRunningVersion
        // also requires "spine" and the untagged definition carries no
        // requirement at all.
        let selected = catalog.tests_for_tags(&tag_set(&["leaf"]), true).unwrap();
        assert_eq!(selected, BTreeSet::from([1]));

        let selected = catalog.tests_for_tags(&tag_set(&["leaf", "spine"]), true).unwrap();
        assert_eq!(selected, BTreeSet::from([1, 2, 3]));
    }

    #[test]
    fn test_restricted_index_build() {
        let mut catalog = fixture();
        catalog.build_indexes(Some(&tag_set(&["VerifyReloadCause"])));

        let selected = catalog.tests_for_tags(&tag_set(&["leaf", "spine"]), false).unwrap();
        assert_eq!(selected, BTreeSet::from([1]));
    }

    #[test]
    fn test_mutation_invalidates_indexes() {
        let mut catalog = fixture();
        catalog.build_indexes(None);
        assert!(catalog.indexes_built());

        catalog.add(definition("VerifyRoutingTableEntry", &[]));
        assert!(!catalog.indexes_built());
    }

    #[test]
    fn test_merge_concatenates_and_keeps_duplicates() {
        let mut catalog = fixture();
        let other = fixture();
        catalog.merge(&other);

        assert_eq!(catalog.len(), 8);
        assert_eq!(other.len(), 4);
        assert!(!catalog.indexes_built());
    }

    #[test]
    fn test_empty_tag_requirement_is_untagged() {
        let definition = definition("VerifyUptime", &[]);
        assert!(definition.tags().is_none());

        let explicit = TestDefinition::with_tags(Arc::new(ScriptedCheck::new("VerifyUptime")), HashSet::new());
        assert!(explicit.tags().is_none());
    }

    #[test]
    fn test_parse_yaml_catalog() {
        let registry = CheckRegistry::with_builtins();
        let text = r#"
VerifyUptime:
  - minimum: 600
    filters:
      tags: [leaf]
  - minimum: 86400
VerifyReloadCause:
  - {}
"#;
        let catalog = Catalog::parse(text, &registry).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.definitions()[0].name(), "VerifyUptime");
        assert_eq!(catalog.definitions()[0].tags(), Some(&tag_set(&["leaf"])));
        assert!(catalog.definitions()[1].tags().is_none());
        assert_eq!(catalog.definitions()[2].name(), "VerifyReloadCause");
    }

    #[test]
    fn test_parse_rejects_unknown_check() {
        let registry = CheckRegistry::with_builtins();
        let error = Catalog::parse("VerifyNothing:\n  - {}\n", &registry).unwrap_err();
        assert!(matches!(error, CatalogError::UnknownCheck { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_filters() {
        let registry = CheckRegistry::with_builtins();
        let text = "VerifyUptime:\n  - minimum: 1\n    filters:\n      tags: not-a-list\n";
        let error = Catalog::parse(text, &registry).unwrap_err();
        assert!(matches!(error, CatalogError::InvalidFormat(_)));
    }
}
