//! Append-only collection of check results with query and statistics helpers.

use std::collections::{BTreeMap, HashSet};

use crate::result::{TestResult, TestStatus};

/// Per-device counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_skipped: usize,
    pub tests_errored: usize,
    /// Categories in which at least one check failed or errored.
    pub categories_failed: HashSet<String>,
}

/// Per-category counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub tests_skipped: usize,
    pub tests_errored: usize,
}

/// Accumulates every [`TestResult`] of a run.
///
/// Entries are never mutated or deduplicated after being added; every query
/// is a point-in-time view over the current collection.
#[derive(Debug, Default)]
pub struct ResultManager {
    results: Vec<TestResult>,
}

impl ResultManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Appends a result. Duplicate (device, check) pairs are retained as-is.
    pub fn add(&mut self, result: TestResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn filter_by_device(&self, device: &str) -> Vec<&TestResult> {
        self.results.iter().filter(|result| result.name == device).collect()
    }

    pub fn filter_by_test(&self, test: &str) -> Vec<&TestResult> {
        self.results.iter().filter(|result| result.test == test).collect()
    }

    pub fn filter_by_status(&self, status: TestStatus) -> Vec<&TestResult> {
        self.results.iter().filter(|result| result.status() == status).collect()
    }

    /// Distinct check names present, in first-seen order.
    pub fn test_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for result in &self.results {
            if !names.contains(&result.test) {
                names.push(result.test.clone());
            }
        }
        names
    }

    /// Distinct device names present, in first-seen order.
    pub fn device_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for result in &self.results {
            if !names.contains(&result.name) {
                names.push(result.name.clone());
            }
        }
        names
    }

    pub fn device_stats(&self) -> BTreeMap<String, DeviceStats> {
        let mut stats: BTreeMap<String, DeviceStats> = BTreeMap::new();
        for result in &self.results {
            let entry = stats.entry(result.name.clone()).or_default();
            match result.status() {
                TestStatus::Success => entry.tests_passed += 1,
                TestStatus::Failure => entry.tests_failed += 1,
                TestStatus::Skipped => entry.tests_skipped += 1,
                TestStatus::Error => entry.tests_errored += 1,
                TestStatus::Unset => {}
            }
            if matches!(result.status(), TestStatus::Failure | TestStatus::Error) {
                entry.categories_failed.extend(result.categories.iter().cloned());
            }
        }
        stats
    }

    pub fn category_stats(&self) -> BTreeMap<String, CategoryStats> {
        let mut stats: BTreeMap<String, CategoryStats> = BTreeMap::new();
        for result in &self.results {
            for category in &result.categories {
                let entry = stats.entry(category.clone()).or_default();
                match result.status() {
                    TestStatus::Success => entry.tests_passed += 1,
                    TestStatus::Failure => entry.tests_failed += 1,
                    TestStatus::Skipped => entry.tests_skipped += 1,
                    TestStatus::Error => entry.tests_errored += 1,
                    TestStatus::Unset => {}
                }
            }
        }
        stats
    }

    /// Serializes every result for report tooling.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.results).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(device: &str, test: &str, category: &str, status: TestStatus) -> TestResult {
        let mut r = TestResult::new(device, test, vec![category.to_string()], "a check");
        match status {
            TestStatus::Success => r.success(),
            TestStatus::Failure => r.failure("failed"),
            TestStatus::Skipped => r.skip("skipped"),
            TestStatus::Error => r.error("errored"),
            TestStatus::Unset => {}
        }
        r
    }

    #[test]
    fn test_add_and_filter() {
        let mut manager = ResultManager::new();
        manager.add(result("leaf1", "VerifyUptime", "system", TestStatus::Success));
        manager.add(result("leaf1", "VerifyReloadCause", "system", TestStatus::Failure));
        manager.add(result("spine1", "VerifyUptime", "system", TestStatus::Success));

        assert_eq!(manager.len(), 3);
        assert_eq!(manager.filter_by_device("leaf1").len(), 2);
        assert_eq!(manager.filter_by_test("VerifyUptime").len(), 2);
        assert_eq!(manager.filter_by_status(TestStatus::Failure).len(), 1);
        assert_eq!(manager.test_names(), vec!["VerifyUptime", "VerifyReloadCause"]);
        assert_eq!(manager.device_names(), vec!["leaf1", "spine1"]);
    }

    #[test]
    fn test_duplicates_are_retained() {
        let mut manager = ResultManager::new();
        manager.add(result("leaf1", "VerifyUptime", "system", TestStatus::Success));
        manager.add(result("leaf1", "VerifyUptime", "system", TestStatus::Failure));

        assert_eq!(manager.filter_by_test("VerifyUptime").len(), 2);
    }

    #[test]
    fn test_device_stats() {
        let mut manager = ResultManager::new();
        manager.add(result("leaf1", "VerifyUptime", "system", TestStatus::Success));
        manager.add(result("leaf1", "VerifyReloadCause", "system", TestStatus::Failure));
        manager.add(result("leaf1", "VerifyRoutingTableEntry", "routing", TestStatus::Skipped));

        let stats = manager.device_stats();
        let leaf1 = &stats["leaf1"];
        assert_eq!(leaf1.tests_passed, 1);
        assert_eq!(leaf1.tests_failed, 1);
        assert_eq!(leaf1.tests_skipped, 1);
        assert!(leaf1.categories_failed.contains("system"));
        assert!(!leaf1.categories_failed.contains("routing"));
    }

    #[test]
    fn test_category_stats() {
        let mut manager = ResultManager::new();
        manager.add(result("leaf1", "VerifyUptime", "system", TestStatus::Success));
        manager.add(result("spine1", "VerifyUptime", "system", TestStatus::Error));

        let stats = manager.category_stats();
        assert_eq!(stats["system"].tests_passed, 1);
        assert_eq!(stats["system"].tests_errored, 1);
    }
}
