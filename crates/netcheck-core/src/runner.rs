//! The runner: resolves (device, definition) pairs and executes them under
//! a single global concurrency bound.
//!
//! An empty catalog or inventory is a logged no-op, never an error. Each
//! selected pair becomes exactly one fresh [`TestInstance`]; a unit's
//! internal failure never aborts the others, and the call returns only once
//! every unit has appended its result. There is no per-unit cancellation;
//! wrap the returned future in `tokio::time::timeout` to bound a whole run.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, DefinitionId};
use crate::device::Device;
use crate::inventory::Inventory;
use crate::lifecycle::{RunProgress, TestInstance};
use crate::manager::ResultManager;
use crate::settings::RunnerSettings;

/// Selection and behavior knobs for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Restrict the run to these device names. `None` means all devices.
    pub devices: Option<HashSet<String>>,
    /// Restrict the run to these check names. `None` means all checks.
    pub tests: Option<HashSet<String>>,
    /// Restrict devices and definitions to these tags. `None` means all.
    pub tags: Option<HashSet<String>>,
    /// Drop unreachable devices instead of failing their checks.
    pub established_only: bool,
    /// Build every instance but stop before executing them.
    pub dry_run: bool,
    /// Completion counter shared with external progress reporting.
    pub progress: Option<RunProgress>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            devices: None,
            tests: None,
            tags: None,
            established_only: true,
            dry_run: false,
            progress: None,
        }
    }
}

/// Runs every applicable check against every applicable device.
///
/// The manager receives one result per selected (device, definition) pair;
/// completion order across pairs is unspecified.
pub async fn run(
    manager: &mut ResultManager,
    inventory: &Inventory,
    catalog: &mut Catalog,
    options: &RunOptions,
    settings: &RunnerSettings,
) {
    if catalog.is_empty() {
        info!("the catalog of checks is empty, exiting");
        return;
    }
    if inventory.is_empty() {
        info!("the device inventory is empty, exiting");
        return;
    }

    let selected_inventory = if options.dry_run {
        inventory.clone()
    } else {
        match setup_inventory(inventory, options).await {
            Some(selected) => selected,
            None => return,
        }
    };

    let Some((selected, total)) = setup_tests(&selected_inventory, catalog, options) else {
        return;
    };

    #[cfg(unix)]
    if let Some(nofile) = adjust_nofile_limit() {
        debug!("maximum number of open file descriptors for this run: {nofile}");
    }

    info!(
        "running {} check(s) against {} device(s) ({} in inventory) with a concurrency bound of {}",
        total,
        selected_inventory.len(),
        inventory.len(),
        settings.max_concurrency
    );
    if total > settings.max_concurrency {
        warn!(
            "the number of selected checks ({}) exceeds the concurrency bound ({}); execution will be throttled",
            total, settings.max_concurrency
        );
    }

    let progress = options.progress.clone().unwrap_or_else(|| RunProgress::new(total));
    let mut instances = Vec::with_capacity(total);
    for (device, ids) in &selected {
        for id in ids {
            // Ids come from the catalog's own indexes, so the lookup holds.
            let definition = catalog.definition(*id).expect("definition id out of range");
            instances.push(
                TestInstance::new(Arc::clone(device), Arc::clone(definition.check()))
                    .with_progress(progress.clone()),
            );
        }
    }

    if options.dry_run {
        info!("dry-run mode, exiting before executing the checks");
        return;
    }

    let limit = settings.max_concurrency.max(1);
    let mut completions = futures::stream::iter(instances.into_iter().map(TestInstance::run)).buffer_unordered(limit);
    while let Some(result) = completions.next().await {
        debug!("completed: {} on {}", result.test, result.name);
        manager.add(result);
    }

    log_cache_statistics(&selected_inventory);
}

/// Narrows the inventory per the options and establishes connections.
///
/// Returns `None` (after a log line) when no device is left to run on.
async fn setup_inventory(inventory: &Inventory, options: &RunOptions) -> Option<Inventory> {
    let selected = if options.tags.is_some() || options.devices.is_some() {
        inventory.filtered(options.tags.as_ref(), options.devices.as_ref())
    } else {
        inventory.clone()
    };

    selected.connect().await;
    let selected = if options.established_only {
        selected.established().await
    } else {
        selected
    };

    if selected.is_empty() {
        warn!("no reachable device matched the run selection");
        return None;
    }
    Some(selected)
}

/// Resolves the applicable definitions per device from the catalog indexes.
///
/// Returns the device-to-definitions mapping and the total pair count, or
/// `None` (after a log line) when nothing matched.
fn setup_tests(
    inventory: &Inventory,
    catalog: &mut Catalog,
    options: &RunOptions,
) -> Option<(Vec<(Arc<dyn Device>, BTreeSet<DefinitionId>)>, usize)> {
    catalog.build_indexes(options.tests.as_ref());

    let mut selected = Vec::new();
    let mut total = 0;
    for device in inventory.devices() {
        let ids = match &options.tags {
            Some(tags) => {
                let matching: HashSet<String> = tags.intersection(device.tags()).cloned().collect();
                if matching.is_empty() {
                    // The device carries none of the selected tags.
                    continue;
                }
                catalog
                    .tests_for_tags(&matching, false)
                    .expect("indexes were just built")
            }
            None => catalog
                .tests_for_tags(device.tags(), false)
                .expect("indexes were just built"),
        };
        if ids.is_empty() {
            continue;
        }
        total += ids.len();
        selected.push((Arc::clone(device), ids));
    }

    if total == 0 {
        warn!("there are no checks to run in the current catalog and device inventory, please verify your inputs");
        return None;
    }
    Some((selected, total))
}

/// Raises the soft limit for open file descriptors to
/// `min(hard limit, NETCHECK_NOFILE)`. Large fleets need one descriptor per
/// pooled connection, which quickly exceeds the usual default of 1024.
#[cfg(unix)]
fn adjust_nofile_limit() -> Option<u64> {
    use nix::sys::resource::{Resource, getrlimit, setrlimit};

    let requested = crate::settings::nofile_from_env();
    match getrlimit(Resource::RLIMIT_NOFILE) {
        Ok((soft, hard)) => {
            debug!("initial limits for open file descriptors: soft {soft} | hard {hard}");
            let target = hard.min(requested);
            if let Err(error) = setrlimit(Resource::RLIMIT_NOFILE, target, hard) {
                warn!("could not raise the open file descriptor limit: {error}");
                return Some(soft);
            }
            Some(target)
        }
        Err(error) => {
            warn!("could not read the open file descriptor limits: {error}");
            None
        }
    }
}

fn log_cache_statistics(inventory: &Inventory) {
    for device in inventory.devices() {
        match device.cache_statistics() {
            Some(stats) => info!("cache statistics for '{}': {}", device.name(), stats),
            None => info!("caching is not enabled on {}", device.name()),
        }
    }
}
