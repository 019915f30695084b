use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument};

use offhours_core::{MaintenanceWindow, Schedule};
use offhours_store::{MaintenanceWindowStore, StoreError};

/// The delta between the mirrored windows and the provider's current
/// report, keyed by `name:window_id`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WindowDeltas {
    pub unchanged: Vec<String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
}

/// Maintenance windows for one scheduling target, reconciled against the
/// persisted mirror.
///
/// The provider only reports each window's *next* execution time, not the
/// start of a currently running execution. The mirror preserves the
/// previous report until its execution has ended, so a 3-hour window that
/// started an hour ago stays active for the remaining two even though the
/// provider is already advertising the following occurrence. Reconcile
/// exactly once per target per cycle, before any decision that might
/// consult the windows.
pub struct MaintenanceWindowContext {
    windows_by_name: HashMap<String, Vec<MaintenanceWindow>>,
    deltas: WindowDeltas,
}

impl MaintenanceWindowContext {
    /// Reconcile the provider's report with the mirror and build the
    /// lookup for this cycle.
    ///
    /// `provider_windows` is the provider's current report for the target.
    /// Windows not referenced by any in-scope schedule and windows without
    /// a next execution time are dropped before the mirror is touched. A
    /// mirrored row whose execution is still running at `current_dt` is
    /// neither overwritten nor deleted.
    #[instrument(skip_all, fields(account = %account, region = %region))]
    pub async fn reconcile(
        store: &Arc<dyn MaintenanceWindowStore>,
        provider_windows: Vec<MaintenanceWindow>,
        referenced_names: &[String],
        account: &str,
        region: &str,
        current_dt: DateTime<Utc>,
        scheduling_interval_minutes: u32,
    ) -> Result<Self, StoreError> {
        let incoming: HashMap<String, MaintenanceWindow> = provider_windows
            .into_iter()
            .filter(|w| referenced_names.contains(&w.window_name))
            .filter(|w| w.next_execution_time.is_some())
            .map(|w| (w.name_id(), w))
            .collect();

        let mut mirrored: HashMap<String, MaintenanceWindow> = store
            .find_by_account_region(account, region)
            .await?
            .into_iter()
            .map(|w| (w.name_id(), w))
            .collect();

        let mut deltas = WindowDeltas::default();

        for (name_id, window) in &incoming {
            match mirrored.get(name_id) {
                Some(existing) if existing == window => {
                    deltas.unchanged.push(name_id.clone());
                }
                Some(existing)
                    if existing.is_running_at(current_dt, scheduling_interval_minutes) =>
                {
                    // The mirrored execution is still in progress; keep it
                    // until it ends. The provider's newer report will win on
                    // a later cycle.
                    deltas.unchanged.push(name_id.clone());
                }
                _ => {
                    if let Err(e) = store.put(window).await {
                        error!(window = %name_id, error = %e, "failed to update mirrored window, skipping");
                        continue;
                    }
                    mirrored.insert(name_id.clone(), window.clone());
                    deltas.updated.push(name_id.clone());
                }
            }
        }

        let vanished: Vec<String> = mirrored
            .keys()
            .filter(|name_id| !incoming.contains_key(*name_id))
            .cloned()
            .collect();
        for name_id in vanished {
            let Some(window) = mirrored.get(&name_id) else {
                continue;
            };
            if window.is_running_at(current_dt, scheduling_interval_minutes) {
                // Still active; never removed until it is not.
                continue;
            }
            if let Err(e) = store.delete(window).await {
                error!(window = %name_id, error = %e, "failed to delete mirrored window, skipping");
                continue;
            }
            mirrored.remove(&name_id);
            deltas.deleted.push(name_id);
        }

        let mut windows_by_name: HashMap<String, Vec<MaintenanceWindow>> = HashMap::new();
        for window in mirrored.into_values() {
            windows_by_name
                .entry(window.window_name.clone())
                .or_default()
                .push(window);
        }

        info!(
            updated = deltas.updated.len(),
            deleted = deltas.deleted.len(),
            total_windows = windows_by_name.values().map(Vec::len).sum::<usize>(),
            "maintenance-window reconciliation complete"
        );

        Ok(Self {
            windows_by_name,
            deltas,
        })
    }

    /// Build a context from already-reconciled windows (tests).
    #[must_use]
    pub fn from_windows(windows: impl IntoIterator<Item = MaintenanceWindow>) -> Self {
        let mut windows_by_name: HashMap<String, Vec<MaintenanceWindow>> = HashMap::new();
        for window in windows {
            windows_by_name
                .entry(window.window_name.clone())
                .or_default()
                .push(window);
        }
        Self {
            windows_by_name,
            deltas: WindowDeltas::default(),
        }
    }

    /// Every reconciled window with the given display name. Names are not
    /// unique; all windows sharing the name are honored.
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> &[MaintenanceWindow] {
        self.windows_by_name
            .get(name)
            .map_or(&[], Vec::as_slice)
    }

    /// The synthetic enforced schedules for the named windows, used by the
    /// decision function.
    #[must_use]
    pub fn schedules_for(
        &self,
        names: &[String],
        scheduling_interval_minutes: u32,
    ) -> Vec<Schedule> {
        names
            .iter()
            .flat_map(|name| self.find_by_name(name))
            .filter_map(|window| window.to_schedule(scheduling_interval_minutes))
            .collect()
    }

    /// The deltas computed by the reconciliation (observability only).
    #[must_use]
    pub fn deltas(&self) -> &WindowDeltas {
        &self.deltas
    }
}
