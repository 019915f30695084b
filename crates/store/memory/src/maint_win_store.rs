use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use offhours_core::MaintenanceWindow;
use offhours_store::{MaintenanceWindowStore, StoreError};

/// In-memory maintenance-window mirror keyed by
/// `(account:region, name:window_id)`.
#[derive(Debug, Default)]
pub struct InMemoryMaintenanceWindowStore {
    rows: RwLock<HashMap<(String, String), MaintenanceWindow>>,
}

impl InMemoryMaintenanceWindowStore {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mirror preloaded with windows.
    #[must_use]
    pub fn preloaded(windows: impl IntoIterator<Item = MaintenanceWindow>) -> Self {
        Self {
            rows: RwLock::new(
                windows
                    .into_iter()
                    .map(|w| ((w.account_region(), w.name_id()), w))
                    .collect(),
            ),
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("in-memory maintenance-window store lock poisoned".into())
    }
}

#[async_trait]
impl MaintenanceWindowStore for InMemoryMaintenanceWindowStore {
    async fn find_by_account_region(
        &self,
        account: &str,
        region: &str,
    ) -> Result<Vec<MaintenanceWindow>, StoreError> {
        let pk = format!("{account}:{region}");
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|((account_region, _), _)| *account_region == pk)
            .map(|(_, window)| window.clone())
            .collect())
    }

    async fn put(&self, window: &MaintenanceWindow) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.insert(
            (window.account_region(), window.name_id()),
            window.clone(),
        );
        Ok(())
    }

    async fn delete(&self, window: &MaintenanceWindow) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.remove(&(window.account_region(), window.name_id()));
        Ok(())
    }
}
