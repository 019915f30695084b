use async_trait::async_trait;

use offhours_core::MaintenanceWindow;

use crate::error::StoreError;

/// The maintenance-window mirror: a persisted copy of provider-reported
/// windows, keyed by `(account:region, name:window_id)`.
///
/// The mirror exists because the provider only reports each window's *next*
/// execution; a currently running execution survives only here. Rows for
/// running windows are preserved by the reconciliation in the scheduler
/// crate, not by the store itself.
#[async_trait]
pub trait MaintenanceWindowStore: Send + Sync {
    /// Fetch every mirrored window for an account and region.
    async fn find_by_account_region(
        &self,
        account: &str,
        region: &str,
    ) -> Result<Vec<MaintenanceWindow>, StoreError>;

    /// Write a mirrored window, overwriting any previous row with the same
    /// `(name, window_id)`.
    async fn put(&self, window: &MaintenanceWindow) -> Result<(), StoreError>;

    /// Delete a mirrored window. Deleting a missing row is not an error.
    async fn delete(&self, window: &MaintenanceWindow) -> Result<(), StoreError>;
}
