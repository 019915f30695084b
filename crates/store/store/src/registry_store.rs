use async_trait::async_trait;

use offhours_core::{InstanceState, RegisteredInstance, RegistryKey, Service};

use crate::error::StoreError;

/// The resource registry: one row per managed resource, carrying the
/// schedule tag value and the stored state.
///
/// The composite key design (account as partition,
/// `region#service#type#id` as sort key) makes `find_by_account` and
/// `find_by_target` efficient prefix queries; implementations over other
/// backends must preserve those two access patterns.
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// Fetch every registered resource. Used by the orchestrator to build
    /// the cycle's target set.
    async fn find_all(&self) -> Result<Vec<RegisteredInstance>, StoreError>;

    /// Fetch every registered resource in one account.
    async fn find_by_account(&self, account: &str) -> Result<Vec<RegisteredInstance>, StoreError>;

    /// Fetch every registered resource of one scheduling target.
    async fn find_by_target(
        &self,
        account: &str,
        region: &str,
        service: Service,
    ) -> Result<Vec<RegisteredInstance>, StoreError>;

    /// Fetch a single resource by key. `Ok(None)` when not registered.
    async fn find_by_key(
        &self,
        key: &RegistryKey,
    ) -> Result<Option<RegisteredInstance>, StoreError>;

    /// Write a registry row. With `overwrite = false` an existing row fails
    /// with [`StoreError::ConditionalCheckFailed`].
    async fn put(&self, instance: &RegisteredInstance, overwrite: bool)
    -> Result<(), StoreError>;

    /// Rewrite only the stored state of an existing row.
    async fn put_state(&self, key: &RegistryKey, state: InstanceState) -> Result<(), StoreError>;

    /// Delete a registry row. Deleting a missing row is not an error.
    async fn delete(&self, key: &RegistryKey) -> Result<(), StoreError>;
}
