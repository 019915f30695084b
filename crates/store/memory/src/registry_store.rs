use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use offhours_core::{InstanceState, RegisteredInstance, RegistryKey, Service};
use offhours_store::{ResourceRegistry, StoreError};

/// In-memory resource registry keyed by `(account, sort_key)`.
#[derive(Debug, Default)]
pub struct InMemoryResourceRegistry {
    rows: RwLock<HashMap<(String, String), RegisteredInstance>>,
}

impl InMemoryResourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("in-memory registry lock poisoned".into())
    }

    fn row_key(instance: &RegisteredInstance) -> Result<(String, String), StoreError> {
        let key = instance
            .key()
            .map_err(|e| StoreError::InvalidItem(e.to_string()))?;
        Ok((key.account.clone(), key.sort_key()))
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryResourceRegistry {
    async fn find_all(&self) -> Result<Vec<RegisteredInstance>, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.values().cloned().collect())
    }

    async fn find_by_account(&self, account: &str) -> Result<Vec<RegisteredInstance>, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|((acct, _), _)| acct == account)
            .map(|(_, instance)| instance.clone())
            .collect())
    }

    async fn find_by_target(
        &self,
        account: &str,
        region: &str,
        service: Service,
    ) -> Result<Vec<RegisteredInstance>, StoreError> {
        let prefix = RegistryKey::target_prefix(region, service);
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows
            .iter()
            .filter(|((acct, sk), _)| acct == account && sk.starts_with(&prefix))
            .map(|(_, instance)| instance.clone())
            .collect())
    }

    async fn find_by_key(
        &self,
        key: &RegistryKey,
    ) -> Result<Option<RegisteredInstance>, StoreError> {
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.get(&(key.account.clone(), key.sort_key())).cloned())
    }

    async fn put(
        &self,
        instance: &RegisteredInstance,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let row_key = Self::row_key(instance)?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        if !overwrite && rows.contains_key(&row_key) {
            return Err(StoreError::ConditionalCheckFailed(row_key.1));
        }
        rows.insert(row_key, instance.clone());
        Ok(())
    }

    async fn put_state(&self, key: &RegistryKey, state: InstanceState) -> Result<(), StoreError> {
        let row_key = (key.account.clone(), key.sort_key());
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        match rows.get_mut(&row_key) {
            Some(instance) => {
                instance.stored_state = state;
                Ok(())
            }
            None => Err(StoreError::NotFound(row_key.1)),
        }
    }

    async fn delete(&self, key: &RegistryKey) -> Result<(), StoreError> {
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.remove(&(key.account.clone(), key.sort_key()));
        Ok(())
    }
}
