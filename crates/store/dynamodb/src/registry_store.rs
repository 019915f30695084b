use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use tracing::warn;

use offhours_core::{
    Arn, AsgConfiguration, InstanceState, RegisteredInstance, RegistryKey, Service,
};
use offhours_store::{ResourceRegistry, StoreError};

use crate::item::{Item, get_n_i32, get_opt_s, get_s};

/// The resource registry over DynamoDB: partition key `account`, sort key
/// `resource#<region>#<service>#<resource_type>#<resource_id>`.
#[derive(Debug, Clone)]
pub struct DynamoResourceRegistry {
    client: Client,
    table_name: String,
}

impl DynamoResourceRegistry {
    /// Create a registry over an existing client and table.
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    fn collect(items: Vec<Item>) -> Vec<RegisteredInstance> {
        items
            .iter()
            .filter_map(|item| match instance_from_item(item) {
                Ok(instance) => Some(instance),
                Err(e) => {
                    // One unreadable row must not hide the rest.
                    warn!(error = %e, "skipping unreadable registry row");
                    None
                }
            })
            .collect()
    }

    async fn query(
        &self,
        account: &str,
        sort_key_prefix: Option<&str>,
    ) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let mut request = self
                .client
                .query()
                .table_name(&self.table_name)
                .expression_attribute_values(":account", AttributeValue::S(account.to_owned()));

            request = match sort_key_prefix {
                Some(prefix) => request
                    .key_condition_expression("account = :account AND begins_with(sk, :prefix)")
                    .expression_attribute_values(":prefix", AttributeValue::S(prefix.to_owned())),
                None => request.key_condition_expression("account = :account"),
            };

            let result = request
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            items.extend(result.items.unwrap_or_default());
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(items)
    }
}

fn instance_to_item(instance: &RegisteredInstance) -> Result<Item, StoreError> {
    let key = instance
        .key()
        .map_err(|e| StoreError::InvalidItem(e.to_string()))?;

    let mut item = Item::new();
    item.insert(
        "account".to_owned(),
        AttributeValue::S(instance.account.clone()),
    );
    item.insert("sk".to_owned(), AttributeValue::S(key.sort_key()));
    item.insert(
        "arn".to_owned(),
        AttributeValue::S(instance.arn.as_str().to_owned()),
    );
    item.insert(
        "schedule".to_owned(),
        AttributeValue::S(instance.schedule.clone()),
    );
    item.insert("name".to_owned(), AttributeValue::S(instance.name.clone()));
    item.insert(
        "state".to_owned(),
        AttributeValue::S(instance.stored_state.as_str().to_owned()),
    );

    if let Some(config) = &instance.last_configured {
        let mut map = Item::new();
        map.insert(
            "last_updated".to_owned(),
            AttributeValue::S(config.last_updated.to_rfc3339()),
        );
        map.insert(
            "min".to_owned(),
            AttributeValue::N(config.min_size.to_string()),
        );
        map.insert(
            "desired".to_owned(),
            AttributeValue::N(config.desired_size.to_string()),
        );
        map.insert(
            "max".to_owned(),
            AttributeValue::N(config.max_size.to_string()),
        );
        map.insert(
            "schedule_hash".to_owned(),
            AttributeValue::S(config.schedule_hash.clone()),
        );
        map.insert(
            "valid_until".to_owned(),
            AttributeValue::S(config.valid_until.to_rfc3339()),
        );
        item.insert("last_configured".to_owned(), AttributeValue::M(map));
    }

    Ok(item)
}

fn parse_rfc3339(value: &str, field: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidItem(format!("invalid timestamp in {field}: {value}")))
}

fn instance_from_item(item: &Item) -> Result<RegisteredInstance, StoreError> {
    let account = get_s(item, "account")?;
    let sort_key = get_s(item, "sk")?;
    let key = RegistryKey::parse_sort_key(&account, &sort_key)
        .map_err(|e| StoreError::InvalidItem(e.to_string()))?;
    let arn =
        Arn::parse(get_s(item, "arn")?).map_err(|e| StoreError::InvalidItem(e.to_string()))?;

    let last_configured = match item.get("last_configured").and_then(|attr| attr.as_m().ok()) {
        Some(map) => Some(AsgConfiguration {
            last_updated: parse_rfc3339(&get_s(map, "last_updated")?, "last_updated")?,
            min_size: get_n_i32(map, "min")?,
            desired_size: get_n_i32(map, "desired")?,
            max_size: get_n_i32(map, "max")?,
            schedule_hash: get_s(map, "schedule_hash")?,
            valid_until: parse_rfc3339(&get_s(map, "valid_until")?, "valid_until")?,
        }),
        None => None,
    };

    Ok(RegisteredInstance {
        account,
        region: key.region,
        resource_id: key.resource_id,
        arn,
        schedule: get_s(item, "schedule")?,
        name: get_opt_s(item, "name").unwrap_or_default(),
        stored_state: InstanceState::parse_lenient(&get_s(item, "state")?),
        last_configured,
    })
}

#[async_trait]
impl ResourceRegistry for DynamoResourceRegistry {
    async fn find_all(&self) -> Result<Vec<RegisteredInstance>, StoreError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let result = self
                .client
                .scan()
                .table_name(&self.table_name)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            items.extend(result.items.unwrap_or_default());
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(Self::collect(items))
    }

    async fn find_by_account(&self, account: &str) -> Result<Vec<RegisteredInstance>, StoreError> {
        Ok(Self::collect(self.query(account, None).await?))
    }

    async fn find_by_target(
        &self,
        account: &str,
        region: &str,
        service: Service,
    ) -> Result<Vec<RegisteredInstance>, StoreError> {
        let prefix = RegistryKey::target_prefix(region, service);
        Ok(Self::collect(self.query(account, Some(&prefix)).await?))
    }

    async fn find_by_key(
        &self,
        key: &RegistryKey,
    ) -> Result<Option<RegisteredInstance>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("account", AttributeValue::S(key.account.clone()))
            .key("sk", AttributeValue::S(key.sort_key()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        match result.item {
            Some(item) => Ok(Some(instance_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        instance: &RegisteredInstance,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        let item = instance_to_item(instance)?;
        let sort_key = get_s(&item, "sk")?;

        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item));
        if !overwrite {
            request = request
                .condition_expression("attribute_not_exists(account) AND attribute_not_exists(sk)");
        }
        request.send().await.map_err(|e| {
            if e.as_service_error()
                .is_some_and(|svc| svc.is_conditional_check_failed_exception())
            {
                StoreError::ConditionalCheckFailed(sort_key.clone())
            } else {
                StoreError::Unavailable(e.to_string())
            }
        })?;
        Ok(())
    }

    async fn put_state(&self, key: &RegistryKey, state: InstanceState) -> Result<(), StoreError> {
        self.client
            .update_item()
            .table_name(&self.table_name)
            .key("account", AttributeValue::S(key.account.clone()))
            .key("sk", AttributeValue::S(key.sort_key()))
            .update_expression("SET #state = :state")
            .condition_expression("attribute_exists(sk)")
            .expression_attribute_names("#state", "state")
            .expression_attribute_values(
                ":state",
                AttributeValue::S(state.as_str().to_owned()),
            )
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|svc| svc.is_conditional_check_failed_exception())
                {
                    StoreError::NotFound(key.sort_key())
                } else {
                    StoreError::Unavailable(e.to_string())
                }
            })?;
        Ok(())
    }

    async fn delete(&self, key: &RegistryKey) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("account", AttributeValue::S(key.account.clone()))
            .key("sk", AttributeValue::S(key.sort_key()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
