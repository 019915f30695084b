use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use chrono_tz::Tz;
use tracing::warn;

use offhours_core::{MaintenanceWindow, maint_win::parse_execution_time};
use offhours_store::{MaintenanceWindowStore, StoreError};

use crate::item::{Item, get_n_u32, get_opt_s, get_s};

/// The maintenance-window mirror over DynamoDB: partition key
/// `account-region` (`<account>:<region>`), sort key `name-id`
/// (`<name>:<window_id>`).
#[derive(Debug, Clone)]
pub struct DynamoMaintenanceWindowStore {
    client: Client,
    table_name: String,
}

impl DynamoMaintenanceWindowStore {
    /// Create a mirror over an existing client and table.
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn window_to_item(window: &MaintenanceWindow) -> Item {
    let mut item = Item::new();
    item.insert(
        "account-region".to_owned(),
        AttributeValue::S(window.account_region()),
    );
    item.insert("name-id".to_owned(), AttributeValue::S(window.name_id()));
    item.insert(
        "WindowId".to_owned(),
        AttributeValue::S(window.window_id.clone()),
    );
    item.insert(
        "Name".to_owned(),
        AttributeValue::S(window.window_name.clone()),
    );
    item.insert(
        "ScheduleTimezone".to_owned(),
        AttributeValue::S(window.timezone.name().to_owned()),
    );
    if let Some(next) = window.next_execution_time {
        item.insert(
            "NextExecutionTime".to_owned(),
            AttributeValue::S(next.to_rfc3339()),
        );
    }
    item.insert(
        "Duration".to_owned(),
        AttributeValue::N(window.duration_hours.to_string()),
    );
    item
}

fn window_from_item(item: &Item) -> Result<MaintenanceWindow, StoreError> {
    let account_region = get_s(item, "account-region")?;
    let (account, region) = account_region.split_once(':').ok_or_else(|| {
        StoreError::InvalidItem(format!("malformed account-region: {account_region}"))
    })?;

    let timezone_name = get_s(item, "ScheduleTimezone")?;
    let timezone: Tz = timezone_name
        .parse()
        .map_err(|_| StoreError::InvalidItem(format!("unknown timezone: {timezone_name}")))?;

    let next_execution_time = match get_opt_s(item, "NextExecutionTime") {
        Some(raw) => Some(parse_execution_time(&raw).ok_or_else(|| {
            StoreError::InvalidItem(format!("invalid NextExecutionTime: {raw}"))
        })?),
        None => None,
    };

    Ok(MaintenanceWindow {
        account: account.to_owned(),
        region: region.to_owned(),
        window_id: get_s(item, "WindowId")?,
        window_name: get_s(item, "Name")?,
        timezone,
        next_execution_time,
        duration_hours: get_n_u32(item, "Duration")?,
    })
}

#[async_trait]
impl MaintenanceWindowStore for DynamoMaintenanceWindowStore {
    async fn find_by_account_region(
        &self,
        account: &str,
        region: &str,
    ) -> Result<Vec<MaintenanceWindow>, StoreError> {
        let pk = format!("{account}:{region}");
        let mut windows = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("#pk = :pk")
                .expression_attribute_names("#pk", "account-region")
                .expression_attribute_values(":pk", AttributeValue::S(pk.clone()))
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;

            for item in result.items.unwrap_or_default() {
                match window_from_item(&item) {
                    Ok(window) => windows.push(window),
                    Err(e) => warn!(error = %e, "skipping unreadable maintenance-window row"),
                }
            }
            match result.last_evaluated_key {
                Some(key) if !key.is_empty() => start_key = Some(key),
                _ => break,
            }
        }
        Ok(windows)
    }

    async fn put(&self, window: &MaintenanceWindow) -> Result<(), StoreError> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(window_to_item(window)))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, window: &MaintenanceWindow) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(
                "account-region",
                AttributeValue::S(window.account_region()),
            )
            .key("name-id", AttributeValue::S(window.name_id()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
