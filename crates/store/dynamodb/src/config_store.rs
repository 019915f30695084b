use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::AttributeValue;
use tracing::warn;

use offhours_core::{PeriodDefinition, PeriodRef, ScheduleDefinition};
use offhours_store::{PeriodStore, ScheduleStore, StoreError};

use crate::item::{Item, get_opt_s, get_opt_ss, get_opt_bool, get_s, put_opt_bool, put_opt_s, put_opt_ss};

const TYPE_SCHEDULE: &str = "schedule";
const TYPE_PERIOD: &str = "period";

/// Schedule and period definitions in a single DynamoDB table keyed
/// `(type, name)`.
#[derive(Debug, Clone)]
pub struct DynamoConfigStore {
    client: Client,
    table_name: String,
}

impl DynamoConfigStore {
    /// Create a store over an existing client and table.
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn get_item(&self, row_type: &str, name: &str) -> Result<Option<Item>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("type", AttributeValue::S(row_type.to_owned()))
            .key("name", AttributeValue::S(name.to_owned()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(result.item)
    }

    /// Query every row of one type, following pagination.
    async fn query_type(&self, row_type: &str) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .key_condition_expression("#t = :t")
                .expression_attribute_names("#t", "type")
                .expression_attribute_values(":t", AttributeValue::S(row_type.to_owned()))
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

    async fn put_item(&self, item: Item, overwrite: bool, key: &str) -> Result<(), StoreError> {
        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item));
        if !overwrite {
            request = request
                .condition_expression("attribute_not_exists(#t) AND attribute_not_exists(#n)")
                .expression_attribute_names("#t", "type")
                .expression_attribute_names("#n", "name");
        }
        request.send().await.map_err(|e| {
            if e.as_service_error()
                .is_some_and(|svc| svc.is_conditional_check_failed_exception())
            {
                StoreError::ConditionalCheckFailed(key.to_owned())
            } else {
                StoreError::Unavailable(e.to_string())
            }
        })?;
        Ok(())
    }

    async fn delete_item(&self, row_type: &str, name: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("type", AttributeValue::S(row_type.to_owned()))
            .key("name", AttributeValue::S(name.to_owned()))
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }
}

fn schedule_to_item(def: &ScheduleDefinition) -> Item {
    let mut item = Item::new();
    item.insert(
        "type".to_owned(),
        AttributeValue::S(TYPE_SCHEDULE.to_owned()),
    );
    item.insert("name".to_owned(), AttributeValue::S(def.name.clone()));
    let period_refs: Vec<String> = def.periods.iter().map(ToString::to_string).collect();
    put_opt_ss(&mut item, "periods", Some(period_refs.as_slice()));
    put_opt_s(&mut item, "timezone", def.timezone.as_deref());
    put_opt_s(&mut item, "override_status", def.override_status.as_deref());
    put_opt_s(&mut item, "description", def.description.as_deref());
    put_opt_ss(
        &mut item,
        "maintenance_windows",
        def.maintenance_windows.as_deref(),
    );
    put_opt_bool(&mut item, "stop_new_instances", def.stop_new_instances);
    put_opt_bool(
        &mut item,
        "use_maintenance_window",
        def.use_maintenance_window,
    );
    put_opt_bool(&mut item, "enforced", def.enforced);
    put_opt_bool(&mut item, "hibernate", def.hibernate);
    put_opt_bool(&mut item, "retain_running", def.retain_running);
    item
}

fn schedule_from_item(item: &Item) -> Result<ScheduleDefinition, StoreError> {
    let periods = get_opt_ss(item, "periods")
        .unwrap_or_default()
        .into_iter()
        .map(|raw| {
            raw.parse::<PeriodRef>()
                .map_err(|e| StoreError::InvalidItem(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ScheduleDefinition {
        name: get_s(item, "name")?,
        periods,
        timezone: get_opt_s(item, "timezone"),
        override_status: get_opt_s(item, "override_status"),
        description: get_opt_s(item, "description"),
        maintenance_windows: get_opt_ss(item, "maintenance_windows"),
        stop_new_instances: get_opt_bool(item, "stop_new_instances"),
        use_maintenance_window: get_opt_bool(item, "use_maintenance_window"),
        enforced: get_opt_bool(item, "enforced"),
        hibernate: get_opt_bool(item, "hibernate"),
        retain_running: get_opt_bool(item, "retain_running"),
    })
}

fn period_to_item(def: &PeriodDefinition) -> Item {
    let mut item = Item::new();
    item.insert("type".to_owned(), AttributeValue::S(TYPE_PERIOD.to_owned()));
    item.insert("name".to_owned(), AttributeValue::S(def.name.clone()));
    put_opt_s(&mut item, "begintime", def.begintime.as_deref());
    put_opt_s(&mut item, "endtime", def.endtime.as_deref());
    let as_vec = |set: &Option<std::collections::BTreeSet<String>>| {
        set.as_ref()
            .map(|s| s.iter().cloned().collect::<Vec<String>>())
    };
    put_opt_ss(&mut item, "weekdays", as_vec(&def.weekdays).as_deref());
    put_opt_ss(&mut item, "monthdays", as_vec(&def.monthdays).as_deref());
    put_opt_ss(&mut item, "months", as_vec(&def.months).as_deref());
    put_opt_s(&mut item, "description", def.description.as_deref());
    item
}

fn period_from_item(item: &Item) -> Result<PeriodDefinition, StoreError> {
    let as_set =
        |values: Option<Vec<String>>| values.map(|v| v.into_iter().collect());
    Ok(PeriodDefinition {
        name: get_s(item, "name")?,
        begintime: get_opt_s(item, "begintime"),
        endtime: get_opt_s(item, "endtime"),
        weekdays: as_set(get_opt_ss(item, "weekdays")),
        monthdays: as_set(get_opt_ss(item, "monthdays")),
        months: as_set(get_opt_ss(item, "months")),
        description: get_opt_s(item, "description"),
    })
}

#[async_trait]
impl ScheduleStore for DynamoConfigStore {
    async fn find_schedule(&self, name: &str) -> Result<Option<ScheduleDefinition>, StoreError> {
        match self.get_item(TYPE_SCHEDULE, name).await? {
            Some(item) => Ok(Some(schedule_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn find_all_schedules(&self) -> Result<HashMap<String, ScheduleDefinition>, StoreError> {
        let mut schedules = HashMap::new();
        for item in self.query_type(TYPE_SCHEDULE).await? {
            // A single bad row must not abort the bulk load.
            match schedule_from_item(&item) {
                Ok(def) => {
                    schedules.insert(def.name.clone(), def);
                }
                Err(e) => warn!(error = %e, "skipping unreadable schedule row"),
            }
        }
        Ok(schedules)
    }

    async fn put_schedule(
        &self,
        definition: &ScheduleDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        self.put_item(schedule_to_item(definition), overwrite, &definition.name)
            .await
    }

    async fn delete_schedule(&self, name: &str) -> Result<(), StoreError> {
        self.delete_item(TYPE_SCHEDULE, name).await
    }
}

#[async_trait]
impl PeriodStore for DynamoConfigStore {
    async fn find_period(&self, name: &str) -> Result<Option<PeriodDefinition>, StoreError> {
        match self.get_item(TYPE_PERIOD, name).await? {
            Some(item) => Ok(Some(period_from_item(&item)?)),
            None => Ok(None),
        }
    }

    async fn find_all_periods(&self) -> Result<HashMap<String, PeriodDefinition>, StoreError> {
        let mut periods = HashMap::new();
        for item in self.query_type(TYPE_PERIOD).await? {
            match period_from_item(&item) {
                Ok(def) => {
                    periods.insert(def.name.clone(), def);
                }
                Err(e) => warn!(error = %e, "skipping unreadable period row"),
            }
        }
        Ok(periods)
    }

    async fn put_period(
        &self,
        definition: &PeriodDefinition,
        overwrite: bool,
    ) -> Result<(), StoreError> {
        self.put_item(period_to_item(definition), overwrite, &definition.name)
            .await
    }

    async fn delete_period(&self, name: &str) -> Result<(), StoreError> {
        self.delete_item(TYPE_PERIOD, name).await
    }
}
