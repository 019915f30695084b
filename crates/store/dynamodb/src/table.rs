use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode, KeySchemaElement, KeyType, ScalarAttributeType,
};

/// Build a DynamoDB client from the default credential chain, with an
/// optional endpoint override for local development.
pub async fn build_client(region: impl Into<String>, endpoint_url: Option<&str>) -> Client {
    let mut loader =
        aws_config::from_env().region(aws_config::Region::new(region.into()));
    if let Some(endpoint) = endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    Client::new(&loader.load().await)
}

/// Create the config table (`type` hash, `name` range).
///
/// Intended for tests and local development; production tables are
/// provisioned by deployment tooling. Idempotent: an already-existing table
/// is not an error.
pub async fn create_config_table(
    client: &Client,
    table_name: &str,
) -> Result<(), aws_sdk_dynamodb::Error> {
    create_table(client, table_name, "type", "name").await
}

/// Create the registry table (`account` hash, `sk` range). Idempotent.
pub async fn create_registry_table(
    client: &Client,
    table_name: &str,
) -> Result<(), aws_sdk_dynamodb::Error> {
    create_table(client, table_name, "account", "sk").await
}

/// Create the maintenance-window mirror table (`account-region` hash,
/// `name-id` range). Idempotent.
pub async fn create_mw_table(
    client: &Client,
    table_name: &str,
) -> Result<(), aws_sdk_dynamodb::Error> {
    create_table(client, table_name, "account-region", "name-id").await
}

async fn create_table(
    client: &Client,
    table_name: &str,
    hash_key: &str,
    range_key: &str,
) -> Result<(), aws_sdk_dynamodb::Error> {
    let result = client
        .create_table()
        .table_name(table_name)
        .billing_mode(BillingMode::PayPerRequest)
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(hash_key)
                .key_type(KeyType::Hash)
                .build()
                .expect("valid key schema"),
        )
        .key_schema(
            KeySchemaElement::builder()
                .attribute_name(range_key)
                .key_type(KeyType::Range)
                .build()
                .expect("valid key schema"),
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(hash_key)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .expect("valid attribute definition"),
        )
        .attribute_definitions(
            AttributeDefinition::builder()
                .attribute_name(range_key)
                .attribute_type(ScalarAttributeType::S)
                .build()
                .expect("valid attribute definition"),
        )
        .send()
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            let service_err = err.into_service_error();
            if service_err.is_resource_in_use_exception() {
                Ok(())
            } else {
                Err(service_err.into())
            }
        }
    }
}
