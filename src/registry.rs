use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client;

use crate::error::{Error, Result};
use crate::s3_service::Page;

/// Outcome of a create-table request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableCreation {
    Created,
    AlreadyExists,
}

/// Whether a table can take writes yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    Missing,
    /// creating, deleting or any other state that does not accept writes
    Pending(String),
    /// active, or updating (which still serves reads and writes)
    Active,
}

/// The calls the workflow makes against the key-value registry. Every table has a
/// single string partition key named `key` and no other attributes.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn create_table(&self, table: &str, key: &str) -> Result<TableCreation>;

    async fn table_state(&self, table: &str) -> Result<TableState>;

    async fn put_name(&self, table: &str, key: &str, name: &str) -> Result<()>;

    /// One page of key values. The token is the last key value of the previous page.
    async fn scan_page(
        &self,
        table: &str,
        key: &str,
        token: Option<String>,
        page_size: usize,
    ) -> Result<Page>;

    async fn delete_name(&self, table: &str, key: &str, name: &str) -> Result<()>;
}

/// [`Registry`] backed by an Amazon DynamoDB table.
#[derive(Clone, Debug)]
pub struct DynamoRegistry {
    client: Client,
}

impl DynamoRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn key_item(key: &str, name: &str) -> HashMap<String, AttributeValue> {
    HashMap::from([(key.to_owned(), AttributeValue::S(name.to_owned()))])
}

#[async_trait]
impl Registry for DynamoRegistry {
    async fn create_table(&self, table: &str, key: &str) -> Result<TableCreation> {
        let key_schema = KeySchemaElement::builder()
            .attribute_name(key)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|err| Error::registry(format!("key schema for {table}: {err}")))?;
        let attribute = AttributeDefinition::builder()
            .attribute_name(key)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|err| Error::registry(format!("attribute definition for {table}: {err}")))?;

        let result = self
            .client
            .create_table()
            .table_name(table)
            .key_schema(key_schema)
            .attribute_definitions(attribute)
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await;

        match result {
            Ok(_) => Ok(TableCreation::Created),
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_resource_in_use_exception()) =>
            {
                Ok(TableCreation::AlreadyExists)
            }
            Err(err) => Err(Error::registry(format!(
                "create table {table}: {}",
                DisplayErrorContext(&err)
            ))),
        }
    }

    async fn table_state(&self, table: &str) -> Result<TableState> {
        match self.client.describe_table().table_name(table).send().await {
            Ok(output) => {
                let state = match output.table().and_then(|t| t.table_status()) {
                    Some(TableStatus::Active) | Some(TableStatus::Updating) => TableState::Active,
                    Some(other) => TableState::Pending(other.as_str().to_owned()),
                    None => TableState::Pending("UNKNOWN".to_owned()),
                };
                Ok(state)
            }
            Err(err)
                if err
                    .as_service_error()
                    .map_or(false, |e| e.is_resource_not_found_exception()) =>
            {
                Ok(TableState::Missing)
            }
            Err(err) => Err(Error::registry(format!(
                "describe table {table}: {}",
                DisplayErrorContext(&err)
            ))),
        }
    }

    async fn put_name(&self, table: &str, key: &str, name: &str) -> Result<()> {
        self.client
            .put_item()
            .table_name(table)
            .item(key, AttributeValue::S(name.to_owned()))
            .send()
            .await
            .map_err(|err| {
                Error::registry(format!(
                    "put {name} into {table}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }

    async fn scan_page(
        &self,
        table: &str,
        key: &str,
        token: Option<String>,
        page_size: usize,
    ) -> Result<Page> {
        let output = self
            .client
            .scan()
            .table_name(table)
            .projection_expression("#k")
            .expression_attribute_names("#k", key)
            .limit(i32::try_from(page_size).unwrap_or(i32::MAX))
            .set_exclusive_start_key(token.map(|last| key_item(key, &last)))
            .send()
            .await
            .map_err(|err| {
                Error::registry(format!("scan {table}: {}", DisplayErrorContext(&err)))
            })?;

        let items = output
            .items()
            .iter()
            .filter_map(|item| item.get(key).and_then(|v| v.as_s().ok()).cloned())
            .collect();
        let next = output
            .last_evaluated_key()
            .and_then(|last| last.get(key))
            .and_then(|v| v.as_s().ok())
            .cloned();
        Ok(Page { items, next })
    }

    async fn delete_name(&self, table: &str, key: &str, name: &str) -> Result<()> {
        self.client
            .delete_item()
            .table_name(table)
            .set_key(Some(key_item(key, name)))
            .send()
            .await
            .map_err(|err| {
                Error::registry(format!(
                    "delete {name} from {table}: {}",
                    DisplayErrorContext(&err)
                ))
            })?;
        Ok(())
    }
}
