use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use aws_sdk_dynamodb::Client as DynamoClient;
use serde_json::Value;

use crate::store::{DocumentStore, Fields, StoreError};

const SORT_KEY: &str = "METADATA";
const BOOKKEEPING: [&str; 4] = ["PK", "SK", "collection", "doc_id"];

/// Single-table [`DocumentStore`]: every document is one item with
/// `PK=<COLLECTION>#<id>` and `SK=METADATA`.
pub struct DynamoStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn partition_key(collection: &str, id: &str) -> String {
    format!("{}#{}", collection.to_uppercase(), id)
}

fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect(),
        ),
    }
}

fn parse_number(raw: &str) -> Option<Value> {
    if let Ok(i) = raw.parse::<i64>() {
        return Some(Value::from(i));
    }
    if let Ok(u) = raw.parse::<u64>() {
        return Some(Value::from(u));
    }
    raw.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn from_attribute(attribute: &AttributeValue) -> Result<Value, String> {
    match attribute {
        AttributeValue::Null(_) => Ok(Value::Null),
        AttributeValue::Bool(b) => Ok(Value::Bool(*b)),
        AttributeValue::S(s) => Ok(Value::String(s.clone())),
        AttributeValue::N(n) => parse_number(n).ok_or_else(|| format!("bad number {}", n)),
        AttributeValue::L(items) => items
            .iter()
            .map(from_attribute)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        AttributeValue::M(map) => map
            .iter()
            .map(|(k, v)| from_attribute(v).map(|v| (k.clone(), v)))
            .collect::<Result<Fields, _>>()
            .map(Value::Object),
        other => Err(format!("unsupported attribute type {:?}", other)),
    }
}

fn item_to_fields(
    collection: &str,
    id: &str,
    item: &HashMap<String, AttributeValue>,
) -> Result<Fields, StoreError> {
    let mut fields = Fields::new();
    for (key, attribute) in item {
        if BOOKKEEPING.contains(&key.as_str()) {
            continue;
        }
        let value = from_attribute(attribute).map_err(|reason| StoreError::Malformed {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: format!("{}: {}", key, reason),
        })?;
        fields.insert(key.clone(), value);
    }
    Ok(fields)
}

/// The id a document was stored under; items written by this store always
/// carry one.
fn document_id(collection: &str, item: &HashMap<String, AttributeValue>) -> Result<String, StoreError> {
    item.get("doc_id")
        .and_then(|v| v.as_s().ok())
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or_else(|| StoreError::Malformed {
            collection: collection.to_string(),
            id: item
                .get("PK")
                .and_then(|v| v.as_s().ok())
                .cloned()
                .unwrap_or_default(),
            reason: "doc_id missing".to_string(),
        })
}

fn backend<E: std::fmt::Debug>(e: E) -> StoreError {
    StoreError::Backend(format!("{:?}", e))
}

#[async_trait]
impl DocumentStore for DynamoStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, StoreError> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(partition_key(collection, id)))
            .key("SK", AttributeValue::S(SORT_KEY.to_string()))
            .send()
            .await
            .map_err(backend)?;

        match result.item() {
            Some(item) => item_to_fields(collection, id, item).map(Some),
            None => Ok(None),
        }
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let mut item: HashMap<String, AttributeValue> = fields
            .iter()
            .map(|(k, v)| (k.clone(), to_attribute(v)))
            .collect();
        item.insert("PK".to_string(), AttributeValue::S(partition_key(collection, id)));
        item.insert("SK".to_string(), AttributeValue::S(SORT_KEY.to_string()));
        item.insert("collection".to_string(), AttributeValue::S(collection.to_string()));
        item.insert("doc_id".to_string(), AttributeValue::S(id.to_string()));

        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn query_equal(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Fields)>, StoreError> {
        let mut documents = Vec::new();
        let mut start_key = None;

        loop {
            let page = self
                .client
                .scan()
                .table_name(&self.table_name)
                .filter_expression("#collection = :collection AND #field = :value")
                .expression_attribute_names("#collection", "collection")
                .expression_attribute_names("#field", field)
                .expression_attribute_values(":collection", AttributeValue::S(collection.to_string()))
                .expression_attribute_values(":value", to_attribute(value))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(backend)?;

            for item in page.items() {
                let id = document_id(collection, item)?;
                let fields = item_to_fields(collection, &id, item)?;
                documents.push((id, fields));
            }

            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(documents)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(partition_key(collection, id)))
            .key("SK", AttributeValue::S(SORT_KEY.to_string()))
            .send()
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let result = self
            .client
            .update_item()
            .table_name(&self.table_name)
            .key("PK", AttributeValue::S(partition_key(collection, id)))
            .key("SK", AttributeValue::S(SORT_KEY.to_string()))
            .update_expression("SET #collection = :collection, doc_id = :doc_id ADD #field :delta")
            .expression_attribute_names("#collection", "collection")
            .expression_attribute_names("#field", field)
            .expression_attribute_values(":collection", AttributeValue::S(collection.to_string()))
            .expression_attribute_values(":doc_id", AttributeValue::S(id.to_string()))
            .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await
            .map_err(backend)?;

        result
            .attributes()
            .and_then(|attributes| attributes.get(field))
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(|| StoreError::Malformed {
                collection: collection.to_string(),
                id: id.to_string(),
                reason: format!("{} missing from increment result", field),
            })
    }
}
