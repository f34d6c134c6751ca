//! Administrative gateway.
//!
//! [`AdminGateway`] is the narrow trait the catalog and the position
//! resolver depend on. [`HttpAdminGateway`] implements it against the
//! broker's admin v2 REST surface with `reqwest`. The gateway reports
//! failures and never retries; retry policy belongs to callers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AdminError, AdminErrorKind};
use crate::position::MessageId;
use crate::schema::{FieldDef, PrimitiveKind, SchemaDescriptor, StructFormat};
use crate::topic::TopicName;

/// Administrative operations against the messaging backend.
#[async_trait]
pub trait AdminGateway: Send + Sync {
    /// Lists all tenants.
    async fn list_tenants(&self) -> Result<Vec<String>, AdminError>;

    /// Lists namespaces of a tenant as `tenant/namespace` names.
    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>, AdminError>;

    /// Lists all persistent topics of a `tenant/namespace`.
    ///
    /// Partitions of partitioned topics appear individually with their
    /// `-partition-<n>` suffix; callers collapse them to logical names.
    async fn list_topics(&self, namespace: &str) -> Result<Vec<TopicName>, AdminError>;

    /// Returns the partition count of a partitioned topic, or `None` for a
    /// non-partitioned topic.
    async fn partitioned_topic_partitions(
        &self,
        topic: &TopicName,
    ) -> Result<Option<u32>, AdminError>;

    /// Returns `true` if the topic exists in either form.
    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, AdminError>;

    /// Creates a topic. `partitions == 0` creates a non-partitioned topic.
    async fn create_topic(&self, topic: &TopicName, partitions: u32) -> Result<(), AdminError>;

    /// Deletes a topic. `force` disconnects live producers and consumers.
    async fn delete_topic(&self, topic: &TopicName, force: bool) -> Result<(), AdminError>;

    /// Fetches the topic's declared schema, `None` if it has none.
    async fn get_schema(&self, topic: &TopicName) -> Result<Option<SchemaDescriptor>, AdminError>;

    /// Declares the topic's schema.
    async fn declare_schema(
        &self,
        topic: &TopicName,
        descriptor: &SchemaDescriptor,
    ) -> Result<(), AdminError>;

    /// Latest message position of one partition, `None` if empty.
    async fn latest_position(
        &self,
        topic: &TopicName,
        partition: i32,
    ) -> Result<Option<MessageId>, AdminError>;

    /// First position with publish time at or after `millis`, `None` if the
    /// partition holds nothing that late.
    async fn position_for_time(
        &self,
        topic: &TopicName,
        partition: i32,
        millis: u64,
    ) -> Result<Option<MessageId>, AdminError>;
}

/// Schema payload exchanged with the schema registry endpoints.
#[derive(Debug, Serialize, Deserialize)]
struct SchemaPayload {
    #[serde(rename = "type")]
    schema_type: String,
    #[serde(default)]
    data: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    properties: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LastMessageIdResponse {
    #[serde(rename = "ledgerId")]
    ledger_id: i64,
    #[serde(rename = "entryId")]
    entry_id: i64,
}

#[derive(Debug, Deserialize)]
struct PartitionedMetadata {
    partitions: u32,
}

/// Maps a schema descriptor to its registry payload.
fn descriptor_to_payload(descriptor: &SchemaDescriptor) -> SchemaPayload {
    let (schema_type, data) = match descriptor {
        SchemaDescriptor::Primitive(kind) => {
            let name = match kind {
                PrimitiveKind::Boolean => "BOOLEAN",
                PrimitiveKind::Int8 => "INT8",
                PrimitiveKind::Int16 => "INT16",
                PrimitiveKind::Int32 => "INT32",
                PrimitiveKind::Int64 => "INT64",
                PrimitiveKind::Float => "FLOAT",
                PrimitiveKind::Double => "DOUBLE",
                PrimitiveKind::String => "STRING",
                PrimitiveKind::Bytes => "BYTES",
            };
            (name.to_string(), String::new())
        }
        SchemaDescriptor::Structured { format, fields } => {
            let name = match format {
                StructFormat::Avro => "AVRO",
                StructFormat::Json => "JSON",
            };
            (name.to_string(), fields_to_record_json(fields))
        }
        SchemaDescriptor::Raw => ("NONE".to_string(), String::new()),
    };
    SchemaPayload {
        schema_type,
        data,
        properties: HashMap::new(),
    }
}

fn fields_to_record_json(fields: &[FieldDef]) -> String {
    use arrow_schema::DataType;
    let avro_fields: Vec<serde_json::Value> = fields
        .iter()
        .map(|f| {
            let type_name = match f.data_type {
                DataType::Boolean => "boolean",
                DataType::Int8 | DataType::Int16 | DataType::Int32 => "int",
                DataType::Int64 => "long",
                DataType::Float32 => "float",
                DataType::Float64 => "double",
                DataType::Binary => "bytes",
                _ => "string",
            };
            let ty: serde_json::Value = if f.nullable {
                serde_json::json!(["null", type_name])
            } else {
                serde_json::json!(type_name)
            };
            serde_json::json!({ "name": f.name, "type": ty })
        })
        .collect();
    serde_json::json!({
        "type": "record",
        "name": "Row",
        "fields": avro_fields,
    })
    .to_string()
}

/// Widens field types the registry's record JSON cannot represent exactly.
///
/// The record JSON has a single integer type below `long`, so `Int8` and
/// `Int16` fields of a structured schema read back as `Int32`. Comparisons
/// between a declared layout and a registry round trip must go through
/// this view on both sides. Primitive descriptors keep their exact type
/// names and pass through unchanged.
#[must_use]
pub fn registry_widened(descriptor: &SchemaDescriptor) -> SchemaDescriptor {
    use arrow_schema::DataType;
    match descriptor {
        SchemaDescriptor::Structured { format, fields } => SchemaDescriptor::Structured {
            format: *format,
            fields: fields
                .iter()
                .map(|f| {
                    let data_type = match f.data_type {
                        DataType::Int8 | DataType::Int16 => DataType::Int32,
                        ref other => other.clone(),
                    };
                    FieldDef::new(f.name.clone(), data_type, f.nullable)
                })
                .collect(),
        },
        other => other.clone(),
    }
}

/// Maps a registry payload back to a schema descriptor.
fn payload_to_descriptor(payload: &SchemaPayload) -> Result<SchemaDescriptor, AdminError> {
    let primitive = |kind| Ok(SchemaDescriptor::Primitive(kind));
    match payload.schema_type.as_str() {
        "BOOLEAN" => primitive(PrimitiveKind::Boolean),
        "INT8" => primitive(PrimitiveKind::Int8),
        "INT16" => primitive(PrimitiveKind::Int16),
        "INT32" => primitive(PrimitiveKind::Int32),
        "INT64" => primitive(PrimitiveKind::Int64),
        "FLOAT" => primitive(PrimitiveKind::Float),
        "DOUBLE" => primitive(PrimitiveKind::Double),
        "STRING" => primitive(PrimitiveKind::String),
        "BYTES" => primitive(PrimitiveKind::Bytes),
        "NONE" => Ok(SchemaDescriptor::Raw),
        t @ ("AVRO" | "JSON") => {
            let format = if t == "AVRO" {
                StructFormat::Avro
            } else {
                StructFormat::Json
            };
            let fields = record_json_to_fields(&payload.data)?;
            Ok(SchemaDescriptor::Structured { format, fields })
        }
        other => Err(AdminError::new(
            AdminErrorKind::Backend,
            format!("unrecognized schema type '{other}'"),
        )),
    }
}

fn record_json_to_fields(data: &str) -> Result<Vec<FieldDef>, AdminError> {
    use arrow_schema::DataType;

    let parse_err = |msg: String| AdminError::new(AdminErrorKind::Backend, msg);
    let record: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| parse_err(format!("malformed schema data: {e}")))?;
    let fields = record
        .get("fields")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| parse_err("schema data missing 'fields'".into()))?;

    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let name = field
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| parse_err("schema field missing 'name'".into()))?;
        let ty = field
            .get("type")
            .ok_or_else(|| parse_err(format!("schema field '{name}' missing 'type'")))?;

        // Either a bare type name or a ["null", T] union
        let (type_name, nullable) = match ty {
            serde_json::Value::String(s) => (s.as_str(), false),
            serde_json::Value::Array(branches) => {
                let non_null = branches
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .find(|s| *s != "null")
                    .ok_or_else(|| parse_err(format!("schema field '{name}' has no type")))?;
                (non_null, true)
            }
            other => {
                return Err(parse_err(format!(
                    "unsupported schema field type for '{name}': {other}"
                )))
            }
        };
        let data_type = match type_name {
            "boolean" => DataType::Boolean,
            "int" => DataType::Int32,
            "long" => DataType::Int64,
            "float" => DataType::Float32,
            "double" => DataType::Float64,
            "string" => DataType::Utf8,
            "bytes" => DataType::Binary,
            other => {
                return Err(parse_err(format!(
                    "unsupported schema field type '{other}' for '{name}'"
                )))
            }
        };
        out.push(FieldDef::new(name, data_type, nullable));
    }
    Ok(out)
}

/// Admin gateway over the broker's admin v2 REST API.
pub struct HttpAdminGateway {
    base_url: String,
    client: reqwest::Client,
    auth_params: Option<String>,
}

impl HttpAdminGateway {
    /// Creates a gateway for the given admin URL.
    ///
    /// `auth_params` is passed through verbatim as the Authorization header
    /// value when present.
    #[must_use]
    pub fn new(admin_url: impl Into<String>, auth_params: Option<String>) -> Self {
        Self {
            base_url: admin_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            auth_params,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/admin/v2/{path}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(auth) = &self.auth_params {
            req = req.header(reqwest::header::AUTHORIZATION, auth);
        }
        req
    }

    async fn check(
        &self,
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<reqwest::Response, AdminError> {
        let response = response
            .map_err(|e| AdminError::new(AdminErrorKind::Network, e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let kind = match status.as_u16() {
            404 => AdminErrorKind::NotFound,
            401 | 403 => AdminErrorKind::Unauthorized,
            409 => AdminErrorKind::Conflict,
            _ => AdminErrorKind::Backend,
        };
        let body = response.text().await.unwrap_or_default();
        Err(AdminError::new(kind, format!("{status}: {body}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, AdminError> {
        let response = self.request(reqwest::Method::GET, path).send().await;
        self.check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AdminError::new(AdminErrorKind::Backend, e.to_string()))
    }

    fn topic_path(topic: &TopicName) -> String {
        format!("{}/{}/{}/{}", topic.domain, topic.tenant, topic.namespace, topic.local)
    }

    fn partition_path(topic: &TopicName, partition: i32) -> String {
        if partition < 0 {
            Self::topic_path(topic)
        } else {
            Self::topic_path(&topic.partition(partition))
        }
    }
}

#[async_trait]
impl AdminGateway for HttpAdminGateway {
    async fn list_tenants(&self) -> Result<Vec<String>, AdminError> {
        self.get_json("tenants").await
    }

    async fn list_namespaces(&self, tenant: &str) -> Result<Vec<String>, AdminError> {
        self.get_json(&format!("namespaces/{tenant}")).await
    }

    async fn list_topics(&self, namespace: &str) -> Result<Vec<TopicName>, AdminError> {
        let names: Vec<String> = self.get_json(&format!("persistent/{namespace}")).await?;
        let mut topics = Vec::with_capacity(names.len());
        for name in names {
            topics.push(
                TopicName::parse(&name)
                    .map_err(|e| AdminError::new(AdminErrorKind::Backend, e.to_string()))?,
            );
        }
        Ok(topics)
    }

    async fn partitioned_topic_partitions(
        &self,
        topic: &TopicName,
    ) -> Result<Option<u32>, AdminError> {
        let path = format!("{}/partitions", Self::topic_path(topic));
        match self.get_json::<PartitionedMetadata>(&path).await {
            Ok(meta) if meta.partitions > 0 => Ok(Some(meta.partitions)),
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn topic_exists(&self, topic: &TopicName) -> Result<bool, AdminError> {
        if self.partitioned_topic_partitions(topic).await?.is_some() {
            return Ok(true);
        }
        let topics = self.list_topics(&topic.database()).await?;
        Ok(topics.iter().any(|t| t.local == topic.local))
    }

    async fn create_topic(&self, topic: &TopicName, partitions: u32) -> Result<(), AdminError> {
        debug!(topic = %topic, partitions, "creating topic");
        let response = if partitions == 0 {
            self.request(
                reqwest::Method::PUT,
                &Self::topic_path(topic),
            )
            .send()
            .await
        } else {
            self.request(
                reqwest::Method::PUT,
                &format!("{}/partitions", Self::topic_path(topic)),
            )
            .json(&partitions)
            .send()
            .await
        };
        self.check(response).await.map(|_| ())
    }

    async fn delete_topic(&self, topic: &TopicName, force: bool) -> Result<(), AdminError> {
        debug!(topic = %topic, force, "deleting topic");
        let path = if self.partitioned_topic_partitions(topic).await?.is_some() {
            format!("{}/partitions?force={force}", Self::topic_path(topic))
        } else {
            format!("{}?force={force}", Self::topic_path(topic))
        };
        let response = self.request(reqwest::Method::DELETE, &path).send().await;
        self.check(response).await.map(|_| ())
    }

    async fn get_schema(&self, topic: &TopicName) -> Result<Option<SchemaDescriptor>, AdminError> {
        let path = format!(
            "schemas/{}/{}/{}/schema",
            topic.tenant, topic.namespace, topic.local
        );
        match self.get_json::<SchemaPayload>(&path).await {
            Ok(payload) => payload_to_descriptor(&payload).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn declare_schema(
        &self,
        topic: &TopicName,
        descriptor: &SchemaDescriptor,
    ) -> Result<(), AdminError> {
        let path = format!(
            "schemas/{}/{}/{}/schema",
            topic.tenant, topic.namespace, topic.local
        );
        let payload = descriptor_to_payload(descriptor);
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&payload)
            .send()
            .await;
        self.check(response).await.map(|_| ())
    }

    async fn latest_position(
        &self,
        topic: &TopicName,
        partition: i32,
    ) -> Result<Option<MessageId>, AdminError> {
        let path = format!("{}/lastMessageId", Self::partition_path(topic, partition));
        let last: LastMessageIdResponse = self.get_json(&path).await?;
        // An empty partition reports entryId -1
        if last.ledger_id < 0 || last.entry_id < 0 {
            return Ok(None);
        }
        #[allow(clippy::cast_sign_loss)]
        Ok(Some(MessageId::new(
            last.ledger_id as u64,
            last.entry_id as u64,
        )))
    }

    async fn position_for_time(
        &self,
        topic: &TopicName,
        partition: i32,
        millis: u64,
    ) -> Result<Option<MessageId>, AdminError> {
        let path = format!(
            "{}/messageid/{millis}",
            Self::partition_path(topic, partition)
        );
        match self.get_json::<LastMessageIdResponse>(&path).await {
            Ok(id) if id.ledger_id >= 0 && id.entry_id >= 0 =>
            {
                #[allow(clippy::cast_sign_loss)]
                Ok(Some(MessageId::new(id.ledger_id as u64, id.entry_id as u64)))
            }
            Ok(_) => Ok(None),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::DataType;

    #[test]
    fn test_primitive_payload_round_trip() {
        let descriptor = SchemaDescriptor::Primitive(PrimitiveKind::Int64);
        let payload = descriptor_to_payload(&descriptor);
        assert_eq!(payload.schema_type, "INT64");
        assert_eq!(payload_to_descriptor(&payload).unwrap(), descriptor);
    }

    #[test]
    fn test_structured_payload_round_trip() {
        let descriptor = SchemaDescriptor::Structured {
            format: StructFormat::Json,
            fields: vec![
                FieldDef::new("oid", DataType::Int32, false),
                FieldDef::new("name", DataType::Utf8, true),
            ],
        };
        let payload = descriptor_to_payload(&descriptor);
        assert_eq!(payload.schema_type, "JSON");
        assert!(payload.data.contains("\"name\":\"oid\""));

        let back = payload_to_descriptor(&payload).unwrap();
        assert_eq!(back, descriptor);
    }

    #[test]
    fn test_narrow_int_fields_widen_on_round_trip() {
        let descriptor = SchemaDescriptor::Structured {
            format: StructFormat::Json,
            fields: vec![
                FieldDef::new("flag", DataType::Int8, false),
                FieldDef::new("code", DataType::Int16, true),
                FieldDef::new("oid", DataType::Int64, false),
            ],
        };
        let payload = descriptor_to_payload(&descriptor);
        let back = payload_to_descriptor(&payload).unwrap();

        // The registry has one integer type below long; read-back widens
        assert_ne!(back, descriptor);
        assert_eq!(back, registry_widened(&descriptor));
        let SchemaDescriptor::Structured { fields, .. } = back else {
            panic!("expected structured descriptor");
        };
        assert_eq!(fields[0].data_type, DataType::Int32);
        assert_eq!(fields[1].data_type, DataType::Int32);
        assert_eq!(fields[2].data_type, DataType::Int64);
    }

    #[test]
    fn test_registry_widened_is_idempotent_for_primitives() {
        let descriptor = SchemaDescriptor::Primitive(PrimitiveKind::Int8);
        assert_eq!(registry_widened(&descriptor), descriptor);
        assert_eq!(registry_widened(&SchemaDescriptor::Raw), SchemaDescriptor::Raw);
    }

    #[test]
    fn test_raw_payload() {
        let payload = descriptor_to_payload(&SchemaDescriptor::Raw);
        assert_eq!(payload.schema_type, "NONE");
        assert_eq!(
            payload_to_descriptor(&payload).unwrap(),
            SchemaDescriptor::Raw
        );
    }

    #[test]
    fn test_unknown_schema_type_rejected() {
        let payload = SchemaPayload {
            schema_type: "PROTOBUF_NATIVE".into(),
            data: String::new(),
            properties: HashMap::new(),
        };
        assert!(payload_to_descriptor(&payload).is_err());
    }

    #[test]
    fn test_malformed_record_data_rejected() {
        let payload = SchemaPayload {
            schema_type: "AVRO".into(),
            data: "not json".into(),
            properties: HashMap::new(),
        };
        assert!(payload_to_descriptor(&payload).is_err());
    }
}
