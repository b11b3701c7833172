//! Binary sub-message codec.
//!
//! Some data points carry a nested, separately-encoded structure instead
//! of a scalar: the wire value is a base64 text blob wrapping a
//! length-prefixed binary body. The schemas themselves are opaque to the
//! rest of the layer; this module maps schema ids to encode/decode pairs
//! and keeps decode failures non-fatal.
//!
//! Blob layout: 4-byte little-endian body length, then the body, the
//! whole thing base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use tracing::warn;

use crate::error::{DeviceError, DeviceResult};
use crate::states::{ControlVerb, WorkStatus};

/// One registered sub-message schema: structured value ↔ binary body.
pub trait SubMessageSchema: Send + Sync {
    /// Encode a structured value into the binary body.
    fn encode(&self, value: &Value) -> DeviceResult<Vec<u8>>;
    /// Decode a binary body back into a structured value.
    fn decode(&self, body: &[u8]) -> DeviceResult<Value>;
}

/// Schema backed by a serde type with a bincode body.
struct TypedSchema<T> {
    id: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> SubMessageSchema for TypedSchema<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, value: &Value) -> DeviceResult<Vec<u8>> {
        let typed: T = serde_json::from_value(value.clone()).map_err(|err| {
            DeviceError::Encode {
                schema: self.id.to_string(),
                reason: err.to_string(),
            }
        })?;
        bincode::serialize(&typed).map_err(|err| DeviceError::Encode {
            schema: self.id.to_string(),
            reason: err.to_string(),
        })
    }

    fn decode(&self, body: &[u8]) -> DeviceResult<Value> {
        let typed: T = bincode::deserialize(body).map_err(|err| DeviceError::Decode {
            schema: self.id.to_string(),
            reason: err.to_string(),
        })?;
        serde_json::to_value(typed).map_err(|err| DeviceError::Decode {
            schema: self.id.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Mode-control request body: the verb a novel-generation command sends
/// through the shared work-control data point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeCtrlRequest {
    pub method: ControlVerb,
}

/// Work-status report body published by novel-generation devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkStatusReport {
    pub state: WorkStatus,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub charging: bool,
    #[serde(default)]
    pub battery: Option<u8>,
}

/// Schema id for [`ModeCtrlRequest`].
pub const SCHEMA_MODE_CTRL: &str = "mode_ctrl_request";
/// Schema id for [`WorkStatusReport`].
pub const SCHEMA_WORK_STATUS: &str = "work_status_report";

/// Registry of sub-message schemas keyed by id.
pub struct SubMessageCodec {
    schemas: HashMap<&'static str, Box<dyn SubMessageSchema>>,
}

impl SubMessageCodec {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Registry with the schemas this layer ships.
    pub fn with_builtin_schemas() -> Self {
        let mut codec = Self::new();
        codec.register(
            SCHEMA_MODE_CTRL,
            Box::new(TypedSchema::<ModeCtrlRequest>::new(SCHEMA_MODE_CTRL)),
        );
        codec.register(
            SCHEMA_WORK_STATUS,
            Box::new(TypedSchema::<WorkStatusReport>::new(SCHEMA_WORK_STATUS)),
        );
        codec
    }

    /// Register a schema, replacing any previous one under the same id.
    pub fn register(&mut self, id: &'static str, schema: Box<dyn SubMessageSchema>) {
        self.schemas.insert(id, schema);
    }

    /// Encode a structured value into a transport blob.
    pub fn encode_blob(&self, schema_id: &str, value: &Value) -> DeviceResult<String> {
        let schema = self
            .schemas
            .get(schema_id)
            .ok_or_else(|| DeviceError::UnknownSchema(schema_id.to_string()))?;

        let body = schema.encode(value)?;
        let mut framed = Vec::with_capacity(4 + body.len());
        framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
        framed.extend_from_slice(&body);
        Ok(BASE64.encode(framed))
    }

    /// Decode a transport blob into a structured value.
    pub fn decode_blob(&self, schema_id: &str, blob: &str) -> DeviceResult<Value> {
        let schema = self
            .schemas
            .get(schema_id)
            .ok_or_else(|| DeviceError::UnknownSchema(schema_id.to_string()))?;

        let framed = BASE64.decode(blob.trim()).map_err(|err| DeviceError::Decode {
            schema: schema_id.to_string(),
            reason: format!("invalid base64: {err}"),
        })?;

        if framed.len() < 4 {
            return Err(DeviceError::Decode {
                schema: schema_id.to_string(),
                reason: "blob shorter than length prefix".into(),
            });
        }
        let declared = u32::from_le_bytes([framed[0], framed[1], framed[2], framed[3]]) as usize;
        let body = &framed[4..];
        if declared != body.len() {
            return Err(DeviceError::Decode {
                schema: schema_id.to_string(),
                reason: format!("length prefix {declared} != body length {}", body.len()),
            });
        }

        schema.decode(body)
    }

    /// Decode with the non-fatal fallback the reconciler relies on: on
    /// any failure the raw blob is returned unchanged and the failure is
    /// logged, never propagated.
    pub fn decode_or_raw(&self, schema_id: &str, blob: &str) -> Value {
        match self.decode_blob(schema_id, blob) {
            Ok(value) => value,
            Err(err) => {
                warn!("sub-message decode failed, keeping raw value: {err}");
                Value::String(blob.to_string())
            }
        }
    }
}

impl Default for SubMessageCodec {
    fn default() -> Self {
        Self::with_builtin_schemas()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mode_ctrl_round_trip() {
        let codec = SubMessageCodec::with_builtin_schemas();
        let value = json!({ "method": "RESUME_TASK" });

        let blob = codec.encode_blob(SCHEMA_MODE_CTRL, &value).unwrap();
        let decoded = codec.decode_blob(SCHEMA_MODE_CTRL, &blob).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_work_status_round_trip() {
        let codec = SubMessageCodec::with_builtin_schemas();
        let value = json!({
            "state": "charging",
            "mode": "auto",
            "charging": true,
            "battery": 87
        });

        let blob = codec.encode_blob(SCHEMA_WORK_STATUS, &value).unwrap();
        let decoded = codec.decode_blob(SCHEMA_WORK_STATUS, &blob).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_unknown_schema_is_an_error() {
        let codec = SubMessageCodec::with_builtin_schemas();
        let result = codec.encode_blob("no_such_schema", &json!({}));
        assert!(matches!(result, Err(DeviceError::UnknownSchema(_))));
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_raw() {
        let codec = SubMessageCodec::with_builtin_schemas();

        // Not base64 at all.
        let raw = codec.decode_or_raw(SCHEMA_WORK_STATUS, "%%%not-base64%%%");
        assert_eq!(raw, json!("%%%not-base64%%%"));

        // Valid base64, broken length prefix.
        let blob = BASE64.encode([9u8, 0, 0, 0, 1]);
        let raw = codec.decode_or_raw(SCHEMA_WORK_STATUS, &blob);
        assert_eq!(raw, Value::String(blob));
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let codec = SubMessageCodec::with_builtin_schemas();
        let blob = BASE64.encode([1u8, 0]);
        assert!(matches!(
            codec.decode_blob(SCHEMA_WORK_STATUS, &blob),
            Err(DeviceError::Decode { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_mismatched_shape() {
        let codec = SubMessageCodec::with_builtin_schemas();
        let result = codec.encode_blob(SCHEMA_MODE_CTRL, &json!({ "method": 42 }));
        assert!(matches!(result, Err(DeviceError::Encode { .. })));
    }
}
