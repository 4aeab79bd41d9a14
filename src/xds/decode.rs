//! Two-stage resource decoding.
//!
//! # Data Flow
//! ```text
//! outer Any (type_url = policy chain type or google.protobuf.Any)
//!     → unwrap_envelope    → InnerPayload (Any holding a google.protobuf.Struct)
//!     → decode_payload     → PolicyDocument (JSON)
//!     → into_config        → StoredPolicyConfig
//! ```
//!
//! # Design Decisions
//! - Each stage has its own error variant so callers can tell a broken
//!   envelope from a broken document
//! - Single-wrapped payloads (outer Any already holding the Struct) are
//!   accepted as well

use prost::Message;
use prost_types::value::Kind;
use prost_types::{Any, ListValue, Struct, Value};
use serde_json::{Map, Number, Value as Json};
use thiserror::Error;

use crate::xds::proto::POLICY_CHAIN_TYPE_URL;
use crate::xds::types::StoredPolicyConfig;

pub const ANY_TYPE_URL: &str = "type.googleapis.com/google.protobuf.Any";
pub const STRUCT_TYPE_URL: &str = "type.googleapis.com/google.protobuf.Struct";

/// Structural decode failures. Any of these rejects the whole batch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("outer envelope malformed: {0}")]
    Envelope(String),

    #[error("inner payload malformed: {0}")]
    Payload(String),
}

/// Result of the first stage: the container that holds the document.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerPayload(pub Any);

/// Result of the second stage: the document as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDocument(pub Json);

/// Stage one: strip the outer type-erased envelope.
pub fn unwrap_envelope(outer: &Any) -> Result<InnerPayload, DecodeError> {
    match outer.type_url.as_str() {
        POLICY_CHAIN_TYPE_URL | ANY_TYPE_URL => Any::decode(outer.value.as_slice())
            .map(InnerPayload)
            .map_err(|e| DecodeError::Envelope(format!("cannot decode nested Any: {}", e))),
        STRUCT_TYPE_URL => Ok(InnerPayload(outer.clone())),
        other => Err(DecodeError::Envelope(format!("unsupported type_url '{}'", other))),
    }
}

/// Stage two: decode the inner container's Struct into JSON.
pub fn decode_payload(inner: &InnerPayload) -> Result<PolicyDocument, DecodeError> {
    if inner.0.type_url != STRUCT_TYPE_URL {
        return Err(DecodeError::Payload(format!(
            "expected {}, got '{}'",
            STRUCT_TYPE_URL, inner.0.type_url
        )));
    }
    let document = Struct::decode(inner.0.value.as_slice())
        .map_err(|e| DecodeError::Payload(format!("cannot decode Struct: {}", e)))?;
    Ok(PolicyDocument(struct_to_json(document)))
}

impl PolicyDocument {
    pub fn into_config(self) -> Result<StoredPolicyConfig, DecodeError> {
        serde_json::from_value(self.0)
            .map_err(|e| DecodeError::Payload(format!("not a policy configuration: {}", e)))
    }
}

/// Run both stages on one resource.
pub fn decode_resource(outer: &Any) -> Result<StoredPolicyConfig, DecodeError> {
    let inner = unwrap_envelope(outer)?;
    decode_payload(&inner)?.into_config()
}

fn struct_to_json(document: Struct) -> Json {
    Json::Object(
        document
            .fields
            .into_iter()
            .map(|(k, v)| (k, value_to_json(v)))
            .collect(),
    )
}

fn value_to_json(value: Value) -> Json {
    match value.kind {
        None | Some(Kind::NullValue(_)) => Json::Null,
        Some(Kind::BoolValue(b)) => Json::Bool(b),
        Some(Kind::StringValue(s)) => Json::String(s),
        Some(Kind::NumberValue(n)) => number_to_json(n),
        Some(Kind::StructValue(s)) => struct_to_json(s),
        Some(Kind::ListValue(list)) => Json::Array(list.values.into_iter().map(value_to_json).collect()),
    }
}

/// Struct numbers are all doubles; integral values come back as integers so
/// integer-typed parameters validate.
fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Json::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Json::Null, Json::Number)
    }
}

/// Convert a JSON object into a `google.protobuf.Struct`.
pub fn json_to_struct(object: Map<String, Json>) -> Struct {
    Struct {
        fields: object.into_iter().map(|(k, v)| (k, json_to_value(v))).collect(),
    }
}

fn json_to_value(json: Json) -> Value {
    let kind = match json {
        Json::Null => Kind::NullValue(0),
        Json::Bool(b) => Kind::BoolValue(b),
        Json::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Json::String(s) => Kind::StringValue(s),
        Json::Array(items) => Kind::ListValue(ListValue {
            values: items.into_iter().map(json_to_value).collect(),
        }),
        Json::Object(map) => Kind::StructValue(json_to_struct(map)),
    };
    Value { kind: Some(kind) }
}

/// Wrap a policy document the way control planes deliver it: a Struct inside
/// an Any inside an Any.
pub fn encode_resource(document: Map<String, Json>) -> Any {
    let inner = Any {
        type_url: STRUCT_TYPE_URL.to_string(),
        value: json_to_struct(document).encode_to_vec(),
    };
    Any {
        type_url: POLICY_CHAIN_TYPE_URL.to_string(),
        value: inner.encode_to_vec(),
    }
}
