//! Pluggable conversion between application entities and wire values.

use courier_types::RequestContext;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("serialization failed: {0}")]
pub struct SerializerError(pub String);

/// Converts call arguments, results, notification payloads and request
/// contexts to and from their wire form.
pub trait Serializer: Send + Sync {
    fn serialize_entity(&self, ctxt: &RequestContext, entity: Value) -> Result<Value, SerializerError>;

    fn deserialize_entity(&self, ctxt: &RequestContext, entity: Value) -> Result<Value, SerializerError>;

    fn serialize_context(&self, ctxt: &RequestContext) -> Result<RequestContext, SerializerError>;

    fn deserialize_context(&self, ctxt: &RequestContext) -> Result<RequestContext, SerializerError>;
}

/// Passes everything through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSerializer;

impl Serializer for NoOpSerializer {
    fn serialize_entity(&self, _ctxt: &RequestContext, entity: Value) -> Result<Value, SerializerError> {
        Ok(entity)
    }

    fn deserialize_entity(&self, _ctxt: &RequestContext, entity: Value) -> Result<Value, SerializerError> {
        Ok(entity)
    }

    fn serialize_context(&self, ctxt: &RequestContext) -> Result<RequestContext, SerializerError> {
        Ok(ctxt.clone())
    }

    fn deserialize_context(&self, ctxt: &RequestContext) -> Result<RequestContext, SerializerError> {
        Ok(ctxt.clone())
    }
}
