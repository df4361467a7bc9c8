use serde_json::Value;

/// Transform output: any serializable JSON value. The pipeline never looks
/// inside it; the transform hook is the only producer and the store client
/// the only consumer.
pub type Document = Value;

/// Per-record hook applied between the partition stream and the bulk buffer.
/// Supplied by the caller at construction time and invoked synchronously for
/// every record; an error drops the record (the offset is still committed).
pub trait Transform: Send + Sync {
    fn apply(&self, topic: &str, payload: &[u8]) -> anyhow::Result<Document>;
}

impl<F> Transform for F
where
    F: Fn(&str, &[u8]) -> anyhow::Result<Document> + Send + Sync,
{
    fn apply(&self, topic: &str, payload: &[u8]) -> anyhow::Result<Document> {
        self(topic, payload)
    }
}

/// Default transform used by the service binary: forward the payload as JSON,
/// falling back to wrapping non-JSON payloads as a string message. Library
/// callers supply their own hook.
pub struct JsonPassthrough;

impl Transform for JsonPassthrough {
    fn apply(&self, _topic: &str, payload: &[u8]) -> anyhow::Result<Document> {
        match serde_json::from_slice(payload) {
            Ok(value) => Ok(value),
            Err(_) => Ok(serde_json::json!({
                "message": String::from_utf8_lossy(payload),
            })),
        }
    }
}
