//! Context codec contract.

use thiserror::Error;

/// Codec failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to encode context: {0}")]
    Encode(String),
    #[error("Failed to decode context: {0}")]
    Decode(String),
}

/// Serializes execution contexts to and from a transportable string form.
///
/// Contract:
/// - `decode(None)` and `decode(Some(""))` return a fresh, empty context
///   rather than failing.
/// - `encode` omits or flags values it cannot faithfully represent instead
///   of erroring; each implementation documents its unsupported types.
/// - Round-trip law: for contexts built purely from supported values,
///   `decode(encode(c))` is behaviorally equivalent to `c` for subsequent
///   executions.
pub trait ContextCodec: Send + Sync {
    /// Live context type this codec handles.
    type Context;

    /// Encode a context into an opaque string blob.
    fn encode(&self, ctx: &Self::Context) -> Result<String, CodecError>;

    /// Decode a blob back into a live context.
    fn decode(&self, blob: Option<&str>) -> Result<Self::Context, CodecError>;
}
