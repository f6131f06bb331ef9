use std::io::Write;

use ciborium::value::Value;
use uuid::Uuid;
use zeroize::Zeroize;

pub const OIC_JSON_RT_NAME: &str = "rt";
pub const OIC_JSON_IF_NAME: &str = "if";
pub const OIC_JSON_ROWNERID_NAME: &str = "rowneruuid";
pub const OC_RSRVD_INTERFACE_DEFAULT: &str = "oic.if.baseline";
pub const WILDCARD_RESOURCE_URI: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("cbor: {0}")]                    Cbor(String),
    #[error("expected map")]                 NotAMap,
    #[error("missing key: {0}")]             MissingKey(&'static str),
    #[error("wrong type for key: {0}")]      WrongType(&'static str),
    #[error("invalid uuid: {0:?}")]          InvalidUuid(String),
    #[error("unknown credential type: {0}")] UnknownCredType(u64),
    #[error("value out of range: {0}")]      OutOfRange(&'static str),
    #[error("empty list: {0}")]              EmptyList(&'static str),
    #[error("empty payload")]                Empty,
    #[error("buffer too small ({capacity} bytes)")]
    BufferTooSmall { capacity: usize },
    #[error("payload exceeds {0} bytes")]    TooLarge(usize),
}

/// Starting size and hard ceiling for one resource's encode loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeBudget {
    pub initial: usize,
    pub ceiling: usize,
}

struct BoundedWriter {
    buf: Vec<u8>,
    capacity: usize,
}

impl Write for BoundedWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        if self.buf.len() + data.len() > self.capacity {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "cbor output buffer full",
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Single encode attempt into a buffer of exactly `capacity` bytes.
pub fn encode_with_capacity(value: &Value, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let mut writer = BoundedWriter { buf: Vec::with_capacity(capacity), capacity };
    let result = ciborium::into_writer(value, &mut writer);
    if result.is_err() {
        // partial output may hold key material
        writer.buf.zeroize();
    }
    match result {
        Ok(()) => Ok(writer.buf),
        Err(ciborium::ser::Error::Io(e)) if e.kind() == std::io::ErrorKind::WriteZero => {
            Err(CodecError::BufferTooSmall { capacity })
        }
        Err(e) => Err(CodecError::Cbor(e.to_string())),
    }
}

/// Encode `value`, doubling the buffer on overflow until `budget.ceiling`.
pub fn encode_bounded(value: &Value, budget: EncodeBudget) -> Result<Vec<u8>, CodecError> {
    let mut capacity = budget.initial.clamp(1, budget.ceiling.max(1));
    loop {
        match encode_with_capacity(value, capacity) {
            Err(CodecError::BufferTooSmall { .. }) if capacity < budget.ceiling => {
                let grown = capacity.saturating_mul(2).min(budget.ceiling);
                tracing::trace!(from = capacity, to = grown, "cbor buffer too small, retrying");
                capacity = grown;
            }
            Err(CodecError::BufferTooSmall { .. }) => {
                return Err(CodecError::TooLarge(budget.ceiling));
            }
            other => return other,
        }
    }
}

// Decoding helpers

pub(crate) fn parse_cbor_map(data: &[u8]) -> Result<Vec<(Value, Value)>, CodecError> {
    let value: Value = ciborium::from_reader(data)
        .map_err(|e| CodecError::Cbor(e.to_string()))?;
    match value {
        Value::Map(map) => Ok(map),
        _ => Err(CodecError::NotAMap),
    }
}

pub(crate) fn cbor_get_str<'a>(map: &'a [(Value, Value)], key: &str) -> Option<&'a Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Text(s) if s == key))
        .map(|(_, v)| v)
}

pub(crate) fn cbor_bytes(v: &Value) -> Option<&[u8]> {
    match v { Value::Bytes(b) => Some(b), _ => None }
}

pub(crate) fn cbor_text(v: &Value) -> Option<&str> {
    match v { Value::Text(s) => Some(s), _ => None }
}

pub(crate) fn cbor_bool(v: &Value) -> Option<bool> {
    match v { Value::Bool(b) => Some(*b), _ => None }
}

pub(crate) fn cbor_map(v: &Value) -> Option<&[(Value, Value)]> {
    match v { Value::Map(m) => Some(m), _ => None }
}

pub(crate) fn cbor_array(v: &Value) -> Option<&[Value]> {
    match v { Value::Array(a) => Some(a), _ => None }
}

pub(crate) fn cbor_uint(v: &Value) -> Option<u64> {
    match v { Value::Integer(i) => u64::try_from(*i).ok(), _ => None }
}

pub(crate) fn require<'a>(
    map: &'a [(Value, Value)],
    key: &'static str,
) -> Result<&'a Value, CodecError> {
    cbor_get_str(map, key).ok_or(CodecError::MissingKey(key))
}

pub(crate) fn expect_text<'a>(v: &'a Value, key: &'static str) -> Result<&'a str, CodecError> {
    cbor_text(v).ok_or(CodecError::WrongType(key))
}

pub(crate) fn expect_uint(v: &Value, key: &'static str) -> Result<u64, CodecError> {
    cbor_uint(v).ok_or(CodecError::WrongType(key))
}

pub(crate) fn expect_array<'a>(v: &'a Value, key: &'static str) -> Result<&'a [Value], CodecError> {
    cbor_array(v).ok_or(CodecError::WrongType(key))
}

pub(crate) fn expect_map<'a>(
    v: &'a Value,
    key: &'static str,
) -> Result<&'a [(Value, Value)], CodecError> {
    cbor_map(v).ok_or(CodecError::WrongType(key))
}

// Encoding helpers

pub(crate) fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

pub(crate) fn uint(n: u64) -> Value {
    Value::Integer(n.into())
}

/// The `rt`/`if` pair every resource document ends with.
pub(crate) fn resource_header(rt: &str) -> [(Value, Value); 2] {
    [
        (text(OIC_JSON_RT_NAME), Value::Array(vec![text(rt)])),
        (text(OIC_JSON_IF_NAME), Value::Array(vec![text(OC_RSRVD_INTERFACE_DEFAULT)])),
    ]
}

/// Overwrite every byte and text buffer inside `value`.
pub(crate) fn scrub(value: &mut Value) {
    match value {
        Value::Bytes(b) => b.zeroize(),
        Value::Text(s) => s.zeroize(),
        Value::Array(items) => items.iter_mut().for_each(scrub),
        Value::Map(entries) => entries.iter_mut().for_each(|(k, v)| {
            scrub(k);
            scrub(v);
        }),
        Value::Tag(_, inner) => scrub(inner),
        _ => {}
    }
}

// UUIDs travel as lowercase 8-4-4-4-12 text.

pub fn uuid_to_wire(id: &Uuid) -> String {
    id.hyphenated().to_string()
}

pub fn uuid_from_wire(s: &str) -> Result<Uuid, CodecError> {
    Uuid::parse_str(s).map_err(|_| CodecError::InvalidUuid(s.to_string()))
}

pub(crate) fn uuid_value(id: &Uuid) -> Value {
    Value::Text(uuid_to_wire(id))
}

pub(crate) fn expect_uuid(v: &Value, key: &'static str) -> Result<Uuid, CodecError> {
    uuid_from_wire(expect_text(v, key)?)
}
