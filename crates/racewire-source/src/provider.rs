//! The boundary to the external telemetry provider.

use serde_json::Value;

use crate::errors::{Result, SourceError};

/// A decoded telemetry variable.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Char(u8),
    Bool(bool),
    Int(i32),
    Bitfield(u32),
    Float(f32),
    Double(f64),
    /// Variables with a count above one.
    Array(Vec<FieldValue>),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Char(_) => "char",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Bitfield(_) => "bitfield",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Array(_) => "array",
        }
    }

    /// Numeric scalars widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(f64::from(v)),
            Self::Double(v) => Some(v),
            Self::Int(v) => Some(f64::from(v)),
            Self::Bitfield(v) => Some(f64::from(v)),
            Self::Char(v) => Some(f64::from(v)),
            Self::Bool(v) => Some(if v { 1.0 } else { 0.0 }),
            Self::Array(_) => None,
        }
    }

    /// Integral scalars only.
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Self::Int(v) => Some(v),
            Self::Bitfield(v) => i32::try_from(v).ok(),
            Self::Char(v) => Some(i32::from(v)),
            Self::Bool(v) => Some(i32::from(v)),
            _ => None,
        }
    }
}

/// External telemetry provider.
///
/// All methods are synchronous point-in-time queries. Implementations are
/// driven from one place at a time (the adapter holds them behind a lock).
pub trait Provider: Send {
    /// Attempt the handshake. `Ok` means the attempt ran, not that the sim is
    /// connected; check [`Provider::is_connected`] afterwards.
    fn startup(&mut self) -> Result<()>;

    fn shutdown(&mut self);

    fn is_initialized(&self) -> bool;

    fn is_connected(&self) -> bool;

    /// Read one variable from the latest buffer.
    fn field(&self, name: &str) -> Result<FieldValue>;

    /// One top-level section of the session description, as a JSON tree.
    fn session_section(&self, name: &str) -> Result<Value>;
}

/// Read a field and widen it to `f64`.
pub fn field_f64(provider: &dyn Provider, name: &str) -> Result<f64> {
    let value = provider.field(name)?;
    value.as_f64().ok_or_else(|| SourceError::TypeMismatch {
        field: name.to_string(),
        expected: "number",
        actual: value.type_name(),
    })
}

/// Read a field as `f32`. Doubles are narrowed.
#[allow(clippy::cast_possible_truncation)]
pub fn field_f32(provider: &dyn Provider, name: &str) -> Result<f32> {
    field_f64(provider, name).map(|v| v as f32)
}

pub fn field_i32(provider: &dyn Provider, name: &str) -> Result<i32> {
    let value = provider.field(name)?;
    value.as_i32().ok_or_else(|| SourceError::TypeMismatch {
        field: name.to_string(),
        expected: "int",
        actual: value.type_name(),
    })
}
