//! Positional argument values and the reader handlers decode them with.

use serde::{Deserialize, Serialize};

use crate::error::RecorderError;
use crate::types::WireEnum;

/// Longest string accepted in a Call argument, in bytes.
pub const MAX_STRING_LEN: usize = 256;

/// One positional argument or output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Double(f64),
    Str(String),
    /// Opaque daemon-side handle (session handle, camera handle).
    Pointer(u64),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Pointer(_) => "pointer",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<u64> {
        match self {
            Value::Pointer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// Reads positional arguments in declared order.
///
/// A missing argument or one of the wrong type is `InvalidParameter`.
/// Trailing extra arguments are ignored.
#[derive(Debug)]
pub struct Args<'a> {
    values: &'a [Value],
    pos: usize,
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [Value]) -> Self {
        Self { values, pos: 0 }
    }

    fn next(&mut self, name: &str) -> Result<&'a Value, RecorderError> {
        let value = self.values.get(self.pos).ok_or_else(|| {
            RecorderError::invalid_parameter(format!("missing argument {} ({name})", self.pos))
        })?;
        self.pos += 1;
        Ok(value)
    }

    fn mismatch(name: &str, expected: &str, got: &Value) -> RecorderError {
        RecorderError::invalid_parameter(format!(
            "argument {name}: expected {expected}, got {}",
            got.kind()
        ))
    }

    pub fn int(&mut self, name: &str) -> Result<i64, RecorderError> {
        let value = self.next(name)?;
        value.as_int().ok_or_else(|| Self::mismatch(name, "int", value))
    }

    /// An int that must fit in 32 bits.
    pub fn int32(&mut self, name: &str) -> Result<i32, RecorderError> {
        let v = self.int(name)?;
        i32::try_from(v)
            .map_err(|_| RecorderError::invalid_parameter(format!("argument {name} out of range: {v}")))
    }

    /// A 0/1 flag. Any non-zero value reads as true.
    pub fn flag(&mut self, name: &str) -> Result<bool, RecorderError> {
        Ok(self.int(name)? != 0)
    }

    pub fn double(&mut self, name: &str) -> Result<f64, RecorderError> {
        let value = self.next(name)?;
        value
            .as_double()
            .ok_or_else(|| Self::mismatch(name, "double", value))
    }

    /// A string no longer than [`MAX_STRING_LEN`] bytes.
    pub fn string(&mut self, name: &str) -> Result<&'a str, RecorderError> {
        let value = self.next(name)?;
        let s = value
            .as_str()
            .ok_or_else(|| Self::mismatch(name, "string", value))?;
        if s.len() > MAX_STRING_LEN {
            return Err(RecorderError::invalid_parameter(format!(
                "argument {name} is {} bytes, limit {MAX_STRING_LEN}",
                s.len()
            )));
        }
        Ok(s)
    }

    pub fn pointer(&mut self, name: &str) -> Result<u64, RecorderError> {
        let value = self.next(name)?;
        value
            .as_pointer()
            .ok_or_else(|| Self::mismatch(name, "pointer", value))
    }

    pub fn enumeration<T: WireEnum>(&mut self, name: &str) -> Result<T, RecorderError> {
        T::decode(self.int(name)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileFormat;

    #[test]
    fn reads_in_declared_order() {
        let values = vec![Value::Int(640), Value::Int(480), Value::from("clip.mp4")];
        let mut args = Args::new(&values);
        assert_eq!(args.int("width").unwrap(), 640);
        assert_eq!(args.int("height").unwrap(), 480);
        assert_eq!(args.string("path").unwrap(), "clip.mp4");
    }

    #[test]
    fn missing_argument() {
        let values = vec![Value::Int(1)];
        let mut args = Args::new(&values);
        args.int("first").unwrap();
        assert!(matches!(
            args.int("second"),
            Err(RecorderError::InvalidParameter(_))
        ));
    }

    #[test]
    fn wrong_type() {
        let values = vec![Value::Double(1.5)];
        let err = Args::new(&values).int("bitrate").unwrap_err();
        assert!(err.to_string().contains("expected int"));
    }

    #[test]
    fn string_length_limit() {
        let exact = "a".repeat(MAX_STRING_LEN);
        let over = "a".repeat(MAX_STRING_LEN + 1);
        let values = vec![Value::Str(exact), Value::Str(over)];
        let mut args = Args::new(&values);
        assert!(args.string("ok").is_ok());
        assert!(matches!(
            args.string("too_long"),
            Err(RecorderError::InvalidParameter(_))
        ));
    }

    #[test]
    fn int32_range() {
        let values = vec![Value::Int(i64::from(i32::MAX) + 1)];
        assert!(Args::new(&values).int32("n").is_err());
    }

    #[test]
    fn enumeration_checks_range() {
        let values = vec![Value::Int(1), Value::Int(99)];
        let mut args = Args::new(&values);
        assert_eq!(
            args.enumeration::<FileFormat>("format").unwrap(),
            FileFormat::Mp4
        );
        assert!(args.enumeration::<FileFormat>("format").is_err());
    }
}
