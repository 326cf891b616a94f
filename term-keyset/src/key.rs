//! Application keys and their fingerprints.
//!
//! A [`Key`] is an ordered, non-empty tuple of [`KeyValue`] scalars taken from one
//! record. The tracker never stores keys themselves; it stores the [`Fingerprint`] of
//! the key's canonical encoding.
//!
//! The canonical encoding is the arity followed by, for each element, a type tag, a
//! length prefix and the element's bytes. Length prefixing keeps composite keys such
//! as `("ab", "c")` and `("a", "bc")` apart. Fingerprints are SHA-256 digests of that
//! encoding, so two different keys are treated as equal only on a hash collision.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{KeysetError, Result};

/// Length of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// A single scalar component of a key.
///
/// Values of different variants never compare equal: `Int(1)`, `UInt(1)`,
/// `Float(1.0)` and `Str("1")` are four different key components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(#[serde(with = "float_serde")] f64),
    Str(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl KeyValue {
    /// Returns true for a missing value.
    pub fn is_null(&self) -> bool {
        matches!(self, KeyValue::Null)
    }

    fn tag(&self) -> u8 {
        match self {
            KeyValue::Null => 0,
            KeyValue::Bool(_) => 1,
            KeyValue::Int(_) => 2,
            KeyValue::UInt(_) => 3,
            KeyValue::Float(_) => 4,
            KeyValue::Str(_) => 5,
            KeyValue::Date(_) => 6,
            KeyValue::Timestamp(_) => 7,
        }
    }

    /// Appends the tagged, length-prefixed encoding of this value.
    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag());
        match self {
            KeyValue::Null => put_bytes(buf, &[]),
            KeyValue::Bool(v) => put_bytes(buf, &[u8::from(*v)]),
            KeyValue::Int(v) => put_bytes(buf, &v.to_be_bytes()),
            KeyValue::UInt(v) => put_bytes(buf, &v.to_be_bytes()),
            KeyValue::Float(v) => put_bytes(buf, &canonical_float_bits(*v).to_be_bytes()),
            KeyValue::Str(v) => put_bytes(buf, v.as_bytes()),
            KeyValue::Date(v) => put_bytes(buf, v.format("%Y-%m-%d").to_string().as_bytes()),
            KeyValue::Timestamp(v) => put_bytes(
                buf,
                v.format("%Y-%m-%dT%H:%M:%S%.f").to_string().as_bytes(),
            ),
        }
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// All NaNs share one encoding and negative zero encodes as zero.
fn canonical_float_bits(v: f64) -> u64 {
    if v.is_nan() {
        f64::NAN.to_bits()
    } else if v == 0.0 {
        0.0_f64.to_bits()
    } else {
        v.to_bits()
    }
}

/// JSON has no NaN or infinity, so those travel as `"NaN"`, `"inf"` and `"-inf"`.
mod float_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() {
            serializer.serialize_str(if *value > 0.0 { "inf" } else { "-inf" })
        } else {
            serializer.serialize_f64(*value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(v) => Ok(v),
            Raw::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!(
                    "invalid float value '{other}'"
                ))),
            },
        }
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KeyValue::Null, KeyValue::Null) => true,
            (KeyValue::Bool(a), KeyValue::Bool(b)) => a == b,
            (KeyValue::Int(a), KeyValue::Int(b)) => a == b,
            (KeyValue::UInt(a), KeyValue::UInt(b)) => a == b,
            (KeyValue::Float(a), KeyValue::Float(b)) => {
                canonical_float_bits(*a) == canonical_float_bits(*b)
            }
            (KeyValue::Str(a), KeyValue::Str(b)) => a == b,
            (KeyValue::Date(a), KeyValue::Date(b)) => a == b,
            (KeyValue::Timestamp(a), KeyValue::Timestamp(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyValue {}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "NULL"),
            KeyValue::Bool(v) => write!(f, "{v}"),
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::UInt(v) => write!(f, "{v}"),
            KeyValue::Float(v) => write!(f, "{v}"),
            KeyValue::Str(v) => write!(f, "{v:?}"),
            KeyValue::Date(v) => write!(f, "{v}"),
            KeyValue::Timestamp(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Str(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Str(v)
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

impl From<i32> for KeyValue {
    fn from(v: i32) -> Self {
        KeyValue::Int(i64::from(v))
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Int(v)
    }
}

impl From<u64> for KeyValue {
    fn from(v: u64) -> Self {
        KeyValue::UInt(v)
    }
}

impl From<f64> for KeyValue {
    fn from(v: f64) -> Self {
        KeyValue::Float(v)
    }
}

impl From<NaiveDate> for KeyValue {
    fn from(v: NaiveDate) -> Self {
        KeyValue::Date(v)
    }
}

impl From<NaiveDateTime> for KeyValue {
    fn from(v: NaiveDateTime) -> Self {
        KeyValue::Timestamp(v)
    }
}

impl<T: Into<KeyValue>> From<Option<T>> for KeyValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(KeyValue::Null, Into::into)
    }
}

/// An application key: the ordered field values identifying one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<KeyValue>);

impl Key {
    /// Creates a key with a single component.
    pub fn single(value: impl Into<KeyValue>) -> Self {
        Self(vec![value.into()])
    }

    /// Creates a key from ordered components.
    pub fn composite(values: impl IntoIterator<Item = KeyValue>) -> Self {
        Self(values.into_iter().collect())
    }

    /// Returns the key's components in order.
    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    /// Number of components.
    pub fn arity(&self) -> usize {
        self.0.len()
    }

    /// Returns true if any component is null.
    pub fn has_null(&self) -> bool {
        self.0.iter().any(KeyValue::is_null)
    }

    /// Canonical byte encoding the fingerprint is computed from.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        if self.0.is_empty() {
            return Err(KeysetError::encoding("a key needs at least one value"));
        }
        let arity = u32::try_from(self.0.len())
            .map_err(|_| KeysetError::encoding("key has too many values"))?;

        let mut buf = Vec::with_capacity(4 + self.0.len() * 17);
        buf.extend_from_slice(&arity.to_be_bytes());
        for value in &self.0 {
            value.encode_into(&mut buf);
        }
        Ok(buf)
    }

    /// Computes the key's fingerprint.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        let bytes = self.canonical_bytes()?;
        Ok(Fingerprint::of_bytes(&bytes))
    }

    /// JSON rendering of the key, kept only as a debugging aid.
    pub fn payload(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| KeysetError::encoding(format!("failed to serialize key: {e}")))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<KeyValue>> for Key {
    fn from(values: Vec<KeyValue>) -> Self {
        Self(values)
    }
}

impl From<KeyValue> for Key {
    fn from(value: KeyValue) -> Self {
        Self(vec![value])
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key::single(v)
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key::single(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key::single(v)
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Key::single(v)
    }
}

/// Builds a [`Key`] from a list of values convertible into [`KeyValue`].
///
/// ```rust
/// use term_keyset::key;
///
/// let k = key!["ab", "c"];
/// assert_eq!(k.arity(), 2);
/// assert_ne!(k, key!["a", "bc"]);
/// ```
#[macro_export]
macro_rules! key {
    ($($value:expr),+ $(,)?) => {
        $crate::key::Key::composite(vec![$($crate::key::KeyValue::from($value)),+])
    };
}

/// Fixed-size digest identifying a key in both backends.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Hashes arbitrary bytes into a fingerprint.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &hex::encode(self.0)[..16])
    }
}
