// ── Decoded attribute values ──
//
// The TLV codec is an external collaborator; it hands this layer values
// already lifted into a small tagged tree. Typed accessors report shape
// mismatches as `Error::Decode`.

use std::collections::BTreeMap;

use crate::error::Error;

/// A decoded attribute, event or command payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Utf8(String),
    Bytes(Vec<u8>),
    List(Vec<AttributeValue>),
    /// Context-tagged structure fields.
    Struct(BTreeMap<u8, AttributeValue>),
}

impl AttributeValue {
    /// Build a structure from `(tag, value)` pairs.
    pub fn structure<I>(fields: I) -> Self
    where
        I: IntoIterator<Item = (u8, AttributeValue)>,
    {
        Self::Struct(fields.into_iter().collect())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::UInt(_) => "unsigned integer",
            Self::Int(_) => "signed integer",
            Self::Utf8(_) => "utf8 string",
            Self::Bytes(_) => "octet string",
            Self::List(_) => "list",
            Self::Struct(_) => "structure",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_u64(&self) -> Result<u64, Error> {
        match self {
            Self::UInt(v) => Ok(*v),
            other => Err(mismatch("unsigned integer", other)),
        }
    }

    pub fn as_u32(&self) -> Result<u32, Error> {
        narrow(self.as_u64()?, "u32")
    }

    pub fn as_u16(&self) -> Result<u16, Error> {
        narrow(self.as_u64()?, "u16")
    }

    pub fn as_u8(&self) -> Result<u8, Error> {
        narrow(self.as_u64()?, "u8")
    }

    pub fn as_str(&self) -> Result<&str, Error> {
        match self {
            Self::Utf8(s) => Ok(s),
            other => Err(mismatch("utf8 string", other)),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], Error> {
        match self {
            Self::Bytes(b) => Ok(b),
            other => Err(mismatch("octet string", other)),
        }
    }

    pub fn as_list(&self) -> Result<&[AttributeValue], Error> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    /// Required structure field.
    pub fn field(&self, tag: u8) -> Result<&AttributeValue, Error> {
        match self {
            Self::Struct(fields) => fields
                .get(&tag)
                .ok_or_else(|| Error::Decode(format!("missing structure field {tag}"))),
            other => Err(mismatch("structure", other)),
        }
    }

    /// Optional structure field; an explicit null counts as absent.
    pub fn optional_field(&self, tag: u8) -> Option<&AttributeValue> {
        match self {
            Self::Struct(fields) => fields.get(&tag).filter(|v| !v.is_null()),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl From<u8> for AttributeValue {
    fn from(value: u8) -> Self {
        Self::UInt(u64::from(value))
    }
}

impl<T: Into<AttributeValue>> From<Option<T>> for AttributeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

fn mismatch(expected: &str, found: &AttributeValue) -> Error {
    Error::Decode(format!("expected {expected}, found {}", found.kind()))
}

fn narrow<T: TryFrom<u64>>(value: u64, target: &str) -> Result<T, Error> {
    T::try_from(value).map_err(|_| Error::Decode(format!("{value} does not fit in {target}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_rejects_out_of_range_values() {
        assert_eq!(AttributeValue::UInt(0xFFF1).as_u16().unwrap(), 0xFFF1);
        assert!(matches!(
            AttributeValue::UInt(0x1_0000).as_u16(),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn type_mismatch_is_a_decode_error() {
        let err = AttributeValue::UInt(3).as_str().unwrap_err();
        assert_eq!(
            err,
            Error::Decode("expected utf8 string, found unsigned integer".into())
        );
    }

    #[test]
    fn structure_fields_by_tag() {
        let value = AttributeValue::structure([
            (0, AttributeValue::UInt(9)),
            (3, AttributeValue::Null),
        ]);
        assert_eq!(value.field(0).unwrap().as_u64().unwrap(), 9);
        assert!(value.field(1).is_err());
        assert!(value.optional_field(3).is_none());
    }
}
