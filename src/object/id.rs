use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Identifies an object's content.
///
/// A direct ID is a single content-address; an indirect ID wraps the ID of
/// an index object whose content lists the child segments. IDs form a tree
/// by construction, so indirection can nest when an index itself outgrows
/// the max block size.
///
/// Text form: `D<hex>` for direct, `I` + inner text for indirect
/// (`IDabc...`, `IIDabc...`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectId {
    Direct(String),
    Indirect(Box<ObjectId>),
}

impl ObjectId {
    pub fn direct(block: impl Into<String>) -> ObjectId {
        ObjectId::Direct(block.into())
    }

    pub fn indirect(inner: ObjectId) -> ObjectId {
        ObjectId::Indirect(Box::new(inner))
    }

    /// Inverse of the text form. The hex payload is not validated here;
    /// a bogus block address surfaces as `BlockNotFound` at open time.
    pub fn parse(text: &str) -> Result<ObjectId> {
        match text.as_bytes().first() {
            Some(b'D') if text.len() > 1 => Ok(ObjectId::Direct(text[1..].to_string())),
            Some(b'I') if text.len() > 1 => Ok(ObjectId::indirect(ObjectId::parse(&text[1..])?)),
            _ => Err(Error::InvalidArgument(format!(
                "malformed object ID: '{}'",
                text
            ))),
        }
    }

    /// How many `Indirect` layers wrap the direct address.
    pub fn indirection_level(&self) -> usize {
        match self {
            ObjectId::Direct(_) => 0,
            ObjectId::Indirect(inner) => 1 + inner.indirection_level(),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectId::Direct(block) => write!(f, "D{}", block),
            ObjectId::Indirect(inner) => write!(f, "I{}", inner),
        }
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<ObjectId> {
        ObjectId::parse(s)
    }
}

// Serde speaks the text form so indirect index entries stay readable JSON.
impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct ObjectIdVisitor;

impl<'de> Visitor<'de> for ObjectIdVisitor {
    type Value = ObjectId;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "an object ID string such as 'D<hex>'")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
        ObjectId::parse(v).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ObjectId, D::Error> {
        deserializer.deserialize_str(ObjectIdVisitor)
    }
}
