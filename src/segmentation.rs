//! Attribute domains and their dense ordinal encodings.
//!
//! A [`Segmentation`] is the ordered list of non-spatial attributes (time of
//! day, demographic segment, access mode, ...) together with the legal values
//! of each. An [`Ordinalizer`] maps one attribute's values onto `0..cardinality`.

use crate::error::{Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// A single attribute value. Segment values are small integers or labels,
/// access point ids are integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Int(i64),
    Str(String),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Int(v) => write!(f, "{}", v),
            AttributeValue::Str(v) => write!(f, "'{}'", v),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<i32> for AttributeValue {
    fn from(v: i32) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<u32> for AttributeValue {
    fn from(v: u32) -> Self {
        AttributeValue::Int(v as i64)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

/// Attribute name to value, either per row or fixed for a whole batch.
pub type Attributes = HashMap<String, AttributeValue>;

/// Build an [`Attributes`] map from `(name, value)` pairs.
pub fn attributes<K, V, I>(pairs: I) -> Attributes
where
    K: Into<String>,
    V: Into<AttributeValue>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Ordered mapping from attribute name to its ordered set of legal values.
///
/// Serialized as a plain map (`{tod: [AM, MD], ...}`); entry order in the
/// source document is kept as declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
    attributes: Vec<(String, Vec<AttributeValue>)>,
}

impl Segmentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute. Declaration order is the canonical uid order.
    pub fn with_attribute(mut self, name: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        self.attributes.push((name.into(), values));
        self
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[AttributeValue])> {
        self.attributes
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

impl Serialize for Segmentation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len()))?;
        for (name, values) in &self.attributes {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

struct SegmentationVisitor;

impl<'de> Visitor<'de> for SegmentationVisitor {
    type Value = Segmentation;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map from attribute name to a list of values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Segmentation, A::Error> {
        let mut attributes: Vec<(String, Vec<AttributeValue>)> =
            Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, values)) = access.next_entry::<String, Vec<AttributeValue>>()? {
            if attributes.iter().any(|(existing, _)| *existing == name) {
                return Err(serde::de::Error::custom(format!(
                    "attribute '{}' declared twice",
                    name
                )));
            }
            attributes.push((name, values));
        }
        Ok(Segmentation { attributes })
    }
}

impl<'de> Deserialize<'de> for Segmentation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SegmentationVisitor)
    }
}

/// Bijection between an attribute's values and `0..cardinality`.
#[derive(Debug, Clone)]
pub struct Ordinalizer {
    name: String,
    values: Vec<AttributeValue>,
    ordinals: HashMap<AttributeValue, u64>,
}

impl Ordinalizer {
    /// Build an ordinalizer; value order defines the ordinals.
    pub fn new(name: impl Into<String>, values: Vec<AttributeValue>) -> Result<Self> {
        let name = name.into();
        if values.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "attribute '{}' has no values",
                name
            )));
        }

        let mut ordinals = HashMap::with_capacity(values.len());
        for (ordinal, value) in values.iter().enumerate() {
            if ordinals.insert(value.clone(), ordinal as u64).is_some() {
                return Err(Error::InvalidConfig(format!(
                    "attribute '{}' lists value {} more than once",
                    name, value
                )));
            }
        }

        Ok(Self {
            name,
            values,
            ordinals,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> u64 {
        self.values.len() as u64
    }

    /// Ordinal of `value`. A value outside the domain means the configuration
    /// and the caller disagree, so this fails rather than guessing.
    pub fn ordinal(&self, value: &AttributeValue) -> Result<u64> {
        self.ordinals
            .get(value)
            .copied()
            .ok_or_else(|| Error::UnknownAttributeValue {
                attribute: self.name.clone(),
                value: value.to_string(),
            })
    }

    pub fn value(&self, ordinal: u64) -> Option<&AttributeValue> {
        usize::try_from(ordinal).ok().and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }
}
