// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Messages and identifier extraction.
//!
//! A [`Message`] pairs the raw payload with the identifier it is stored under. The payload is
//! kept exactly as received; only the identifier field is decoded from it, every other JSON value
//! is skipped without being materialised.

use std::fmt;

use serde::de::{DeserializeSeed, Deserializer, IgnoredAny, MapAccess, Visitor};

use crate::errors::DecodeError;

/// One keyed payload. Instances are recycled through [`crate::pool::MessagePool`], so both
/// buffers may carry capacity from a previous cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Message {
    pub identifier: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Truncates the payload. The identifier is left stale; it is overwritten on the next decode.
    pub fn clear(&mut self) {
        self.payload.clear();
    }
}

/// Extracts the identifier of a JSON object payload from a configured top-level field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExtractor {
    field: String,
}

impl KeyExtractor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    /// Decodes `raw` just far enough to copy the identifier into `out`, reusing its capacity.
    ///
    /// Fails if `raw` is not a single JSON object, if the field is absent, not a string, or empty.
    /// `out` is left in an unspecified state on failure.
    pub fn extract_into(&self, raw: &[u8], out: &mut String) -> Result<(), DecodeError> {
        out.clear();
        let mut de = serde_json::Deserializer::from_slice(raw);
        let found = EnvelopeSeed {
            field: &self.field,
            out: &mut *out,
        }
        .deserialize(&mut de)?;
        de.end()?;

        if !found {
            return Err(DecodeError::MissingIdentifier(self.field.clone()));
        }
        if out.is_empty() {
            return Err(DecodeError::EmptyIdentifier(self.field.clone()));
        }
        Ok(())
    }

    pub fn extract(&self, raw: &[u8]) -> Result<String, DecodeError> {
        let mut identifier = String::new();
        self.extract_into(raw, &mut identifier)?;
        Ok(identifier)
    }
}

struct EnvelopeSeed<'a> {
    field: &'a str,
    out: &'a mut String,
}

impl<'de> DeserializeSeed<'de> for EnvelopeSeed<'_> {
    type Value = bool;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for EnvelopeSeed<'_> {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let EnvelopeSeed { field, out } = self;
        let mut found = false;
        while let Some(is_identifier) = map.next_key_seed(FieldMatcher(field))? {
            if is_identifier {
                // duplicate keys: the last occurrence wins
                out.clear();
                map.next_value_seed(IdentifierSlot(&mut *out))?;
                found = true;
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(found)
    }
}

/// Compares an object key against the identifier field without allocating.
struct FieldMatcher<'a>(&'a str);

impl<'de> DeserializeSeed<'de> for FieldMatcher<'_> {
    type Value = bool;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for FieldMatcher<'_> {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object key")
    }

    fn visit_str<E>(self, key: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(key == self.0)
    }
}

struct IdentifierSlot<'a>(&'a mut String);

impl<'de> DeserializeSeed<'de> for IdentifierSlot<'_> {
    type Value = ();

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(self)
    }
}

impl<'de> Visitor<'de> for IdentifierSlot<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a string identifier")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        self.0.push_str(value);
        Ok(())
    }
}
