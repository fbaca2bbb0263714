use std::fmt;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::utils::hash_content;

/// Raw asset contents. Text assets are UTF-8, binary assets are arbitrary bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Code(Vec<u8>);

impl Code {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Result<&str> {
        std::str::from_utf8(&self.0).context("Asset code is not valid UTF-8")
    }

    pub fn size(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hash(&self) -> String {
        hash_content(&self.0)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "Code({:?})", text),
            Err(_) => write!(f, "Code(<{} bytes>)", self.0.len()),
        }
    }
}

impl From<String> for Code {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<&str> for Code {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Code {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

// Cache entries are JSON; base64 keeps binary assets compact in them.
impl Serialize for Code {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Code {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Code)
            .map_err(serde::de::Error::custom)
    }
}
