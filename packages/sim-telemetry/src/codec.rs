// Wire codecs for delta messages
//
// A codec is picked by name in the communication config; unknown names are
// rejected at startup. `json` is the slow but readable default, `simd-json`
// and `msgpack` are the fast options.
//
// Tuple vs list: neither JSON flavour nor MessagePack keeps the difference
// between a tuple and a list on the wire, both become arrays. Decoding is
// always done into a concrete Rust type (`DeltaMessage`, `Sample`, ...), so
// the shape is recovered from the type and never from the payload. Decoding
// into an untyped value (`serde_json::Value`) loses that distinction.

use crate::types::{StreamError, StreamResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of payload bytes included in error logs
const PAYLOAD_PREVIEW: usize = 256;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Serializer {
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "simd-json")]
    SimdJson,
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl fmt::Display for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serializer {
    pub const ALL: [Serializer; 3] = [
        Serializer::Json,
        Serializer::SimdJson,
        Serializer::MessagePack,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Serializer::Json => "json",
            Serializer::SimdJson => "simd-json",
            Serializer::MessagePack => "msgpack",
        }
    }

    /// Registered codec names
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|codec| codec.name()).collect()
    }

    pub fn from_name(name: &str) -> StreamResult<Self> {
        Self::ALL
            .into_iter()
            .find(|codec| codec.name() == name)
            .ok_or_else(|| {
                StreamError::InvalidConfig(format!(
                    "unknown serializer '{}' (available: {})",
                    name,
                    Self::names().join(", ")
                ))
            })
    }

    pub fn is_binary(self) -> bool {
        matches!(self, Serializer::MessagePack)
    }

    /// Render a payload for error logs: lossy text for the JSON codecs, a
    /// hex preview for binary ones.
    fn preview(self, payload: &[u8]) -> String {
        let head = &payload[..payload.len().min(PAYLOAD_PREVIEW)];
        let ellipsis = if payload.len() > PAYLOAD_PREVIEW { "..." } else { "" };
        if self.is_binary() {
            format!("{}{}", hex::encode(head), ellipsis)
        } else {
            format!("{}{}", String::from_utf8_lossy(head), ellipsis)
        }
    }

    pub fn serialize<T>(self, value: &T) -> StreamResult<Vec<u8>>
    where
        T: Serialize + fmt::Debug,
    {
        let result = match self {
            Serializer::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Serializer::SimdJson => simd_json::to_vec(value).map_err(|e| e.to_string()),
            Serializer::MessagePack => rmp_serde::to_vec(value).map_err(|e| e.to_string()),
        };
        result.map_err(|message| {
            log::error!("{} serializer failed on {:?}: {}", self, value, message);
            StreamError::Serialization {
                codec: self.name(),
                message,
            }
        })
    }

    pub fn deserialize<T>(self, payload: &[u8]) -> StreamResult<T>
    where
        T: DeserializeOwned,
    {
        let result = match self {
            Serializer::Json => serde_json::from_slice(payload).map_err(|e| e.to_string()),
            Serializer::SimdJson => {
                // simd-json parses in place
                let mut scratch = payload.to_vec();
                simd_json::from_slice(&mut scratch).map_err(|e| e.to_string())
            }
            Serializer::MessagePack => rmp_serde::from_slice(payload).map_err(|e| e.to_string()),
        };
        result.map_err(|message| {
            log::error!(
                "{} deserializer failed ({} bytes): {}; payload: {}",
                self,
                payload.len(),
                message,
                self.preview(payload)
            );
            StreamError::Deserialization {
                codec: self.name(),
                message,
            }
        })
    }
}
