use internals::{Delivery, CONTENT_TYPE_JSON};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CodecError;

/// JSON converter shared by the publisher and the typed listeners.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE_JSON
    }

    pub fn encode<T: Serialize>(&self, record: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(record).map_err(CodecError::Encode)
    }

    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(CodecError::Decode)
    }

    /// Decodes a delivery, refusing payloads explicitly labelled with a
    /// non-JSON content type. Unlabelled payloads are attempted.
    pub fn decode_delivery<T: DeserializeOwned>(&self, delivery: &Delivery) -> Result<T, CodecError> {
        if let Some(content_type) = delivery.content_type() {
            if !is_json(content_type) {
                return Err(CodecError::UnsupportedContentType(content_type.to_string()));
            }
        }
        self.decode(delivery.payload())
    }
}

fn is_json(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|mime| mime.trim().eq_ignore_ascii_case(CONTENT_TYPE_JSON))
        .unwrap_or(false)
}
