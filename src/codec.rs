use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;

/// Terminates every payload inside a list blob. Never part of the base64 alphabet.
const TERMINATOR: char = ';';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Invalid encoded payload at index {index}: {source}")]
    InvalidPayload {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },
    #[error("Encoded image list is not terminated")]
    Unterminated,
}

pub fn encode_one(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_one(text: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(text)
        .map_err(|source| CodecError::InvalidPayload { index: 0, source })
}

/// Encodes payloads as `<b64>;<b64>;...`.
///
/// Each entry carries its own terminator so that `[]` (`""`) and `[b""]` (`";"`)
/// stay distinguishable after storage.
pub fn encode_list<B: AsRef<[u8]>>(payloads: &[B]) -> String {
    let mut out = String::new();
    for payload in payloads {
        out.push_str(&encode_one(payload.as_ref()));
        out.push(TERMINATOR);
    }
    out
}

pub fn decode_list(text: &str) -> Result<Vec<Vec<u8>>, CodecError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if !text.ends_with(TERMINATOR) {
        return Err(CodecError::Unterminated);
    }

    text.split_terminator(TERMINATOR)
        .enumerate()
        .map(|(index, entry)| {
            STANDARD
                .decode(entry)
                .map_err(|source| CodecError::InvalidPayload { index, source })
        })
        .collect()
}

/// Absent and empty blobs both mean "no images".
pub fn decode_optional_list(text: Option<&str>) -> Result<Vec<Vec<u8>>, CodecError> {
    text.map_or_else(|| Ok(Vec::new()), decode_list)
}
