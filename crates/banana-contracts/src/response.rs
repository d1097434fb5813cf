use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};

use crate::transcript::ChatImage;

/// Substring that marks a string reply from the generation step as an error.
pub const ERROR_MARKER: &str = "Error";

/// Binary payload carried inline by a response part.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineData {
    pub mime_type: Option<String>,
    pub data: Vec<u8>,
}

impl InlineData {
    /// Untagged payloads count as images: that is the only inline content the
    /// image models return.
    pub fn is_image(&self) -> bool {
        is_image_mime(self.mime_type.as_deref())
    }
}

fn is_image_mime(mime_type: Option<&str>) -> bool {
    match mime_type {
        Some(mime) => mime.trim().to_ascii_lowercase().starts_with("image/"),
        None => true,
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResponsePart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

impl ResponsePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn image(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: Some(mime_type.into()),
                data,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageEntry {
    Decoded(ChatImage),
    Encoded(Vec<u8>),
}

/// A generation reply, decoded once at the boundary into one of the known
/// encodings.
///
/// The images list travels alongside the direct-text and parts encodings
/// because a reply can carry both, and the images list is consulted
/// independently of where the text came from.
#[derive(Debug, Clone, PartialEq)]
pub enum RawResponse {
    ErrorMarker(String),
    DirectText {
        text: String,
        images: Vec<ImageEntry>,
    },
    Parts {
        parts: Vec<ResponsePart>,
        images: Vec<ImageEntry>,
    },
    Images(Vec<ImageEntry>),
    Empty,
}

impl RawResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, RawResponse::ErrorMarker(_))
    }

    /// Decodes a `generateContent` / `predict` JSON payload.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let Some(obj) = payload.as_object() else {
            return Ok(RawResponse::Empty);
        };

        if let Some(error) = obj.get("error") {
            return Ok(RawResponse::ErrorMarker(format_api_error(error)));
        }

        let images = extract_image_entries(obj)?;

        if let Some(text) = obj.get("text").and_then(Value::as_str) {
            return Ok(RawResponse::DirectText {
                text: text.to_string(),
                images,
            });
        }

        if let Some(parts) = extract_parts(obj)? {
            return Ok(RawResponse::Parts { parts, images });
        }

        if !images.is_empty() {
            return Ok(RawResponse::Images(images));
        }
        Ok(RawResponse::Empty)
    }
}

impl From<String> for RawResponse {
    fn from(value: String) -> Self {
        if value.contains(ERROR_MARKER) {
            RawResponse::ErrorMarker(value)
        } else {
            RawResponse::DirectText {
                text: value,
                images: Vec::new(),
            }
        }
    }
}

impl From<&str> for RawResponse {
    fn from(value: &str) -> Self {
        RawResponse::from(value.to_string())
    }
}

fn format_api_error(error: &Value) -> String {
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| error.as_str().map(str::to_string))
        .unwrap_or_else(|| error.to_string());
    match error.get("code").and_then(Value::as_i64) {
        Some(code) => format!("{ERROR_MARKER}: {message} ({code})"),
        None => format!("{ERROR_MARKER}: {message}"),
    }
}

// Parts of every candidate, flattened in order. `None` when the payload has no
// candidate carrying a parts array.
fn extract_parts(obj: &Map<String, Value>) -> Result<Option<Vec<ResponsePart>>> {
    let direct = obj.get("parts").and_then(Value::as_array);
    let from_candidates = obj
        .get("candidates")
        .and_then(Value::as_array)
        .map(|candidates| {
            candidates
                .iter()
                .filter_map(|candidate| {
                    candidate
                        .get("content")
                        .and_then(|content| content.get("parts"))
                        .and_then(Value::as_array)
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let mut groups = Vec::new();
    if let Some(parts) = direct {
        groups.push(parts);
    }
    groups.extend(from_candidates);
    if groups.is_empty() {
        return Ok(None);
    }

    let mut out = Vec::new();
    for part in groups.into_iter().flatten() {
        let text = part.get("text").and_then(Value::as_str).map(str::to_string);
        let inline = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object);
        let inline_data = match inline {
            Some(inline) => decode_inline(inline)?,
            None => None,
        };
        out.push(ResponsePart { text, inline_data });
    }
    Ok(Some(out))
}

// Inline data of one part. Non-image payloads are never consumed, so a broken
// one is dropped instead of failing the reply.
fn decode_inline(inline: &Map<String, Value>) -> Result<Option<InlineData>> {
    let data = inline
        .get("data")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if data.is_empty() {
        return Ok(None);
    }
    let mime_type = inline
        .get("mimeType")
        .or_else(|| inline.get("mime_type"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let decoded = BASE64.decode(data.as_bytes());
    let data = if is_image_mime(mime_type.as_deref()) {
        decoded.context("inline data base64 decode failed")?
    } else {
        match decoded {
            Ok(data) => data,
            Err(_) => return Ok(None),
        }
    };
    Ok(Some(InlineData { mime_type, data }))
}

// Only the first row of `images`/`predictions` is ever used, so later rows
// are not read. A first row without usable data becomes an empty entry.
fn extract_image_entries(obj: &Map<String, Value>) -> Result<Vec<ImageEntry>> {
    let first = obj
        .get("images")
        .or_else(|| obj.get("predictions"))
        .and_then(Value::as_array)
        .and_then(|rows| rows.first());
    let Some(row) = first else {
        return Ok(Vec::new());
    };

    let encoded = match row {
        Value::String(encoded) => encoded.as_str(),
        Value::Object(entry) => {
            let nested = entry
                .get("image")
                .or_else(|| entry.get("generatedImage"))
                .and_then(Value::as_object);
            entry
                .get("data")
                .or_else(|| entry.get("bytesBase64Encoded"))
                .or_else(|| entry.get("bytes_base64_encoded"))
                .or_else(|| nested.and_then(|image| image.get("imageBytes")))
                .or_else(|| nested.and_then(|image| image.get("bytesBase64Encoded")))
                .and_then(Value::as_str)
                .unwrap_or_default()
        }
        _ => "",
    };
    Ok(vec![ImageEntry::Encoded(decode_base64(encoded)?)])
}

fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    if encoded.is_empty() {
        return Ok(Vec::new());
    }
    BASE64
        .decode(encoded.as_bytes())
        .context("image base64 decode failed")
}
