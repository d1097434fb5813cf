use banana_contracts::response::{ImageEntry, RawResponse, ERROR_MARKER};
use banana_contracts::transcript::ChatImage;
use tracing::{debug, warn};

use crate::error::ChatError;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedResult {
    pub text: String,
    pub image: Option<ChatImage>,
    /// When set, `text` and `image` are fallbacks rather than the reply.
    pub error_message: Option<String>,
}

impl NormalizedResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            image: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }

    /// Text to show for this result: the error message when there is one.
    pub fn display_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or(&self.text)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseNormalizer;

impl ResponseNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, raw: RawResponse, fallback: Option<&ChatImage>) -> NormalizedResult {
        if let RawResponse::ErrorMarker(message) = raw {
            return NormalizedResult::error(message);
        }
        match unpack(raw) {
            Ok((text, image)) => {
                debug!(
                    text_chars = text.chars().count(),
                    has_image = image.is_some(),
                    "response normalized"
                );
                NormalizedResult {
                    text,
                    image,
                    error_message: None,
                }
            }
            Err(err) => self.recover(&err, fallback),
        }
    }

    /// Converts a failed generation call into a result.
    ///
    /// Unpack failures keep the fallback image; every other kind becomes an
    /// error marker and carries no image.
    pub fn recover(&self, err: &ChatError, fallback: Option<&ChatImage>) -> NormalizedResult {
        match err {
            ChatError::UnpackFailure(detail) => self.unpack_failure(detail, fallback),
            other => self.normalize(
                RawResponse::ErrorMarker(format!("{ERROR_MARKER}: {other}")),
                fallback,
            ),
        }
    }

    fn unpack_failure(&self, detail: &str, fallback: Option<&ChatImage>) -> NormalizedResult {
        let message = format!("{ERROR_MARKER} in unpack response: {detail}");
        warn!(error = %message, kept_attachment = fallback.is_some(), "response unpack failed");
        NormalizedResult {
            text: message.clone(),
            image: fallback.cloned(),
            error_message: Some(message),
        }
    }
}

fn unpack(raw: RawResponse) -> Result<(String, Option<ChatImage>), ChatError> {
    let mut text = String::new();
    let mut image = None;

    let images = match raw {
        RawResponse::ErrorMarker(_) | RawResponse::Empty => Vec::new(),
        RawResponse::DirectText {
            text: direct,
            images,
        } => {
            text = direct;
            images
        }
        RawResponse::Parts { parts, images } => {
            for part in parts {
                if let Some(fragment) = part.text {
                    text.push_str(&fragment);
                }
                if let Some(inline) = part.inline_data {
                    if inline.is_image() {
                        image = Some(decode_image(inline.data)?);
                    }
                }
            }
            images
        }
        RawResponse::Images(images) => images,
    };

    // The images list is checked last and wins over an image found in parts.
    if let Some(first) = images.into_iter().next() {
        match first {
            ImageEntry::Decoded(decoded) => image = Some(decoded),
            ImageEntry::Encoded(bytes) if !bytes.is_empty() => image = Some(decode_image(bytes)?),
            ImageEntry::Encoded(_) => {}
        }
    }

    Ok((text, image))
}

fn decode_image(bytes: Vec<u8>) -> Result<ChatImage, ChatError> {
    ChatImage::decode(bytes).map_err(|err| ChatError::UnpackFailure(err.to_string()))
}
