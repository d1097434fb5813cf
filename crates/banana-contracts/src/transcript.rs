use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, ImageResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded image together with the encoded bytes it came from.
///
/// The encoded form is kept so the image can be sent back upstream as inline
/// data or written to disk without re-encoding.
#[derive(Debug, Clone)]
pub struct ChatImage {
    bytes: Vec<u8>,
    format: ImageFormat,
    pixels: DynamicImage,
}

impl ChatImage {
    pub fn decode(bytes: Vec<u8>) -> ImageResult<Self> {
        let format = image::guess_format(&bytes)?;
        let pixels = image::load_from_memory_with_format(&bytes, format)?;
        Ok(Self {
            bytes,
            format,
            pixels,
        })
    }

    /// Wraps already-decoded pixels, encoding them as PNG.
    pub fn from_pixels(pixels: DynamicImage) -> ImageResult<Self> {
        let mut bytes = Vec::new();
        pixels.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
        Ok(Self {
            bytes,
            format: ImageFormat::Png,
            pixels,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    pub fn extension(&self) -> &'static str {
        self.format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("bin")
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    /// Hex SHA-256 of the encoded bytes.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, &self.bytes).with_context(|| format!("failed to write {}", path.display()))
    }
}

// Equality is by pixels: a PNG and a JPEG of the same raster differ in bytes
// but show the same picture.
impl PartialEq for ChatImage {
    fn eq(&self, other: &Self) -> bool {
        self.width() == other.width()
            && self.height() == other.height()
            && self.pixels.color() == other.pixels.color()
            && self.pixels.as_bytes() == other.pixels.as_bytes()
    }
}

/// One role-tagged entry of the transcript. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    role: Role,
    text: String,
    image: Option<ChatImage>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn assistant(text: impl Into<String>, image: Option<ChatImage>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn image(&self) -> Option<&ChatImage> {
        self.image.as_ref()
    }
}

/// Transcript plus the image staged for the next generation request.
///
/// The transcript only grows through [`ConversationState::push`]; a reset is
/// done by replacing the whole value with [`ConversationState::seeded`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    transcript: Vec<Turn>,
    attached_image: Option<ChatImage>,
}

impl ConversationState {
    pub fn seeded(greeting: &str) -> Self {
        Self {
            transcript: vec![Turn::assistant(greeting, None)],
            attached_image: None,
        }
    }

    pub fn transcript(&self) -> &[Turn] {
        &self.transcript
    }

    pub fn len(&self) -> usize {
        self.transcript.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcript.is_empty()
    }

    pub fn attached_image(&self) -> Option<&ChatImage> {
        self.attached_image.as_ref()
    }

    pub fn stage_image(&mut self, image: ChatImage) {
        self.attached_image = Some(image);
    }

    pub fn push(&mut self, turn: Turn) -> &Turn {
        self.transcript.push(turn);
        &self.transcript[self.transcript.len() - 1]
    }

    /// Writes `transcript.json` and one image file per image-bearing turn into
    /// `dir`. Returns the path of the JSON file.
    pub fn export(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

        let mut records = Vec::with_capacity(self.transcript.len());
        for (index, turn) in self.transcript.iter().enumerate() {
            let image = match turn.image() {
                Some(image) => {
                    let file_name = format!("turn-{:02}.{}", index, image.extension());
                    image.save(&dir.join(&file_name))?;
                    Some(file_name)
                }
                None => None,
            };
            records.push(TurnRecord {
                index,
                role: turn.role(),
                text: turn.text().to_string(),
                image,
            });
        }

        let path = dir.join("transcript.json");
        let payload = serde_json::to_string_pretty(&records)?;
        fs::write(&path, payload).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub index: usize,
    pub role: Role,
    pub text: String,
    pub image: Option<String>,
}

#[cfg(test)]
pub(crate) fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let mut pixels = image::RgbImage::new(width, height);
    for pixel in pixels.pixels_mut() {
        *pixel = image::Rgb(rgb);
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(pixels)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}
