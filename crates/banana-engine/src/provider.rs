use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use banana_contracts::response::{RawResponse, ResponsePart};
use banana_contracts::transcript::ChatImage;
use image::{DynamicImage, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{error_chain_text, truncate_text, ChatError};

const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

/// Everything a generator sees for one request. Only the latest prompt is
/// sent; earlier turns stay local.
#[derive(Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub api_key: &'a str,
    pub model: &'a str,
    pub system_instruction: &'a str,
    pub prompt: &'a str,
    pub image: Option<&'a ChatImage>,
    pub response_modalities: &'a [String],
}

impl std::fmt::Debug for GenerationRequest<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("prompt", &self.prompt)
            .field("has_image", &self.image.is_some())
            .field("response_modalities", &self.response_modalities)
            .finish()
    }
}

pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<RawResponse, ChatError>;
}

#[derive(Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Box<dyn ImageGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: ImageGenerator + 'static>(&mut self, generator: G) {
        self.generators
            .insert(generator.name().to_string(), Box::new(generator));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageGenerator> {
        self.generators.get(name).map(|generator| generator.as_ref())
    }

    /// Removes and returns a generator so a session can own it.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn ImageGenerator>> {
        self.generators.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}

pub fn default_generator_registry() -> GeneratorRegistry {
    let mut generators = GeneratorRegistry::new();
    generators.register(DryrunGenerator);
    generators.register(GeminiGenerator::new());
    generators
}

/// Offline generator: answers with a solid image whose colour is derived from
/// the prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunGenerator;

impl ImageGenerator for DryrunGenerator {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<RawResponse, ChatError> {
        let (width, height) = request
            .image
            .map(|image| (image.width(), image.height()))
            .unwrap_or((256, 256));
        let (r, g, b) = color_from_prompt(request.prompt);
        let mut pixels = RgbImage::new(width, height);
        for pixel in pixels.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let image = ChatImage::from_pixels(DynamicImage::ImageRgb8(pixels))
            .map_err(|err| ChatError::GenerationFailure(err.to_string()))?;

        Ok(RawResponse::Parts {
            parts: vec![
                ResponsePart::text(format!(
                    "Dry run: filled a {width}x{height} canvas with #{r:02x}{g:02x}{b:02x}."
                )),
                ResponsePart::image(image.mime_type(), image.bytes().to_vec()),
            ],
            images: Vec::new(),
        })
    }
}

pub struct GeminiGenerator {
    api_base: String,
    http: HttpClient,
    timeout: Duration,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for GeminiGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiGenerator {
    pub fn new() -> Self {
        let api_base = env::var("GEMINI_API_BASE")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string());
        Self {
            api_base: String::new(),
            http: HttpClient::new(),
            timeout: Duration::from_secs_f64(DEFAULT_REQUEST_TIMEOUT_S),
        }
        .with_api_base(api_base)
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim().trim_end_matches('/').to_string();
        self
    }

    /// Request timeout, clamped to 15–300 seconds.
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        let seconds = if seconds.is_finite() {
            seconds.clamp(15.0, 300.0)
        } else {
            DEFAULT_REQUEST_TIMEOUT_S
        };
        self.timeout = Duration::from_secs_f64(seconds);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &GenerationRequest<'_>) -> Value {
        let mut parts = vec![
            json!({ "text": request.system_instruction }),
            json!({ "text": request.prompt }),
        ];
        if let Some(image) = request.image {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type(),
                    "data": image.to_base64(),
                }
            }));
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": request.response_modalities,
            },
        })
    }

    fn post(&self, endpoint: &str, api_key: &str, payload: &Value) -> Result<Value> {
        let response = self
            .http
            .post(endpoint)
            .header("x-goog-api-key", api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        response_json_or_error("Gemini", response)
    }
}

impl ImageGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<RawResponse, ChatError> {
        let endpoint = self.endpoint_for_model(request.model);
        let payload = Self::build_payload(request);
        debug!(
            model = request.model,
            has_image = request.image.is_some(),
            prompt_chars = request.prompt.chars().count(),
            "Gemini generateContent request"
        );

        let response_payload = self
            .post(&endpoint, request.api_key, &payload)
            .map_err(|err| ChatError::GenerationFailure(error_chain_text(&err, 512)))?;
        if is_blank_payload(&response_payload) {
            return Err(ChatError::GenerationFailure(
                "No response from model".to_string(),
            ));
        }
        RawResponse::from_payload(&response_payload)
            .map_err(|err| ChatError::UnpackFailure(error_chain_text(&err, 512)))
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_blank_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}
