use std::fs;
use std::path::Path;

use banana_contracts::events::{EventKind, EventPayload, EventWriter};
use banana_contracts::response::RawResponse;
use banana_contracts::transcript::{ChatImage, ConversationState, Turn};
use image::ImageFormat;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::credentials::CredentialSource;
use crate::error::ChatError;
use crate::normalize::{NormalizedResult, ResponseNormalizer};
use crate::provider::{GenerationRequest, ImageGenerator};

/// One user's conversation. Every mutation takes `&mut self`; give each
/// connection its own session.
pub struct ConversationSession {
    config: ChatConfig,
    state: ConversationState,
    generator: Box<dyn ImageGenerator>,
    credentials: Box<dyn CredentialSource>,
    normalizer: ResponseNormalizer,
    events: Option<EventWriter>,
}

impl ConversationSession {
    pub fn new(
        config: ChatConfig,
        generator: Box<dyn ImageGenerator>,
        credentials: Box<dyn CredentialSource>,
    ) -> Self {
        let state = ConversationState::seeded(&config.greeting);
        Self {
            config,
            state,
            generator,
            credentials,
            normalizer: ResponseNormalizer::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        let mut payload = EventPayload::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("generator".to_string(), json!(self.generator.name()));
        self.emit(EventKind::SessionStarted, payload);
        self
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn transcript(&self) -> &[Turn] {
        self.state.transcript()
    }

    pub fn attached_image(&self) -> Option<&ChatImage> {
        self.state.attached_image()
    }

    /// Replaces the whole state with a fresh greeting and no attachment.
    pub fn reset(&mut self) {
        self.state = ConversationState::seeded(&self.config.greeting);
        debug!("session reset");
        self.emit(EventKind::SessionReset, EventPayload::new());
    }

    /// Decodes an uploaded PNG or JPEG and stages it for the next request.
    pub fn attach_image(&mut self, payload: Vec<u8>) -> Result<(), ChatError> {
        let image =
            ChatImage::decode(payload).map_err(|err| ChatError::UnsupportedImage(err.to_string()))?;
        if !matches!(image.format(), ImageFormat::Png | ImageFormat::Jpeg) {
            return Err(ChatError::UnsupportedImage(format!(
                "{} uploads are not accepted; use PNG or JPEG",
                image.mime_type()
            )));
        }

        info!(
            width = image.width(),
            height = image.height(),
            mime_type = image.mime_type(),
            "image attached"
        );
        let mut payload = EventPayload::new();
        payload.insert("image_sha256".to_string(), json!(image.fingerprint()));
        payload.insert("mime_type".to_string(), json!(image.mime_type()));
        payload.insert("width".to_string(), json!(image.width()));
        payload.insert("height".to_string(), json!(image.height()));
        self.state.stage_image(image);
        self.emit(EventKind::ImageAttached, payload);
        Ok(())
    }

    pub fn attach_image_path(&mut self, path: &Path) -> Result<(), ChatError> {
        let payload = fs::read(path).map_err(|err| {
            ChatError::UnsupportedImage(format!("failed reading {}: {err}", path.display()))
        })?;
        self.attach_image(payload)
    }

    /// Empty text is not rejected here; the caller decides what to submit.
    pub fn append_user_turn(&mut self, text: impl Into<String>) -> &Turn {
        self.push_turn(Turn::user(text))
    }

    /// Generates a reply to `text` and appends it as an assistant turn.
    ///
    /// Always appends exactly one turn. Failures end up in the returned
    /// result's `error_message` and in the turn's text.
    pub fn request_assistant_turn(&mut self, text: &str) -> NormalizedResult {
        let result = match self.call_generator(text) {
            Ok(raw) => self.normalizer.normalize(raw, self.state.attached_image()),
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "generation failed");
                let mut payload = EventPayload::new();
                payload.insert("kind".to_string(), json!(err.kind()));
                payload.insert("message".to_string(), json!(err.to_string()));
                self.emit(EventKind::GenerationFailed, payload);
                self.normalizer.recover(&err, self.state.attached_image())
            }
        };

        self.push_turn(Turn::assistant(
            result.display_text(),
            result.image.clone(),
        ));
        result
    }

    /// `append_user_turn` followed by `request_assistant_turn`.
    pub fn submit(&mut self, prompt: &str) -> NormalizedResult {
        self.append_user_turn(prompt);
        self.request_assistant_turn(prompt)
    }

    fn call_generator(&self, prompt: &str) -> Result<RawResponse, ChatError> {
        let api_key = self
            .credentials
            .lookup(&self.config.api_key_var)
            .ok_or_else(|| ChatError::MissingCredential {
                var: self.config.api_key_var.clone(),
            })?;
        let request = GenerationRequest {
            api_key: &api_key,
            model: &self.config.model,
            system_instruction: &self.config.system_instruction,
            prompt,
            image: self.state.attached_image(),
            response_modalities: &self.config.response_modalities,
        };
        self.generator.generate(&request)
    }

    fn push_turn(&mut self, turn: Turn) -> &Turn {
        let mut payload = EventPayload::new();
        payload.insert("index".to_string(), json!(self.state.len()));
        payload.insert("role".to_string(), json!(turn.role().as_str()));
        payload.insert("text_chars".to_string(), json!(turn.text().chars().count()));
        payload.insert(
            "image_sha256".to_string(),
            turn.image()
                .map(|image| json!(image.fingerprint()))
                .unwrap_or(Value::Null),
        );
        self.emit(EventKind::TurnAppended, payload);
        self.state.push(turn)
    }

    // Event log failures never fail a turn.
    fn emit(&self, kind: EventKind, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(kind, payload) {
            warn!(event = kind.as_str(), error = %err, "failed to write session event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use banana_contracts::events::read_events;
    use banana_contracts::response::{ImageEntry, ResponsePart};
    use banana_contracts::transcript::Role;
    use image::{DynamicImage, Rgb, RgbImage};

    use super::*;
    use crate::config::DEFAULT_GREETING;
    use crate::credentials::StaticCredentials;

    #[derive(Debug, Clone, PartialEq)]
    struct SeenRequest {
        api_key: String,
        model: String,
        system_instruction: String,
        prompt: String,
        image: Option<ChatImage>,
    }

    struct StubGenerator {
        reply: Result<RawResponse, ChatError>,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
    }

    impl ImageGenerator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }

        fn generate(&self, request: &GenerationRequest<'_>) -> Result<RawResponse, ChatError> {
            self.seen.lock().expect("seen lock").push(SeenRequest {
                api_key: request.api_key.to_string(),
                model: request.model.to_string(),
                system_instruction: request.system_instruction.to_string(),
                prompt: request.prompt.to_string(),
                image: request.image.cloned(),
            });
            self.reply.clone()
        }
    }

    fn encode(rgb: [u8; 3], format: ImageFormat) -> Vec<u8> {
        let mut pixels = RgbImage::new(2, 2);
        for pixel in pixels.pixels_mut() {
            *pixel = Rgb(rgb);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(pixels)
            .write_to(&mut Cursor::new(&mut bytes), format)
            .expect("encode image");
        bytes
    }

    fn png(rgb: [u8; 3]) -> Vec<u8> {
        encode(rgb, ImageFormat::Png)
    }

    fn session_with(
        reply: Result<RawResponse, ChatError>,
        credentials: StaticCredentials,
    ) -> (ConversationSession, Arc<Mutex<Vec<SeenRequest>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let generator = StubGenerator {
            reply,
            seen: Arc::clone(&seen),
        };
        let session = ConversationSession::new(
            ChatConfig::default(),
            Box::new(generator),
            Box::new(credentials),
        );
        (session, seen)
    }

    fn keyed() -> StaticCredentials {
        StaticCredentials::new().with("GEMINI_API_KEY", "key-123")
    }

    fn seen_count(seen: &Arc<Mutex<Vec<SeenRequest>>>) -> usize {
        seen.lock().expect("seen lock").len()
    }

    #[test]
    fn new_session_starts_with_greeting() {
        let (session, _) = session_with(Ok(RawResponse::Empty), keyed());
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(session.transcript()[0].role(), Role::Assistant);
        assert_eq!(session.transcript()[0].text(), DEFAULT_GREETING);
        assert!(session.attached_image().is_none());
    }

    #[test]
    fn reset_is_idempotent_and_clears_attachment() -> anyhow::Result<()> {
        let (mut session, _) = session_with(Ok(RawResponse::from("ok")), keyed());
        session.attach_image(png([1, 2, 3]))?;
        session.submit("hello");
        assert_eq!(session.transcript().len(), 3);

        session.reset();
        let first = session.state().clone();
        session.reset();
        let second = session.state().clone();

        assert_eq!(first, second);
        assert_eq!(second.len(), 1);
        assert_eq!(second.transcript()[0].role(), Role::Assistant);
        assert_eq!(second.transcript()[0].text(), DEFAULT_GREETING);
        assert!(second.attached_image().is_none());
        Ok(())
    }

    #[test]
    fn failing_generator_still_appends_an_assistant_turn() {
        let (mut session, _) = session_with(
            Err(ChatError::GenerationFailure("boom".to_string())),
            keyed(),
        );
        session.append_user_turn("hello");
        let result = session.request_assistant_turn("hello");

        assert!(result.is_error());
        let transcript = session.transcript();
        assert_eq!(transcript.len(), 3);
        assert_eq!(transcript[1].role(), Role::User);
        assert_eq!(transcript[1].text(), "hello");
        let last = &transcript[2];
        assert_eq!(last.role(), Role::Assistant);
        assert!(!last.text().is_empty());
        assert!(last.text().contains("boom"));
        assert_eq!(last.image(), None);
    }

    #[test]
    fn generation_failure_drops_image_but_keeps_attachment_staged() -> anyhow::Result<()> {
        let (mut session, _) = session_with(
            Err(ChatError::GenerationFailure("boom".to_string())),
            keyed(),
        );
        session.attach_image(png([4, 5, 6]))?;
        let result = session.submit("hello");

        assert!(result.image.is_none());
        assert_eq!(session.transcript()[2].image(), None);
        assert!(session.attached_image().is_some());
        Ok(())
    }

    #[test]
    fn unpack_failure_keeps_the_attached_image_on_the_turn() -> anyhow::Result<()> {
        let (mut session, _) = session_with(
            Err(ChatError::UnpackFailure("bad base64".to_string())),
            keyed(),
        );
        session.attach_image(png([7, 8, 9]))?;
        let attached = session.attached_image().cloned();

        session.submit("make it purple");
        let last = &session.transcript()[2];
        assert!(last.text().contains("bad base64"));
        assert_eq!(last.image().cloned(), attached);
        Ok(())
    }

    #[test]
    fn missing_credential_fails_before_calling_the_generator() {
        let (mut session, seen) = session_with(Ok(RawResponse::from("ok")), StaticCredentials::new());
        let result = session.submit("hello");

        assert_eq!(seen_count(&seen), 0);
        let message = result.error_message.clone().unwrap_or_default();
        assert!(message.starts_with("Error:"));
        assert!(message.contains("GEMINI_API_KEY not found"));
        assert_eq!(session.transcript()[2].text(), message);
    }

    #[test]
    fn successful_turn_carries_text_and_image() -> anyhow::Result<()> {
        let raw = RawResponse::Parts {
            parts: vec![
                ResponsePart::text("Changed the sky to purple."),
                ResponsePart::image("image/png", png([128, 0, 128])),
            ],
            images: Vec::new(),
        };
        let (mut session, seen) = session_with(Ok(raw), keyed());
        session.attach_image(png([0, 0, 255]))?;
        let attached = session.attached_image().cloned();

        let result = session.submit("make the sky purple");
        assert!(!result.is_error());
        assert_eq!(result.text, "Changed the sky to purple.");

        let last = &session.transcript()[2];
        assert_eq!(last.text(), "Changed the sky to purple.");
        let expected = ChatImage::decode(png([128, 0, 128]))?;
        assert_eq!(last.image(), Some(&expected));

        let requests = seen.lock().expect("seen lock").clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].api_key, "key-123");
        assert_eq!(requests[0].model, "gemini-2.5-flash-image-preview");
        assert!(requests[0]
            .system_instruction
            .contains("Generate an image according to the instructions."));
        assert_eq!(requests[0].prompt, "make the sky purple");
        assert_eq!(requests[0].image, attached);
        Ok(())
    }

    #[test]
    fn only_the_latest_prompt_goes_upstream() {
        let (mut session, seen) = session_with(Ok(RawResponse::from("ok")), keyed());
        session.submit("first");
        session.submit("second");

        let requests = seen.lock().expect("seen lock").clone();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].prompt, "second");
        assert_eq!(session.transcript().len(), 5);
    }

    #[test]
    fn attachment_is_not_retroactive() -> anyhow::Result<()> {
        let (mut session, seen) = session_with(Ok(RawResponse::from("ok")), keyed());
        session.submit("before");
        session.attach_image(png([1, 1, 1]))?;
        session.submit("after");

        let requests = seen.lock().expect("seen lock").clone();
        assert!(requests[0].image.is_none());
        assert!(requests[1].image.is_some());
        assert!(session.transcript()[2].image().is_none());
        Ok(())
    }

    #[test]
    fn images_list_result_reaches_the_turn() -> anyhow::Result<()> {
        let raw = RawResponse::Images(vec![ImageEntry::Encoded(png([10, 10, 10]))]);
        let (mut session, _) = session_with(Ok(raw), keyed());
        session.submit("draw");
        let expected = ChatImage::decode(png([10, 10, 10]))?;
        assert_eq!(session.transcript()[2].image(), Some(&expected));
        assert_eq!(session.transcript()[2].text(), "");
        Ok(())
    }

    #[test]
    fn attach_rejects_garbage_and_other_formats() {
        let (mut session, _) = session_with(Ok(RawResponse::Empty), keyed());
        assert!(matches!(
            session.attach_image(b"nope".to_vec()),
            Err(ChatError::UnsupportedImage(_))
        ));
        assert!(matches!(
            session.attach_image(encode([1, 1, 1], ImageFormat::Bmp)),
            Err(ChatError::UnsupportedImage(_))
        ));
        assert!(session.attached_image().is_none());
    }

    #[test]
    fn attach_accepts_jpeg_from_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("upload.jpg");
        fs::write(&path, encode([200, 100, 50], ImageFormat::Jpeg))?;

        let (mut session, _) = session_with(Ok(RawResponse::Empty), keyed());
        session.attach_image_path(&path)?;
        let attached = session.attached_image().expect("attached image");
        assert_eq!(attached.mime_type(), "image/jpeg");

        assert!(session
            .attach_image_path(&temp.path().join("missing.png"))
            .is_err());
        Ok(())
    }

    #[test]
    fn session_events_are_logged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let (session, _) = session_with(
            Err(ChatError::GenerationFailure("boom".to_string())),
            keyed(),
        );
        let mut session = session.with_events(EventWriter::new(&events_path, "session-1"));
        session.attach_image(png([1, 2, 3]))?;
        session.submit("hello");
        session.reset();

        let rows = read_events(&events_path)?;
        let types: Vec<&str> = rows
            .iter()
            .filter_map(|row| row["type"].as_str())
            .collect();
        assert_eq!(
            types,
            vec![
                "session_started",
                "image_attached",
                "turn_appended",
                "generation_failed",
                "turn_appended",
                "session_reset",
            ]
        );
        assert_eq!(rows[0]["generator"], json!("stub"));
        Ok(())
    }
}
