use crate::credentials::non_empty_env;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";
pub const DEFAULT_GREETING: &str = "How may I assist you today?";
pub const DEFAULT_API_KEY_VAR: &str = "GEMINI_API_KEY";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "#INSTRUCTIONS
Generate an image according to the instructions.
Specify in the output text the changes made to the image.
#OUTPUT
A generated image and a short text.";

/// Fixed inputs of a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub model: String,
    pub system_instruction: String,
    pub greeting: String,
    /// Name of the credential looked up on every generation request.
    pub api_key_var: String,
    pub response_modalities: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_IMAGE_MODEL.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            api_key_var: DEFAULT_API_KEY_VAR.to_string(),
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
        }
    }
}

impl ChatConfig {
    /// Defaults with `GEMINI_IMAGE_MODEL` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(model) = non_empty_env("GEMINI_IMAGE_MODEL") {
            config.model = model;
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    pub fn with_api_key_var(mut self, var: impl Into<String>) -> Self {
        self.api_key_var = var.into();
        self
    }
}
