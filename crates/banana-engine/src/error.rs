use thiserror::Error;

/// Failures a chat turn can run into. None of them end the session: they are
/// turned into display text at the turn boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("{var} not found. Please set it in your .env file or as an environment variable.")]
    MissingCredential { var: String },
    #[error("generation failed: {0}")]
    GenerationFailure(String),
    #[error("unpack failed: {0}")]
    UnpackFailure(String),
    #[error("unsupported image: {0}")]
    UnsupportedImage(String),
}

impl ChatError {
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::MissingCredential { .. } => "missing_credential",
            ChatError::GenerationFailure(_) => "generation_failure",
            ChatError::UnpackFailure(_) => "unpack_failure",
            ChatError::UnsupportedImage(_) => "unsupported_image",
        }
    }
}

/// Flattens an `anyhow` chain into one line, skipping repeated messages.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
