use std::path::{Path, PathBuf};
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::credentials::CredentialSource;

pub const DEFAULT_AGENT_NAME: &str = "genmedia_agent";
pub const DEFAULT_AGENT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_AGENT_INSTRUCTION: &str = "You're a creative assistant that can help users with creating audio, images, video, and music via your generative media tools. You also have the ability to composit these using your available tools.
Feel free to be helpful in your suggestions, based on the information you know or can retrieve from your tools.
If you're asked to translate into other languages, please do.";

/// Passed through as-is; unset values stay unset.
const PASSTHROUGH_ENV: &[&str] = &[
    "PROJECT_ID",
    "LOCATION",
    "GENMEDIA_BUCKET",
];

const CREDENTIAL_ENV: &[&str] = &[
    "GOOGLE_APPLICATION_CREDENTIALS",
    "ARIZE_API_KEY",
    "ARIZE_SPACE_ID",
    "ARIZE_PROJECT_NAME",
    "ARIZE_INTERFACE",
];

/// Always set, falling back to the listed default.
const DEFAULTED_ENV: &[(&str, &str)] = &[
    ("OTEL_EXPORTER_OTLP_TRACES_HEADERS", ""),
    ("OTEL_EXPORTER_OTLP_HEADERS", ""),
    ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
    ("OTEL_EXPORTER_OTLP_TRACES_ENDPOINT", ""),
    ("ENABLE_OTEL_TRACING", "false"),
];

const SECRET_MARKERS: &[&str] = &["KEY", "HEADERS", "CREDENTIALS"];

#[derive(Debug, Clone, PartialEq)]
pub struct ToolServerSpec {
    pub name: String,
    pub command: PathBuf,
    pub args: Vec<String>,
    pub bucket_path_var: String,
    pub timeout: Duration,
}

impl ToolServerSpec {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<PathBuf>,
        bucket_path_var: impl Into<String>,
        timeout_s: u64,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            bucket_path_var: bucket_path_var.into(),
            timeout: Duration::from_secs(timeout_s),
        }
    }

    /// Environment in launch order. `None` marks a variable that is unset.
    pub fn resolve_env(&self, lookup: &dyn CredentialSource) -> IndexMap<String, Option<String>> {
        let mut env = IndexMap::new();
        for key in PASSTHROUGH_ENV {
            env.insert(key.to_string(), lookup.lookup(key));
        }
        env.insert(
            self.bucket_path_var.clone(),
            lookup.lookup(&self.bucket_path_var),
        );
        for key in CREDENTIAL_ENV {
            env.insert(key.to_string(), lookup.lookup(key));
        }
        for (key, default) in DEFAULTED_ENV {
            env.insert(
                key.to_string(),
                Some(lookup.lookup(key).unwrap_or_else(|| default.to_string())),
            );
        }
        env
    }

    pub fn manifest(&self, lookup: &dyn CredentialSource) -> Value {
        let env: serde_json::Map<String, Value> = self
            .resolve_env(lookup)
            .into_iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Some(value) if is_secret(&key) && !value.is_empty() => json!("[REDACTED]"),
                    Some(value) => json!(value),
                    None => Value::Null,
                };
                (key, rendered)
            })
            .collect();
        json!({
            "name": self.name,
            "command": self.command.display().to_string(),
            "args": self.args,
            "timeout_s": self.timeout.as_secs(),
            "env": env,
        })
    }
}

fn is_secret(key: &str) -> bool {
    SECRET_MARKERS.iter().any(|marker| key.contains(marker))
}

/// The imagen / chirp3 / veo / avtool / lyria servers under `bin_dir`.
pub fn genmedia_toolsets(bin_dir: &Path) -> Vec<ToolServerSpec> {
    [
        ("imagen", "mcp-imagen-go", "IMAGEN_BUCKET_PATH", 180),
        ("chirp3", "mcp-chirp3-go", "CHIRP3_BUCKET_PATH", 180),
        ("veo", "mcp-veo-go", "VEO_BUCKET_PATH", 480),
        ("avtool", "mcp-avtool-go", "AVTOOL_BUCKET_PATH", 300),
        ("lyria", "mcp-lyria-go", "LYRIA_BUCKET_PATH", 180),
    ]
    .into_iter()
    .map(|(name, binary, bucket_var, timeout_s)| {
        ToolServerSpec::new(name, bin_dir.join(binary), bucket_var, timeout_s)
    })
    .collect()
}

/// `GENMEDIA_BIN_DIR`, else `$HOME/go/bin`, else `go/bin`.
pub fn default_bin_dir(lookup: &dyn CredentialSource) -> PathBuf {
    if let Some(dir) = lookup.lookup("GENMEDIA_BIN_DIR") {
        return PathBuf::from(dir);
    }
    match lookup.lookup("HOME") {
        Some(home) => Path::new(&home).join("go").join("bin"),
        None => PathBuf::from("go").join("bin"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentProfile {
    pub name: String,
    pub model: String,
    pub instruction: String,
    pub toolsets: Vec<ToolServerSpec>,
}

impl AgentProfile {
    /// The genmedia agent; the model comes from `AGENT_MODEL` when set.
    pub fn genmedia(lookup: &dyn CredentialSource, bin_dir: &Path) -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.to_string(),
            model: lookup
                .lookup("AGENT_MODEL")
                .unwrap_or_else(|| DEFAULT_AGENT_MODEL.to_string()),
            instruction: DEFAULT_AGENT_INSTRUCTION.to_string(),
            toolsets: genmedia_toolsets(bin_dir),
        }
    }

    pub fn manifest(&self, lookup: &dyn CredentialSource) -> Value {
        json!({
            "name": self.name,
            "model": self.model,
            "instruction": self.instruction,
            "toolsets": self
                .toolsets
                .iter()
                .map(|spec| spec.manifest(lookup))
                .collect::<Vec<Value>>(),
        })
    }
}
