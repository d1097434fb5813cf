pub mod config;
pub mod credentials;
pub mod error;
pub mod normalize;
pub mod provider;
pub mod session;
pub mod toolsets;

pub use config::ChatConfig;
pub use credentials::{CredentialSource, EnvCredentials, StaticCredentials};
pub use error::ChatError;
pub use normalize::{NormalizedResult, ResponseNormalizer};
pub use provider::{
    default_generator_registry, DryrunGenerator, GeminiGenerator, GenerationRequest,
    GeneratorRegistry, ImageGenerator,
};
pub use session::ConversationSession;
pub use toolsets::{AgentProfile, ToolServerSpec};
