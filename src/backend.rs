//! The classification backend boundary.
//!
//! The pipeline only needs one thing from a backend: replay a history of
//! (image + text) turns, append one more, and return whatever text comes
//! back. [`VisionBackend`] captures exactly that, so tests can script replies
//! and production can plug in any `edgequake_llm` provider through
//! [`LlmBackend`].
//!
//! Replies are untrusted text. Turning them into a classification is
//! [`crate::pipeline::parse`]'s job, not the backend's.

use crate::config::{BackendConfig, RunConfig};
use crate::error::{BackendError, ClassifyError};
use async_trait::async_trait;
use edgequake_llm::{
    AnthropicProvider, ChatMessage, CompletionOptions, GeminiProvider, ImageData, LLMProvider,
    LlmError, MistralProvider, OpenAIProvider, OpenRouterProvider, ProviderFactory,
};
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One conversational turn: text, optionally with an image.
#[derive(Clone)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub image: Option<ImageData>,
}

impl Turn {
    pub fn user(text: impl Into<String>, image: ImageData) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: Some(image),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }

    fn to_message(&self) -> ChatMessage {
        match (self.role, &self.image) {
            (Role::User, Some(image)) => ChatMessage::user_with_images(&self.text, vec![image.clone()]),
            (Role::User, None) => ChatMessage::user(&self.text),
            (Role::Assistant, _) => ChatMessage::assistant(&self.text),
        }
    }
}

impl fmt::Debug for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Turn")
            .field("role", &self.role)
            .field("text", &self.text)
            .field("image", &self.image.as_ref().map(|i| i.mime_type.clone()))
            .finish()
    }
}

/// A vision-capable conversational service.
#[async_trait]
pub trait VisionBackend: Send + Sync {
    /// Send `history` followed by `query`; return the raw reply text.
    async fn converse(&self, history: &[Turn], query: &Turn) -> Result<String, BackendError>;
}

/// [`VisionBackend`] over an `edgequake_llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
}

impl LlmBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl VisionBackend for LlmBackend {
    async fn converse(&self, history: &[Turn], query: &Turn) -> Result<String, BackendError> {
        let messages: Vec<ChatMessage> = history
            .iter()
            .chain(std::iter::once(query))
            .map(Turn::to_message)
            .collect();

        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        };

        self.provider
            .chat(&messages, Some(&options))
            .await
            .map(|response| response.content)
            .map_err(backend_error)
    }
}

fn backend_error(e: LlmError) -> BackendError {
    match e {
        LlmError::AuthError(msg) => BackendError::Auth(msg),
        other => BackendError::from_provider_message(other.to_string()),
    }
}

/// Pick the backend for a run.
///
/// A pre-built [`RunConfig::vision_backend`] wins. Otherwise the
/// [`BackendConfig`] is validated (typed error on a missing credential) and
/// turned into a provider by [`build_provider`].
pub fn resolve_backend(config: &RunConfig) -> Result<Arc<dyn VisionBackend>, ClassifyError> {
    if let Some(ref backend) = config.vision_backend {
        return Ok(Arc::clone(backend));
    }

    let backend = &config.backend;
    backend.validate()?;
    let provider = build_provider(backend)?;
    info!("Using provider '{}' with model '{}'", provider.name(), provider.model());

    Ok(Arc::new(LlmBackend::new(
        provider,
        config.temperature,
        config.max_tokens,
    )))
}

/// Construct the `edgequake_llm` provider named by `backend`.
///
/// Providers that take a key are built directly from
/// [`BackendConfig::api_key`]. Local providers (`ollama`, `lmstudio`, ...)
/// go through `ProviderFactory`.
pub fn build_provider(backend: &BackendConfig) -> Result<Arc<dyn LLMProvider>, ClassifyError> {
    let key = backend.api_key.as_deref().filter(|k| !k.is_empty());
    let model = backend.model.as_str();

    let provider: Arc<dyn LLMProvider> = match (backend.provider.to_lowercase().as_str(), key) {
        ("gemini" | "google", Some(key)) => Arc::new(GeminiProvider::new(key).with_model(model)),
        ("openai", Some(key)) => Arc::new(OpenAIProvider::new(key).with_model(model)),
        ("anthropic", Some(key)) => Arc::new(AnthropicProvider::new(key).with_model(model)),
        ("openrouter", Some(key)) => Arc::new(OpenRouterProvider::new(key).with_model(model)),
        ("mistral", Some(key)) => Arc::new(
            MistralProvider::new(key.to_string(), model.to_string(), MISTRAL_EMBED.to_string(), None)
                .map_err(|e| not_configured(backend, e))?,
        ),
        (name, _) => ProviderFactory::create_llm_provider(name, model)
            .map_err(|e| not_configured(backend, e))?,
    };
    Ok(provider)
}

/// Embedding model `MistralProvider` requires; never used for chat.
const MISTRAL_EMBED: &str = "mistral-embed";

fn not_configured(backend: &BackendConfig, e: LlmError) -> ClassifyError {
    ClassifyError::ProviderNotConfigured {
        provider: backend.provider.clone(),
        hint: format!("{e}"),
    }
}
