//! # OpenAI-compatible chat endpoint
//!
//! [OpenAIChat] is an explicitly constructed handle around an [async_openai::Client]. There is no process-wide
//! cached client: build one handle (e.g. via [OpenAIChat::from_env]) and pass it to every
//! [Chain](crate::chain::Chain) or [Conversation](crate::utils::llm::Conversation) that should share it.
//!
//! Rate-limit backoff is done by `async_openai` itself. On top of that, [OpenAIChat] retries any failed call up to
//! the `max_retries` it is given, with a capped exponential backoff that ends early when the token is cancelled.

use std::env;
use std::time::Duration;
use anyhow::Result as AnyResult;
use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest, CreateChatCompletionRequestArgs, Stop,
};
use async_trait::async_trait;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use crate::errors::{Error, Result};
use crate::utils::llm::{ChatComplete, ChatMessage, ConversationConfig, Role, SendPrompt, DEFAULT_MAX_RETRIES};

/// Model used when neither the environment nor the request names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
pub const ORG_ID_VAR: &str = "OPENAI_ORG_ID";
pub const MODEL_VAR: &str = "OPENAI_MODEL";

/// Connection settings of an OpenAI-compatible endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct OpenAIClientConfig {
    pub api_key: String,
    /// `None` means the official OpenAI endpoint.
    pub api_base: Option<String>,
    pub org_id: Option<String>,
    pub model: String,
}

impl std::fmt::Debug for OpenAIClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIClientConfig")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("org_id", &self.org_id)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAIClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: None,
            org_id: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Read `OPENAI_API_KEY` (required), `OPENAI_BASE_URL`, `OPENAI_ORG_ID` and `OPENAI_MODEL`.
    /// A `.env` file in the working directory or its parents is loaded first if there is one.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let api_key = non_empty(API_KEY_VAR)
            .ok_or_else(|| Error::Configuration(format!("environment variable {} is not set", API_KEY_VAR)))?;
        Ok(Self {
            api_key,
            api_base: non_empty(BASE_URL_VAR),
            org_id: non_empty(ORG_ID_VAR),
            model: non_empty(MODEL_VAR).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }
}

/// Chat endpoint backed by an OpenAI-compatible API.
#[derive(Clone, Debug)]
pub struct OpenAIChat {
    pub client: Client<OpenAIConfig>,
    pub model: String,
}

impl OpenAIChat {
    pub fn new(config: OpenAIClientConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key);
        if let Some(api_base) = config.api_base {
            openai_config = openai_config.with_api_base(api_base);
        }
        if let Some(org_id) = config.org_id {
            openai_config = openai_config.with_org_id(org_id);
        }
        Self {
            client: Client::with_config(openai_config),
            model: config.model,
        }
    }

    pub fn from_env() -> Result<Self> {
        OpenAIClientConfig::from_env().map(Self::new)
    }

    /// Build the request for `messages`. Options override the handle's model when they name one.
    pub fn build_request(&self, messages: &[ChatMessage], options: Option<&ConversationConfig>) -> AnyResult<CreateChatCompletionRequest> {
        let messages = messages.iter().map(to_request_message).collect::<AnyResult<Vec<_>>>()?;
        let model = options.and_then(|o| o.model.clone()).unwrap_or_else(|| self.model.clone());
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(messages);
        if let Some(options) = options {
            if let Some(temperature) = options.temperature {
                args.temperature(temperature);
            }
            if let Some(top_p) = options.top_p {
                args.top_p(top_p);
            }
            if let Some(max_tokens) = options.max_tokens {
                args.max_tokens(max_tokens);
            }
            if let Some(presence_penalty) = options.presence_penalty {
                args.presence_penalty(presence_penalty);
            }
            if let Some(frequency_penalty) = options.frequency_penalty {
                args.frequency_penalty(frequency_penalty);
            }
            if let Some(stop) = &options.stop {
                args.stop(Stop::StringArray(stop.clone()));
            }
            if let Some(seed) = options.seed {
                args.seed(seed);
            }
            if let Some(user) = &options.user {
                args.user(user.clone());
            }
        }
        Ok(args.build()?)
    }
}

fn to_request_message(message: &ChatMessage) -> AnyResult<ChatCompletionRequestMessage> {
    let content = message.content.as_str();
    let message: ChatCompletionRequestMessage = match message.role {
        Role::System => ChatCompletionRequestSystemMessageArgs::default().content(content).build()?.into(),
        Role::User => ChatCompletionRequestUserMessageArgs::default().content(content).build()?.into(),
        Role::Assistant => ChatCompletionRequestAssistantMessageArgs::default().content(content).build()?.into(),
    };
    Ok(message)
}

#[async_trait]
impl ChatComplete for OpenAIChat {
    async fn complete(&self,
                      messages: &[ChatMessage],
                      options: Option<&ConversationConfig>,
                      max_retries: u32,
                      cancel: &CancellationToken) -> AnyResult<Option<String>> {
        let request = self.build_request(messages, options)?;
        let mut attempt = 0;
        loop {
            match self.client.chat().create(request.clone()).await {
                Ok(response) => {
                    if let Some(usage) = &response.usage {
                        debug!("Chat completion used {} prompt + {} completion tokens", usage.prompt_tokens, usage.completion_tokens);
                    }
                    return Ok(response.choices.into_iter().next().and_then(|choice| choice.message.content));
                }
                Err(e) if attempt < max_retries && !cancel.is_cancelled() => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    warn!("Chat completion failed ({}), retry {}/{} in {:?}", e, attempt, max_retries, delay);
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Cancelled while waiting to retry");
                            return Err(e.into());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Backoff before retry `attempt` (1-based): doubles from [RETRY_BASE_DELAY] up to [RETRY_MAX_DELAY].
fn retry_delay(attempt: u32) -> Duration {
    RETRY_BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
        .min(RETRY_MAX_DELAY)
}

/// Send one prompt with a client built from the environment.
///
/// Every call builds a fresh [OpenAIChat]; keep your own handle when sending many prompts.
pub async fn ask(prompt: &str, system_prompt: Option<&str>) -> Result<Option<String>> {
    let chat = OpenAIChat::from_env()?;
    chat.send(prompt, system_prompt, None, DEFAULT_MAX_RETRIES, &CancellationToken::new())
        .await
        .map_err(|source| Error::SenderFailure { step: None, source })
}
