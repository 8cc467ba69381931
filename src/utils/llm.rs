//! # LLM endpoints
//!
//! The endpoint of a prompt is an LLM that consumes it and produces a reply. `promptline` only needs two
//! capabilities from an endpoint:
//! * [ChatComplete]: complete a list of chat messages.
//! * [SendPrompt]: send one prompt with an optional system prompt. Every [ChatComplete] is a [SendPrompt].
//!
//! A reply of `None` means the model generated no content. It is a valid outcome, not an error.
//!
//! [Conversation] keeps a multi-turn history on top of any [ChatComplete].

use std::fs;
use std::path::Path;
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use crate::errors::{Error, Result};

pub mod openai;

/// Retry budget used when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Request parameters of a chat completion. Unset fields are left to the endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationConfig {
    /// Overrides the endpoint's default model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ConversationConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u16) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Trait for completing a list of chat messages.
#[async_trait]
pub trait ChatComplete: Send + Sync {
    /// Complete `messages`. Implementations retry failed calls at most `max_retries` times and should stop retrying
    /// once `cancel` is cancelled.
    async fn complete(&self,
                      messages: &[ChatMessage],
                      options: Option<&ConversationConfig>,
                      max_retries: u32,
                      cancel: &CancellationToken) -> AnyResult<Option<String>>;
}

/// Trait for sending a single prompt to an LLM.
#[async_trait]
pub trait SendPrompt: Send + Sync {
    async fn send(&self,
                  prompt: &str,
                  system_prompt: Option<&str>,
                  options: Option<&ConversationConfig>,
                  max_retries: u32,
                  cancel: &CancellationToken) -> AnyResult<Option<String>>;
}

/// Blanket impl of SendPrompt for ChatComplete, sending `[system?, user]`.
#[async_trait]
impl<T: ChatComplete + ?Sized> SendPrompt for T {
    async fn send(&self,
                  prompt: &str,
                  system_prompt: Option<&str>,
                  options: Option<&ConversationConfig>,
                  max_retries: u32,
                  cancel: &CancellationToken) -> AnyResult<Option<String>> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system_prompt) = system_prompt {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.push(ChatMessage::user(prompt));
        self.complete(&messages, options, max_retries, cancel).await
    }
}

/// A multi-turn conversation with a chat endpoint.
///
/// The system prompt is not part of [Conversation::history]; it is prepended to every request.
#[derive(Debug, Clone)]
pub struct Conversation<C: ChatComplete> {
    client: C,
    system_prompt: Option<String>,
    options: Option<ConversationConfig>,
    max_retries: u32,
    history: Vec<ChatMessage>,
}

/// On-disk shape of a [Conversation], without the client.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationRecord {
    system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    options: Option<ConversationConfig>,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    messages: Vec<ChatMessage>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl<C: ChatComplete> Conversation<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            system_prompt: None,
            options: None,
            max_retries: DEFAULT_MAX_RETRIES,
            history: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_options(mut self, options: ConversationConfig) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[inline]
    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// User and assistant turns so far, oldest first.
    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// The content of the latest assistant turn.
    pub fn last_reply(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Forget all turns. The system prompt and options stay.
    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Send the next user message with the whole history.
    ///
    /// On success the user turn is recorded, followed by the assistant turn when the reply has content.
    /// On failure the history is left as it was.
    pub async fn send(&mut self, message: impl Into<String>, cancel: &CancellationToken) -> Result<Option<String>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { completed_steps: None });
        }
        let message = ChatMessage::user(message);
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if let Some(system_prompt) = &self.system_prompt {
            messages.push(ChatMessage::system(system_prompt.as_str()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(message.clone());
        debug!("Sending conversation turn with {} messages", messages.len());

        let reply = self.client
            .complete(&messages, self.options.as_ref(), self.max_retries, cancel)
            .await
            .map_err(|source| Error::SenderFailure { step: None, source })?;

        self.history.push(message);
        if let Some(content) = reply.as_deref().filter(|c| !c.is_empty()) {
            self.history.push(ChatMessage::assistant(content));
        }
        Ok(reply)
    }

    pub fn to_json(&self) -> Result<String> {
        let record = ConversationRecord {
            system_prompt: self.system_prompt.clone(),
            options: self.options.clone(),
            max_retries: self.max_retries,
            messages: self.history.clone(),
        };
        Ok(serde_json::to_string_pretty(&record)?)
    }

    /// Restore a conversation saved by [Conversation::to_json] onto `client`.
    pub fn from_json(json: &str, client: C) -> Result<Self> {
        let record: ConversationRecord = serde_json::from_str(json)?;
        if let Some(m) = record.messages.iter().find(|m| m.role == Role::System) {
            return Err(Error::malformed(format!("system message in conversation history: {}", m.content)));
        }
        Ok(Self {
            client,
            system_prompt: record.system_prompt,
            options: record.options,
            max_retries: record.max_retries,
            history: record.messages,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, client: C) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json, client)
    }
}

#[cfg(test)]
mod test_llm {
    use std::sync::Mutex;
    use anyhow::{anyhow, Result as AnyResult};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use super::{ChatComplete, ChatMessage, Conversation, ConversationConfig, Role, SendPrompt};
    use crate::errors::Error;

    /// Replies with "reply #n" and records every request.
    #[derive(Default)]
    struct ScriptedChat {
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        fail: bool,
        silent: bool,
    }

    #[async_trait]
    impl ChatComplete for ScriptedChat {
        async fn complete(&self,
                          messages: &[ChatMessage],
                          _options: Option<&ConversationConfig>,
                          _max_retries: u32,
                          _cancel: &CancellationToken) -> AnyResult<Option<String>> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(messages.to_vec());
            if self.fail {
                Err(anyhow!("endpoint unavailable"))
            } else if self.silent {
                Ok(None)
            } else {
                Ok(Some(format!("reply #{}", requests.len())))
            }
        }
    }

    #[tokio::test]
    async fn test_send_prompt_blanket() {
        let chat = ScriptedChat::default();
        let cancel = CancellationToken::new();
        let reply = chat.send("hi", Some("be brief"), None, 0, &cancel).await.unwrap();
        assert_eq!(Some("reply #1".to_string()), reply);
        chat.send("again", None, None, 0, &cancel).await.unwrap();

        let requests = chat.requests.lock().unwrap();
        assert_eq!(vec![ChatMessage::system("be brief"), ChatMessage::user("hi")], requests[0]);
        assert_eq!(vec![ChatMessage::user("again")], requests[1]);
    }

    #[tokio::test]
    async fn test_conversation_history() {
        let mut conversation = Conversation::new(ScriptedChat::default()).with_system_prompt("You are terse.");
        let cancel = CancellationToken::new();
        conversation.send("first", &cancel).await.unwrap();
        let reply = conversation.send("second", &cancel).await.unwrap();
        assert_eq!(Some("reply #2".to_string()), reply);
        assert_eq!(Some("reply #2"), conversation.last_reply());
        assert_eq!(4, conversation.history().len());

        let requests = conversation.client().requests.lock().unwrap();
        assert_eq!(vec![
            ChatMessage::system("You are terse."),
            ChatMessage::user("first"),
            ChatMessage::assistant("reply #1"),
            ChatMessage::user("second"),
        ], requests[1]);
    }

    #[tokio::test]
    async fn test_conversation_failure_keeps_history() {
        let chat = ScriptedChat { fail: true, ..Default::default() };
        let mut conversation = Conversation::new(chat);
        let result = conversation.send("hello", &CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::SenderFailure { step: None, .. })));
        assert!(conversation.history().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_empty_reply() {
        let chat = ScriptedChat { silent: true, ..Default::default() };
        let mut conversation = Conversation::new(chat);
        let reply = conversation.send("hello", &CancellationToken::new()).await.unwrap();
        assert_eq!(None, reply);
        assert_eq!(vec![ChatMessage::user("hello")], conversation.history());
        assert_eq!(None, conversation.last_reply());
    }

    #[tokio::test]
    async fn test_conversation_cancelled() {
        let mut conversation = Conversation::new(ScriptedChat::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(conversation.send("hello", &cancel).await, Err(Error::Cancelled { completed_steps: None })));
        assert!(conversation.client().requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_save_load() {
        let mut conversation = Conversation::new(ScriptedChat::default())
            .with_system_prompt("sys")
            .with_options(ConversationConfig::default().with_temperature(0.5))
            .with_max_retries(1);
        conversation.send("one", &CancellationToken::new()).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conversation.json");
        conversation.save(&path).unwrap();

        let mut restored = Conversation::load(&path, ScriptedChat::default()).unwrap();
        assert_eq!(Some("sys"), restored.system_prompt());
        assert_eq!(conversation.history(), restored.history());
        assert_eq!(Role::Assistant, restored.history()[1].role);

        restored.clear();
        assert!(restored.history().is_empty());
        assert_eq!(Some("sys"), restored.system_prompt());
    }

    #[test]
    fn test_conversation_malformed_json() {
        let json = r#"{"systemPrompt": null, "messages": [{"role": "system", "content": "x"}]}"#;
        assert!(matches!(Conversation::from_json(json, ScriptedChat::default()), Err(Error::MalformedData(_))));
        let json = r#"{"systemPrompt": null, "messages": [{"role": "robot", "content": "x"}]}"#;
        assert!(matches!(Conversation::from_json(json, ScriptedChat::default()), Err(Error::MalformedData(_))));
        let json = r#"{"systemPrompt": null}"#;
        assert!(matches!(Conversation::from_json(json, ScriptedChat::default()), Err(Error::MalformedData(_))));
    }

    #[test]
    fn test_config_json() {
        let config = ConversationConfig::default().with_model("gpt-4o").with_max_tokens(256);
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(serde_json::json!({"model": "gpt-4o", "maxTokens": 256}), json);
    }
}
