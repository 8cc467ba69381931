//! # promptline
//!
//! Prompt templates and linear prompt chains over chat completion APIs in Rust
//!
//! **Note: `promptline` is now a WIP, so the APIs are subject to change.**
//!
//! ## Usage
//! `promptline` is not released on crates.io. To use it, add a dependency in `Cargo.toml`
//! ```toml
//! promptline = { git = "https://github.com/ifsheldon/promptline.git", branch = "main"}
//! ```
//!
//! ## Concepts and Design
//! `promptline` is prompt-centric. Every step that turns inputs into a prompt and a prompt into a reply is explicit,
//! and the API hierarchy is kept flat. Cycle speed is NOT a top priority
//! since an LLM can take trillions of cycles to respond to a request.
//!
//! ### Prompt Template and Placeholder
//!
//! A template looks like
//!
//! ```text
//! You are a {{tone}} assistant. Summarize {{document}}.
//! ```
//!
//! `{{tone}}` and `{{document}}` are placeholders. A placeholder name consists of letters, digits and underscores.
//! A [PromptTemplate](crate::prompt::PromptTemplate) may carry defaults, e.g. `tone = "friendly"`, so only
//! `document` is required when rendering it. See [prompt](crate::prompt).
//!
//! ### Chain
//!
//! A [Chain](crate::chain::Chain) is an ordered list of named steps. Each step renders its template against the
//! variables so far, sends the prompt, and stores the reply under an output variable that later steps can use.
//! [Chain::validate](crate::chain::Chain::validate) checks these dependencies without sending anything.
//!
//! ```no_run
//! # async fn demo() -> promptline::errors::Result<()> {
//! use promptline::chain::Chain;
//! use promptline::prompt::{PromptTemplate, Variables};
//! use promptline::utils::llm::openai::OpenAIChat;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut chain = Chain::new();
//! chain.add_step("outline", PromptTemplate::new("Outline an essay about {{topic}}.")?, "outline")?
//!     .add_step("essay", PromptTemplate::new("Write the essay for this outline:\n{{outline}}")?, "essay")?
//!     .with_system_prompt("You are a careful writer.");
//!
//! let inputs = Variables::from([("topic", "tide pools")]);
//! assert!(chain.validate(&inputs).is_empty());
//!
//! let chat = OpenAIChat::from_env()?;
//! let result = chain.run(&chat, &inputs, &CancellationToken::new()).await?;
//! println!("{}", result.final_response.as_deref().unwrap_or_default());
//! # Ok(())
//! # }
//! ```
//!
//! ### Endpoint or LLM
//!
//! The endpoint of `PromptTemplate -> prompt (a String)` is an LLM, which consumes a prompt and produces a reply.
//! Anything implementing [SendPrompt](crate::utils::llm::SendPrompt) can be an endpoint, which makes chains easy to
//! test with a fake. [OpenAIChat](crate::utils::llm::openai::OpenAIChat) talks to OpenAI-compatible APIs, and
//! [Conversation](crate::utils::llm::Conversation) keeps a multi-turn history on top of it.
//!
//! ## License
//!
//! `promptline` will always remain free under Apache license.
//!
//! ## Attribution
//! * `async_openai`: [crate::utils::llm::ConversationConfig] mirrors the request parameters of this crate.
//!


pub mod errors;
pub mod prompt;
pub mod chain;
pub mod utils;
