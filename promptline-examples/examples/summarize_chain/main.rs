use std::env;
use anyhow::{bail, Result};
use promptline::chain::Chain;
use promptline::prompt::{PromptTemplate, Variables};
use promptline::utils::llm::openai::OpenAIChat;
use promptline::utils::llm::ConversationConfig;
use promptline_examples::{cancel_on_ctrlc, init_logging};

const OUTLINE: &str = "List the {{points}} most important points of the following text.\n\n{{text}}";
const SUMMARY: &str = "Write a {{style}} summary of the text below, based on these key points:\n{{outline}}\n\nText:\n{{text}}";
const TITLE: &str = "Suggest one title for this summary. Reply with the title only.\n\n{{summary}}";


#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cancel = cancel_on_ctrlc()?;

    let text = env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        bail!("usage: summarize_chain <text to summarize>");
    }

    let mut chain = Chain::new();
    chain.add_step("outline", PromptTemplate::with_defaults(OUTLINE, [("points", "three")])?, "outline")?
        .add_step("summary", PromptTemplate::with_defaults(SUMMARY, [("style", "concise")])?, "summary")?
        .add_step("title", PromptTemplate::new(TITLE)?, "title")?
        .with_system_prompt("You are a precise technical editor.")
        .with_options(ConversationConfig::default().with_temperature(0.3));

    let inputs = Variables::from([("text", text)]);
    let problems = chain.validate(&inputs);
    if !problems.is_empty() {
        bail!("chain is not runnable:\n{}", problems.join("\n"));
    }

    let chat = OpenAIChat::from_env()?;
    let result = chain.run(&chat, &inputs, &cancel).await?;
    for step in &result.steps {
        println!("## {} ({:.1}s)\n{}\n", step.step_name, step.elapsed.as_secs_f64(), step.response.as_deref().unwrap_or("<no content>"));
    }
    println!("{}", result.to_json()?);
    Ok(())
}
