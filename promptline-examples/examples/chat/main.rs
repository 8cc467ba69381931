use std::io::{stdin, stdout, BufRead, Write};
use std::path::PathBuf;
use anyhow::Result;
use promptline::utils::llm::openai::OpenAIChat;
use promptline::utils::llm::Conversation;
use promptline_examples::{cancel_on_ctrlc, init_logging};

/// Chat in the terminal. The history is kept in `chat_history.json` (or the path given as argument) between runs.
#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cancel = cancel_on_ctrlc()?;
    let history_path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("chat_history.json"));

    let chat = OpenAIChat::from_env()?;
    let mut conversation = if history_path.exists() {
        Conversation::load(&history_path, chat)?
    } else {
        Conversation::new(chat).with_system_prompt("You are a friendly and helpful assistant.")
    };
    println!("{} earlier messages. Empty line to quit.", conversation.history().len());

    let mut lines = stdin().lock().lines();
    loop {
        print!("> ");
        stdout().flush()?;
        let Some(line) = lines.next() else { break };
        let line = line?;
        if line.trim().is_empty() || cancel.is_cancelled() {
            break;
        }
        match conversation.send(line, &cancel).await? {
            Some(reply) => println!("{}\n", reply),
            None => println!("<no content>\n"),
        }
    }
    conversation.save(&history_path)?;
    Ok(())
}
