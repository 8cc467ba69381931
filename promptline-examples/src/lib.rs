//! Shared setup for the `promptline` demos.

use anyhow::Result;
use log::info;
use tokio_util::sync::CancellationToken;

/// Log to stderr, `info` by default; override with `RUST_LOG`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Returns a token that is cancelled on the first Ctrl-C.
pub fn cancel_on_ctrlc() -> Result<CancellationToken> {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl-C received, stopping after the current request");
        handler_token.cancel();
    })?;
    Ok(token)
}
