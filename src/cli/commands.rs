//! CLI command implementations.
//!
//! Contains the business logic for each CLI command.

use crate::cli::parser::{Cli, Commands};
use crate::config::Config;
use crate::error::OrchestratorError;

/// Dispatches a parsed [`Cli`] invocation to its command implementation.
///
/// # Errors
///
/// Propagates [`OrchestratorError`] from configuration resolution or the
/// server's own startup/runtime failures.
pub async fn execute(cli: Cli) -> Result<(), OrchestratorError> {
    match cli.command {
        Commands::Serve { bind, store_path } => serve(bind, store_path).await,
    }
}

async fn serve(bind: Option<String>, store_path: Option<String>) -> Result<(), OrchestratorError> {
    let mut builder = Config::builder().from_env();
    if let Some(bind) = bind {
        builder = builder.bind(bind);
    }
    if let Some(store_path) = store_path {
        builder = builder.store_path(store_path);
    }
    let config = builder.build()?;
    crate::server::serve(config).await
}
