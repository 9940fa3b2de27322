//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Parser, Subcommand};

/// orchestrator-server: server-side LLM response orchestrator.
#[derive(Parser, Debug)]
#[command(name = "orchestrator-server")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server (§6).
    #[command(after_help = r#"Examples:
  orchestrator-server serve                              # Bind to the documented default
  orchestrator-server serve --bind 0.0.0.0:8089          # Bind to a specific address
  OPENAI_API_KEY=sk-... orchestrator-server serve        # Supply the upstream API key
"#)]
    Serve {
        /// Overrides `OPEN_RESPONSES_BIND` and the documented default bind address.
        #[arg(long)]
        bind: Option<String>,

        /// Overrides `OPEN_RESPONSES_STORE_PATH` and the documented default store path.
        #[arg(long)]
        store_path: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_well_formed() {
        Cli::command().debug_assert();
    }
}
