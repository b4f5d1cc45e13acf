use clap::{Parser, Subcommand};
use std::path::PathBuf;
use totalrecall_lib::core::submission::CommandEncoding;
use totalrecall_lib::core::RankMode;

#[derive(Parser)]
#[command(
    name = "totalrecall",
    version = env!("CARGO_PKG_VERSION"),
    about = "Captures every shell command you run and recalls the ones that fit where you are"
)]
pub struct Cli {
    /// config file, defaults to ~/.totalrecall/config.toml
    #[arg(long, global = true, env = "TOTALRECALL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bus, both collectors and the indexer until Ctrl-C
    Serve,

    /// Forward audit trail records from stdin, or from a command's output
    Audit {
        /// e.g. `praudit -xl /dev/auditpipe`; reads stdin when omitted
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        source: Vec<String>,
    },

    /// Send one captured command to the collector (used by the shell hooks)
    Submit {
        #[arg(long)]
        command: String,
        #[arg(long, allow_hyphen_values = true)]
        return_code: i32,
        #[arg(long)]
        start_timestamp: String,
        #[arg(long)]
        end_timestamp: Option<String>,
        /// how `--command` is encoded; guessed when omitted
        #[arg(long, value_parser = parse_encoding)]
        encoding: Option<CommandEncoding>,
    },

    /// Commands previously run successfully in this context
    Recall {
        #[arg(long, default_value = "relevance")]
        mode: RankMode,
        /// rows shown, defaults to recall.max_rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print recall lists for every event that goes over the bus
    Watch {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Install shell hooks
    Setup {
        /// every shell with an rc file, not just $SHELL
        #[arg(long)]
        all: bool,
    },

    /// Remove shell hooks
    Uninstall,

    /// Show hook status and store stats
    Status,
}

fn parse_encoding(raw: &str) -> Result<CommandEncoding, String> {
    match raw.to_ascii_lowercase().as_str() {
        "base64" => Ok(CommandEncoding::Base64),
        "plain" => Ok(CommandEncoding::Plain),
        other => Err(format!("unknown encoding: {}", other)),
    }
}
