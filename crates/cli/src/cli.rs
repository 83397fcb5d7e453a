use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Observability analytics over Elasticsearch/OpenSearch.
///
/// Runs the analysis tools against the configured search backend and
/// prints their JSON results on stdout. Logs go to stderr.
#[derive(Parser, Debug)]
#[command(name = "tracelens", about = "Observability analytics over Elasticsearch/OpenSearch")]
pub struct CliArgs {
    /// Config profile; keys resolve as {PROFILE}_{KEY} first
    #[arg(long, env = "TRACELENS_PROFILE", default_value = "")]
    pub profile: String,

    /// Search backend URL (overrides SEARCH_URL)
    #[arg(long)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available tools
    Tools {
        /// Print full definitions, including input schemas, as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one tool and print its result
    Run {
        /// Tool name, e.g. detect_metric_anomalies
        tool: String,

        /// JSON input object
        #[arg(long, default_value = "{}", conflicts_with = "input_file")]
        input: String,

        /// Read the JSON input from a file instead
        #[arg(long)]
        input_file: Option<PathBuf>,
    },

    /// Check connectivity and report the backend version
    Ping,

    /// Print the resolved configuration (secrets redacted)
    Config,
}
