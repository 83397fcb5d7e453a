mod cli;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{info, warn};

use tracelens_core::config::{load_dotenv, Config};
use tracelens_search::OpenSearchClient;
use tracelens_tools::{ToolContext, ToolRegistry};

use crate::cli::{CliArgs, Command};

fn load_config(args: &CliArgs) -> Result<Config> {
    let mut config = Config::for_profile(&args.profile).context("failed to load configuration")?;
    if let Some(url) = &args.url {
        config.search.url = url.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn read_input(input: &str, input_file: Option<&std::path::Path>) -> Result<Value> {
    let raw = match input_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        None => input.to_string(),
    };
    let value: Value = serde_json::from_str(&raw).context("tool input is not valid JSON")?;
    if !value.is_object() {
        bail!("tool input must be a JSON object");
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries JSON only
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // .env must be loaded before clap reads TRACELENS_PROFILE
    load_dotenv();
    let args = CliArgs::parse();
    let registry = ToolRegistry::with_analysis_tools().context("failed to register tools")?;

    match &args.command {
        Command::Tools { json } => {
            let defs = registry.list();
            if *json {
                println!("{}", serde_json::to_string_pretty(&defs)?);
            } else {
                let width = defs.iter().map(|d| d.name.len()).max().unwrap_or(0);
                for def in defs {
                    println!("{:width$}  {}", def.name, def.description);
                }
            }
        }

        Command::Config => {
            let config = load_config(&args)?;
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
        }

        Command::Ping => {
            let config = load_config(&args)?;
            let client = OpenSearchClient::from_config(&config).context("failed to build search client")?;
            let info = client
                .ping()
                .await
                .with_context(|| format!("search backend at {} is unreachable", config.search.url))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Command::Run {
            tool,
            input,
            input_file,
        } => {
            let Some(handler) = registry.get(tool) else {
                bail!("unknown tool '{tool}' (run `tracelens tools` to list them)");
            };
            let input = read_input(input, input_file.as_deref())?;

            let config = load_config(&args)?;
            config.log_summary();
            let client = OpenSearchClient::from_config(&config).context("failed to build search client")?;
            let context = ToolContext::new(Arc::new(client), config.analysis.clone());

            info!(tool = %tool, "running tool");
            let result = handler
                .execute(input, &context)
                .await
                .with_context(|| format!("tool '{tool}' failed"))?;
            if result.is_error {
                warn!(tool = %tool, "analysis degraded, see the error field");
            }
            println!("{}", result.content);
        }
    }

    Ok(())
}
