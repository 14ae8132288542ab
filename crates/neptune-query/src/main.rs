//! CLI entry point for one-shot Neptune queries, connectivity checks and resets.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use neptune_core::{NeptuneConfig, QueryLanguage};
use neptune_graph::{DefaultCredentialsChain, ExecuteOptions, NeptuneClient, QueryExecutionService};

#[derive(Parser)]
#[command(name = "neptune-query")]
#[command(about = "Run signed SPARQL, openCypher, and Gremlin queries against Amazon Neptune")]
struct Cli {
    /// Query text to execute.
    #[arg(short, long)]
    query: Option<String>,

    /// Query language: sparql, opencypher, gremlin.
    #[arg(short, long, default_value = "sparql")]
    language: String,

    /// openCypher parameters as a JSON object string.
    #[arg(long)]
    parameters: Option<String>,

    /// Check connectivity and exit; non-zero status if unreachable.
    #[arg(long)]
    ping: bool,

    /// Erase all data in the cluster. Requires --confirm.
    #[arg(long)]
    reset: bool,

    /// Confirm a destructive --reset.
    #[arg(long)]
    confirm: bool,

    /// Maximum rows to keep from a query (capped at 100000).
    #[arg(long)]
    max_results: Option<usize>,

    /// Config file prefix (default: neptune).
    #[arg(short, long, default_value = "neptune")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = NeptuneConfig::load(&cli.config)?;
    if let Some(max_results) = cli.max_results {
        config.max_results = max_results;
    }

    let client = NeptuneClient::new(&config, Arc::new(DefaultCredentialsChain::new()))?;
    let outcome = run(&cli, &client, &config).await;
    client.close().await;
    outcome
}

async fn run(cli: &Cli, client: &NeptuneClient, config: &NeptuneConfig) -> anyhow::Result<()> {
    if cli.ping {
        let reachable = client.test_connectivity().await;
        println!("{}", serde_json::to_string_pretty(&client.connection_info())?);
        if !reachable {
            anyhow::bail!("Neptune cluster at {} is not reachable", client.endpoint());
        }
        return Ok(());
    }

    client.init().await?;

    if cli.reset {
        if !cli.confirm {
            anyhow::bail!("--reset erases every graph in the cluster; pass --confirm to proceed");
        }
        tracing::warn!(endpoint = %client.endpoint(), "Resetting Neptune database");
        let accepted = client.reset_database().await?;
        if !accepted {
            anyhow::bail!("Neptune declined the database reset");
        }
        println!("{}", serde_json::json!({ "reset": true }));
        return Ok(());
    }

    let Some(query) = cli.query.as_deref() else {
        anyhow::bail!("Specify --query <TEXT>, --ping, or --reset --confirm");
    };
    let language: QueryLanguage = cli.language.parse()?;

    let outcome = match (language, cli.parameters.as_deref()) {
        (QueryLanguage::OpenCypher, Some(parameters)) => {
            let result = client.execute_opencypher(query, Some(parameters)).await?;
            serde_json::to_value(result)?
        }
        (_, Some(_)) => anyhow::bail!("--parameters is only supported with --language opencypher"),
        (language, None) => {
            let mut service = QueryExecutionService::new(client.clone(), config.max_results);
            let outcome = service
                .execute(query, language, ExecuteOptions::complete())
                .await;
            if let Some(error) = &outcome.error {
                anyhow::bail!("{error}");
            }
            serde_json::to_value(outcome)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
