use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

use rotation_proxy::admin::handlers::AddNode;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for rotation-proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Bearer token, when the control API requires one.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show scheduler statistics
    Scheduler,
    /// List admitted nodes with their statistics
    Nodes,
    /// Admit a node
    AddNode {
        #[arg(long)]
        address: String,
        #[arg(long)]
        port: u16,
        #[arg(long, default_value_t = 1)]
        weight: u32,
    },
    /// Remove a node by ID
    RemoveNode { id: u64 },
    /// Reset scheduler statistics
    Reset,
    /// Run a rebalance round now
    Rebalance,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    }
    let url = cli.url.trim_end_matches('/');

    let request = match cli.command {
        Commands::Scheduler => client.get(format!("{url}/scheduler")),
        Commands::Nodes => client.get(format!("{url}/node")),
        Commands::AddNode { address, port, weight } => client
            .post(format!("{url}/node"))
            .json(&AddNode { address, port, weight }),
        Commands::RemoveNode { id } => client.delete(format!("{url}/node/{id}")),
        Commands::Reset => client.post(format!("{url}/scheduler/reset")),
        Commands::Rebalance => client.post(format!("{url}/scheduler/rebalance")),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: control API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let text = res.text().await?;
    if text.is_empty() {
        println!("{}", status);
        return Ok(());
    }
    let json: Value = serde_json::from_str(&text)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
