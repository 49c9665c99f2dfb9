use clap::{Parser, Subcommand};
use tessera_common::env::{Command, CommandKind};
use tessera_sdk::ClusterAdapter;

#[derive(Parser)]
#[command(name = "tessera-cli")]
#[command(about = "Submit commands to a Tessera cluster")]
struct Cli {
    /// Node endpoints, e.g. http://127.0.0.1:7001 (repeatable)
    #[arg(short, long = "node", required = true)]
    nodes: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replicate a command and print its TxResult
    Submit {
        #[arg(long = "type", value_name = "KIND")]
        kind: CommandKind,

        /// Payload, taken as UTF-8 text
        #[arg(long)]
        payload: String,

        /// Reuse to make retries idempotent; a fresh UUID when absent
        #[arg(long)]
        key: Option<String>,
    },
    /// Print the cluster view of the first node that answers
    Status,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let adapter = ClusterAdapter::new(cli.nodes)?;

    match cli.command {
        Commands::Submit { kind, payload, key } => {
            let key = key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let command = Command::new(kind, key, payload.into_bytes());
            match adapter.submit(&command).await {
                Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
                Err(e) => {
                    eprintln!("Error submitting command: {} ({})", e, e.code());
                    std::process::exit(1);
                }
            }
        }
        Commands::Status => {
            let status = adapter.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}
