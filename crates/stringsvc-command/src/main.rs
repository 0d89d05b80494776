mod client;

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use client::Client;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Http,
    Grpc,
}

#[derive(Parser)]
#[command(name = "stringsvc")]
#[command(about = "Client for a running stringsvc server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, value_enum, default_value = "http", global = true)]
    transport: Transport,

    #[arg(long, env = "STRINGSVC_HTTP_URL", default_value = "http://127.0.0.1:8080", global = true)]
    http_url: String,

    #[arg(long, env = "STRINGSVC_GRPC_URL", default_value = "http://127.0.0.1:8081", global = true)]
    grpc_url: String,

    /// Bearer token; when absent one is fetched with --username/--password
    #[arg(long, env = "STRINGSVC_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    #[arg(long, default_value = "user1", global = true)]
    username: String,

    #[arg(long, default_value = "passwordOne", global = true)]
    password: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Obtain a bearer token
    Token,
    /// Uppercase a string
    Uppercase { s: String },
    /// Count the bytes in a string
    Count { s: String },
    /// Report whether the server is serving
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let client = match cli.transport {
        Transport::Http => Client::http(&cli.http_url),
        Transport::Grpc => Client::grpc(&cli.grpc_url).await?,
    };

    match &cli.command {
        Commands::Token => println!("{}", client.token(&cli.username, &cli.password).await?),
        Commands::Uppercase { s } => println!("{}", client.uppercase(&bearer(&cli, &client).await?, s).await?),
        Commands::Count { s } => println!("{}", client.count(&bearer(&cli, &client).await?, s).await?),
        Commands::Health => {
            let serving = client.health().await?;
            println!("{}", if serving { "SERVING" } else { "NOT_SERVING" });
            if !serving {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn bearer(cli: &Cli, client: &Client) -> anyhow::Result<String> {
    match &cli.token {
        Some(token) => Ok(token.clone()),
        None => client.token(&cli.username, &cli.password).await,
    }
}
