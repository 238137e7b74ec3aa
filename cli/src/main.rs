use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zoo_guide_core::{
    agent::{Content, Runner},
    auth, config, guide, providers, server,
};

#[derive(Parser)]
#[command(name = "zoo-guide")]
#[command(about = "zoo-guide - A zoo tour guide agent backed by a remote MCP server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the agent over HTTP
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Also serve the browser UI at /dev-ui
        #[arg(long)]
        web: bool,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Talk to the agent from the terminal
    Chat {
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
        web: false,
        config: None,
    });

    match command {
        Commands::Serve {
            host,
            port,
            web,
            config,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            let web = web || config.serve_web;

            let runner = Arc::new(build_runner(&config).await?);
            let app = server::build_app(runner, server::AppOptions { web });

            let addr = format!("{}:{}", config.host, config.port);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!(%addr, web, "serving agent");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        }
        Commands::Chat { message, config } => {
            let config = load_config(config.as_deref())?;
            let runner = build_runner(&config).await?;
            let user_id = "cli_user";
            let session = runner
                .sessions()
                .create(runner.app_name(), user_id, None, None)
                .await?;

            if let Some(msg) = message {
                println!("\n🤔 Processing...\n");
                match ask(&runner, user_id, &session.id, &msg).await {
                    Ok(response) => {
                        println!("{}", response);
                    }
                    Err(e) => {
                        eprintln!("❌ Error: {:#}", e);
                        anyhow::bail!("Agent processing failed: {}", e);
                    }
                }
            } else {
                println!("🦁 Zoo tour guide");
                println!("Ask about the animals (Ctrl+D to exit):\n");
                use std::io::{self, BufRead};
                let stdin = io::stdin();
                let stdout = io::stdout();
                let mut stdout_lock = stdout.lock();

                loop {
                    print!("> ");
                    let _ = stdout_lock.flush();

                    let mut input = String::new();
                    let mut reader = stdin.lock();

                    match reader.read_line(&mut input) {
                        Ok(0) => {
                            println!("\n👋 Goodbye!");
                            break;
                        }
                        Ok(_) => {
                            let input = input.trim();
                            if input.is_empty() {
                                continue;
                            }

                            println!("\n🤔 Processing...\n");

                            match ask(&runner, user_id, &session.id, input).await {
                                Ok(response) => {
                                    println!("{}", response);
                                }
                                Err(e) => {
                                    eprintln!("❌ Error: {:#}", e);
                                }
                            }

                            println!();
                        }
                        Err(_) => {
                            println!("\n👋 Goodbye!");
                            break;
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<config::Config> {
    let default_path = config::default_config_path();
    let path = match path {
        Some(path) => Some(path),
        None if default_path.exists() => Some(default_path.as_path()),
        None => None,
    };
    config::Config::load(path)
}

/// Validates the configuration before any credential or network access.
async fn build_runner(config: &config::Config) -> Result<Runner> {
    config.require_mcp_server_url()?;

    let tokens = auth::default_token_source(|key| std::env::var(key).ok())?;
    info!(source = tokens.name(), "using ID token source");

    let agent = guide::build_root_agent(config, tokens.as_ref()).await?;
    let provider = providers::create_provider(config)?;
    Ok(guide::build_runner(config, agent, provider))
}

async fn ask(runner: &Runner, user_id: &str, session_id: &str, message: &str) -> Result<String> {
    let events = runner
        .run(user_id, session_id, Content::user_text(message), None)
        .await?;

    let reply = events
        .iter()
        .rev()
        .find(|e| e.author != "user" && !e.content.text().is_empty())
        .map(|e| e.content.text())
        .unwrap_or_default();
    Ok(reply)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}
