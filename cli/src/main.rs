use anyhow::Result;
use clap::{Parser, Subcommand};
use cirrus_core::{Config, LoopController, TurnRequest, build_controller, builtin_registry, config};
use console::style;
use std::io::Write;

mod onboard;
mod remote;
mod terminal;

use terminal::{Interrupts, Renderer};

#[derive(Parser)]
#[command(name = "cirrus")]
#[command(about = "cirrus - streaming tool-calling assistant", long_about = None, version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure provider, API key, model and home location
    Onboard,

    /// Run the HTTP server
    Serve {
        /// Address to listen on, overriding the config file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Chat in-process; interactive when no message is given
    Chat {
        #[arg(short, long, default_value = "default")]
        conversation: String,

        #[arg(short, long)]
        message: Option<String>,

        /// Print the raw event-stream frames instead of rendered text
        #[arg(long)]
        raw: bool,
    },

    /// Send one message to a running server
    Ask {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,

        #[arg(long)]
        user: String,

        #[arg(short, long, default_value = "default")]
        conversation: String,

        message: String,
    },

    /// List the tools the model can call
    Tools,
}

fn init_tracing(verbose: bool, serving: bool) {
    let filter = match (verbose, serving) {
        (true, _) => "debug",
        (false, true) => "info",
        (false, false) => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Onboard
        } else {
            Commands::Chat {
                conversation: "default".to_string(),
                message: None,
                raw: false,
            }
        }
    });

    init_tracing(cli.verbose, matches!(command, Commands::Serve { .. }));

    match command {
        Commands::Onboard => {
            let onboard_config = onboard::run_onboard().map_err(|e| {
                eprintln!("❌ Onboarding failed: {}", e);
                anyhow::anyhow!("Onboarding failed: {}", e)
            })?;
            config::save_config(&onboard_config)?;
        }
        Commands::Serve { bind } => {
            let mut config = Config::load_or_init()?;
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            cirrus_server::start(config).await?;
        }
        Commands::Chat {
            conversation,
            message,
            raw,
        } => {
            let config = Config::load_or_init()?;
            let controller = build_controller(&config)?;
            let interrupts = Interrupts::install();

            match message {
                Some(msg) => {
                    let outcome = run_turn(&controller, &interrupts, &conversation, &msg, raw).await;
                    if let Some(e) = outcome {
                        anyhow::bail!("Turn failed: {}", e);
                    }
                }
                None => interactive(&controller, &interrupts, &conversation, raw).await,
            }
        }
        Commands::Ask {
            server,
            user,
            conversation,
            message,
        } => {
            let config = Config::load_or_init()?;
            let mut renderer = Renderer::new(false);
            let last = remote::ask(
                remote::AskRequest {
                    server: &server,
                    auth_header: &config.server.auth_header,
                    user: &user,
                    chat_id: &conversation,
                    message: &message,
                },
                &mut renderer,
            )
            .await?;

            match last {
                Some(cirrus_core::StreamEvent::Done) => {}
                Some(cirrus_core::StreamEvent::Error(e)) => anyhow::bail!("Turn failed: {}", e),
                _ => anyhow::bail!("Stream ended before the turn finished"),
            }
        }
        Commands::Tools => {
            let config = Config::load_or_init()?;
            let registry = builtin_registry(&config)?;
            for declaration in registry.describe() {
                println!(
                    "{} {}",
                    style(&declaration.name).cyan().bold(),
                    style(format!("({})", declaration.label)).dim()
                );
                println!("    {}", declaration.description);
                for param in &declaration.parameters.parameters {
                    println!(
                        "    - {}: {}{}  {}",
                        param.name,
                        param.param_type.as_str(),
                        if param.required { "" } else { "?" },
                        style(&param.description).dim()
                    );
                }
            }
        }
    }

    Ok(())
}

/// Runs one turn against the terminal. Returns the failure, if any.
async fn run_turn(
    controller: &LoopController,
    interrupts: &Interrupts,
    conversation: &str,
    message: &str,
    raw: bool,
) -> Option<cirrus_core::LoopError> {
    let sink = interrupts.sink(raw);
    let outcome = controller
        .run(&TurnRequest::new(conversation, message), &sink)
        .await;
    tracing::debug!(
        passes = outcome.generation_passes,
        tool_calls = outcome.tool_calls,
        "turn finished"
    );
    outcome.error
}

async fn interactive(
    controller: &LoopController,
    interrupts: &Interrupts,
    conversation: &str,
    raw: bool,
) {
    use std::io::BufRead;

    println!("{}", style("cirrus").cyan().bold());
    println!("Type your message (Ctrl+C cancels a reply, Ctrl+C or Ctrl+D at the prompt exits):\n");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => {
                println!("\n👋 Goodbye!");
                break;
            }
            Ok(_) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                println!();
                if let Some(cirrus_core::LoopError::TransportClosed) =
                    run_turn(controller, interrupts, conversation, input, raw).await
                {
                    println!("\n{}", style("(cancelled)").dim());
                }
                println!();
            }
        }
    }
}
