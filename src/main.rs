use anyhow::{bail, Context, Result};
use clap::Parser;
use ollama_chat::config::{self, AppConfig};
use ollama_chat::gui::run_gui;
use ollama_chat::logging::init_logging;
use ollama_chat::markdown::{extract_segments, render_plain};
use ollama_chat::registry::{ConnectionState, Registry};
use std::path::PathBuf;
use tokio::runtime::Handle;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Base URL of the Ollama API (overrides the config file)
    #[arg(long, env = "OLLAMA_CHAT_HOST")]
    host: Option<String>,

    /// Model to use (default: first model listed by the server)
    #[arg(long)]
    model: Option<String>,

    /// Extra TOML config file, applied on top of the discovered ones
    #[arg(long)]
    config: Option<PathBuf>,

    /// Force CLI mode (otherwise the GUI starts)
    #[arg(long, default_value_t = false)]
    cli: bool,

    /// Print the models installed on the server and exit
    #[arg(long, default_value_t = false)]
    list_models: bool,

    /// Probe the server and print the connection state
    #[arg(long, default_value_t = false)]
    check: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Prompt (optional: when given, runs a single CLI request)
    prompt: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = config::load(args.config.as_deref())?;
    if let Some(host) = args.host.clone() {
        config.base_url = host;
    }
    if let Some(model) = args.model.clone() {
        config.model = model;
    }

    if args.cli || args.list_models || args.check || args.prompt.is_some() {
        run_cli(config, &args)
    } else {
        run_gui(config)
    }
}

fn run_cli(config: AppConfig, args: &Args) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Unable to create the async runtime")?;

    runtime.block_on(async {
        let registry = Registry::new(config.registry_config(), Handle::current())?;

        if args.check {
            registry.check_connection().await;
            let state = registry.state();
            println!("{}: {}", state.base_url, state.connection.label());
            if state.connection != ConnectionState::Connected {
                bail!("Ollama is not reachable at {}", state.base_url);
            }
            println!("{} model(s) installed", state.models.len());
            return Ok(());
        }

        if args.list_models {
            registry.refresh_models(true).await;
            let state = registry.state();
            if state.connection == ConnectionState::Disconnected {
                bail!(
                    "Cannot list models: Ollama is not reachable at {}",
                    state.base_url
                );
            }
            for model in &state.models {
                println!(
                    "{}\t{}\t{}",
                    model.name,
                    model.size_label(),
                    model.modified_at
                );
            }
            return Ok(());
        }

        let Some(prompt) = args.prompt.as_deref() else {
            bail!("CLI mode: a prompt is required");
        };

        if registry.selected_model().is_empty() {
            registry.refresh_models(false).await;
        }

        let text = registry.generate(prompt).await?;
        let rendered = render_plain(&extract_segments(&text));
        print!("{rendered}");
        if !rendered.ends_with('\n') {
            println!();
        }
        Ok::<(), anyhow::Error>(())
    })
}
