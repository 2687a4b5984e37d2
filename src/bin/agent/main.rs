mod face;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use clap::Parser;
use dotenvy::dotenv;
use tabwright::chrome::ChromeEngine;
use tabwright::config::{Config, ImageResponses, ProviderKind};
use tabwright::provider::delegate_from_config;
use tabwright::{AgentLoop, Context, LoopOptions, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Drive a Chrome browser with an LLM agent.
///
/// Settings come from the environment (and `.env`); flags override them.
#[derive(Parser, Debug)]
#[command(name = "agent", version, about)]
struct Args {
    /// Run one task, print the result and exit instead of serving.
    #[arg(long, env = "TABWRIGHT_TASK")]
    task: Option<String>,

    /// LLM provider: claude or openai.
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Stop after the first tool round instead of waiting for `done`.
    #[arg(long)]
    one_shot: bool,

    #[arg(long)]
    max_turns: Option<usize>,

    /// Show the browser window.
    #[arg(long)]
    headed: bool,

    #[arg(long)]
    chrome_path: Option<PathBuf>,

    /// Never attach to a running Chrome; always launch a new one.
    #[arg(long)]
    no_attach: bool,

    #[arg(long)]
    port: Option<u16>,

    /// Drop screenshots from tool results sent to the model.
    #[arg(long)]
    omit_images: bool,

    /// Save the conversation as JSON after every turn.
    #[arg(long)]
    transcript: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(provider) = &self.provider {
            let kind: ProviderKind = provider.parse()?;
            if kind != config.provider {
                // Switching provider on the command line also switches the key.
                *config = Config::from_lookup(|key| match key {
                    "TABWRIGHT_PROVIDER" => Some(provider.clone()),
                    _ => std::env::var(key).ok(),
                })?;
            }
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if self.one_shot {
            config.one_shot = true;
        }
        if let Some(max_turns) = self.max_turns {
            config.max_turns = max_turns;
        }
        if self.headed {
            config.headless = false;
        }
        if let Some(path) = &self.chrome_path {
            config.chrome_path = Some(path.clone());
        }
        if self.no_attach {
            config.attach_url = None;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.omit_images {
            config.image_responses = ImageResponses::Omit;
        }
        if let Some(path) = &self.transcript {
            config.transcript_path = Some(path.clone());
        }
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tabwright=info,agent=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    args.apply(&mut config)?;

    let delegate = delegate_from_config(&config)?;
    info!(provider = delegate.name(), model = %config.model, "provider ready");

    // Launching Chrome blocks for a while.
    let launch_config = config.clone();
    let engine = tokio::task::spawn_blocking(move || ChromeEngine::launch(&launch_config))
        .await
        .map_err(|e| anyhow!("browser launch panicked: {}", e))??;

    let context = Arc::new(Context::new(Arc::new(engine), config.image_responses));
    let registry = ToolRegistry::with_browser_tools();
    let options = LoopOptions::from(&config);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after the current turn");
            ctrl_c.cancel();
        }
    });

    if let Some(task) = args.task {
        let agent = AgentLoop::new(delegate, registry, context, options).with_cancellation(cancel);
        let summary = agent.run(&task).await?;
        println!("{}", summary);
        return Ok(());
    }

    let (mut cmd_rx, event_tx) =
        face::start_server(config.port, registry.clone(), context.clone()).await?;
    let agent = AgentLoop::new(delegate, registry, context.clone(), options)
        .with_events(event_tx)
        .with_cancellation(cancel.clone());
    info!("waiting for tasks");

    loop {
        let task = tokio::select! {
            _ = cancel.cancelled() => break,
            task = cmd_rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };

        // Each task starts in a fresh tab.
        {
            let _tab = context.lock_tab().await;
            if let Err(e) = context.engine().new_tab(None).await {
                warn!("failed to open a new tab for task: {:#}", e);
            }
        }
        if let Err(e) = agent.run(&task).await {
            debug!("task ended with error: {}", e);
        }
    }

    info!("agent stopped");
    Ok(())
}
