use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scene_relay_canvas::publisher::LinkOutcome;
use scene_relay_canvas::{
    link, CanvasHost, CapabilityHost, DisplaySurface, EditorPublisher, FramePresentation,
    SceneSource,
};
use scene_relay_core::config::{Config, LoggingConfig};
use scene_relay_core::pairing::CodeAllocator;
use scene_relay_core::protocol::STATUS_READY;
use scene_relay_core::session::{SessionCode, SessionStore};
use scene_relay_core::session_store::JsonSessionStore;
use scene_relay_gateway::GatewayState;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "scene-relay",
    about = "Pair smart displays with a scene editor and push published scenes to them",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the fulfillment gateway
    Serve {
        /// Port to listen on (default: 18790)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Allocate a fresh session code
    Allocate,

    /// Claim a session code as an editor
    Link { code: String },

    /// Publish a scene to a session code
    Publish {
        code: String,

        /// HTML body file
        #[arg(long)]
        html: Option<PathBuf>,

        /// Stylesheet file
        #[arg(long)]
        css: Option<PathBuf>,

        /// Script file
        #[arg(long)]
        js: Option<PathBuf>,

        /// Write the desktop preview document here
        #[arg(long)]
        preview: Option<PathBuf>,
    },

    /// Run a headless display bound to a session code
    Watch { code: String },

    /// Show system status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
}

/// Capabilities of a display without a conversation attached.
struct TerminalCapabilities;

#[async_trait::async_trait]
impl CapabilityHost for TerminalCapabilities {
    async fn send_text_query(&self, query: &str) -> scene_relay_canvas::Result<String> {
        tracing::info!(%query, "Scene sent a text query");
        Ok(STATUS_READY.to_string())
    }

    async fn get_header_height_px(&self) -> scene_relay_canvas::Result<i64> {
        Ok(0)
    }
}

fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) {
    let level = if verbose {
        "debug".to_string()
    } else {
        logging
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let mut directives = vec![level];
    if let Some(l) = logging {
        directives.extend(l.filters.iter().cloned());
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    let writer = match logging.map(|l| l.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if logging.is_some_and(|l| l.format == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_source(path: Option<&PathBuf>) -> anyhow::Result<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display())),
        None => Ok(String::new()),
    }
}

fn describe(presentation: &FramePresentation) -> String {
    match presentation {
        FramePresentation::Scene { html } => format!("scene ({} bytes)", html.len()),
        FramePresentation::Linked { html: Some(html) } => {
            format!("linked, unpublished draft ({} bytes)", html.len())
        }
        FramePresentation::Linked { html: None } => "linked, waiting for a scene".to_string(),
        FramePresentation::Hidden => "hidden".to_string(),
    }
}

async fn watch_code(
    config: &Config,
    store: Arc<dyn SessionStore>,
    code: SessionCode,
) -> anyhow::Result<()> {
    let (host_end, _frame_end) = link();
    let surface = Arc::new(DisplaySurface::new());
    let host = CanvasHost::new(
        store,
        Arc::new(TerminalCapabilities),
        surface.clone(),
        host_end.to_frame,
        &config.canvas(),
    );
    host.start();
    tokio::spawn(host.clone().run(host_end.from_frame));
    host.load_frame(code.clone()).await?;

    println!("Display {} showing code {code}", host.frame_id());
    let mut views = surface.subscribe();
    loop {
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                println!("[load {}] {}", view.loads, describe(&view.presentation));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    host.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_dir);

    let config = Config::load(&config_path)?;
    init_logging(cli.verbose, config.logging.as_ref());

    let (warnings, errors) = config.validate();
    for w in &warnings {
        tracing::warn!("{w}");
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid config {}: {}", config_path.display(), errors.join("; "));
    }

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let store: Arc<dyn SessionStore> =
                Arc::new(JsonSessionStore::new(config.store_path()));
            let state = Arc::new(GatewayState::new(Arc::new(config), store)?);
            tracing::info!("Starting Scene Relay gateway on port {port}");
            scene_relay_gateway::start_gateway(state, port).await?;
        }
        Commands::Allocate => {
            let store = Arc::new(JsonSessionStore::new(config.store_path()));
            let code = CodeAllocator::from_config(store, &config.allocator())?
                .allocate()
                .await?;
            println!("{code}");
        }
        Commands::Link { code } => {
            let store = Arc::new(JsonSessionStore::new(config.store_path()));
            match EditorPublisher::new(store, &config.canvas()).link(&code).await? {
                LinkOutcome::Linked(code) => println!("Linked to {code}"),
                LinkOutcome::Local => println!("Default code: local preview only"),
            }
        }
        Commands::Publish {
            code,
            html,
            css,
            js,
            preview,
        } => {
            let scene = SceneSource {
                html: read_source(html.as_ref())?,
                css: read_source(css.as_ref())?,
                js: read_source(js.as_ref())?,
            };
            let store = Arc::new(JsonSessionStore::new(config.store_path()));
            let document = EditorPublisher::new(store, &config.canvas())
                .publish(&code, &scene)
                .await?;
            if let Some(path) = preview {
                std::fs::write(&path, &document)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("Preview written to {}", path.display());
            }
            println!("Published to {code}");
        }
        Commands::Watch { code } => {
            let code = SessionCode::parse(&code)?;
            let store = Arc::new(JsonSessionStore::open_watched(config.store_path())?);
            watch_code(&config, store, code).await?;
        }
        Commands::Status => {
            let store = JsonSessionStore::new(config.store_path());
            let records = store.list().await?;
            let linked = records.iter().filter(|r| r.is_linked()).count();
            let published = records
                .iter()
                .filter(|r| r.published_html().is_some())
                .count();
            println!("Scene Relay v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Store: {}", store.path().display());
            println!("Gateway port: {}", config.gateway_port());
            println!(
                "Codes: {} allocated, {linked} linked, {published} published",
                records.len()
            );
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => anyhow::bail!("no config value at '{key}'"),
            },
        },
    }

    Ok(())
}
