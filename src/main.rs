//! Zentinel Mock Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zentinel_mock_server::{
    shutdown_signal, Executor, HttpForwarder, Loader, MockServer, Reloader, RequestMatcher,
    ServerConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "zentinel-mock-server",
    about = "HTTP mock server driven by JSON mapping files",
    version
)]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Root mapping file (default: mappings.json, mappings.main.json or main.json)
    #[arg(short, long)]
    mapfile: Option<PathBuf>,

    /// Path to a YAML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Do not reload when mapping files change
    #[arg(long)]
    no_watch: bool,

    /// Compile the mappings and exit
    #[arg(long)]
    validate: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mapfile) = &self.mapfile {
            config.mapfile = Some(mapfile.clone());
        }
        if self.no_watch {
            config.watch = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            ServerConfig::from_file(path)
                .with_context(|| format!("failed to load configuration {}", path.display()))?
        }
        None => ServerConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    if args.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let mapfile = match &config.mapfile {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            Loader::discover(&cwd).ok_or_else(|| {
                anyhow::anyhow!(
                    "no mapping file given and none of mappings.json, mappings.main.json, main.json found in {}",
                    cwd.display()
                )
            })?
        }
    };

    let loader = Loader::open(&mapfile)
        .with_context(|| format!("cannot open mapping file {}", mapfile.display()))?;
    info!(mapfile = %loader.root().display(), "Loading mappings");
    let set = Arc::new(loader.load()?);

    if args.validate {
        println!(
            "Mappings are valid ({} mappings from {} files)",
            set.len(),
            set.filenames.len()
        );
        return Ok(());
    }

    let matcher = RequestMatcher::new(set)?;

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("cannot listen on port {}", config.port))?;
    let port = listener.local_addr()?.port();

    let forwarder = HttpForwarder::new(config.forward_timeout(), config.max_body_bytes)?;
    let executor = Executor::new(Arc::new(forwarder), &config.server_name).with_listen_port(port);
    let server = MockServer::new(matcher, executor, config.max_body_bytes);

    let reloader = if config.watch {
        Some(Reloader::new(loader, server.clone()).spawn())
    } else {
        info!("Hot reload disabled");
        None
    };

    zentinel_mock_server::serve(listener, server, shutdown_signal()).await?;

    if let Some(reloader) = reloader {
        reloader.stop().await;
    }
    Ok(())
}
