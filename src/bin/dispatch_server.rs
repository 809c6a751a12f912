//! Dispatch server entry point.
//!
//! Usage: `dispatch-server [--config <path>] [--listen <addr>]`
//!
//! Without `--config`, `DISPATCH_CONFIG` is consulted, then defaults plus
//! `DISPATCH_*` environment overrides are used.

use ai_dispatch::config::{DispatchConfig, LogFormat};
use anyhow::{bail, Context};
use tracing_subscriber::EnvFilter;

struct Args {
    config: Option<String>,
    listen: Option<String>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = Args {
        config: std::env::var("DISPATCH_CONFIG").ok(),
        listen: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                args.config = Some(it.next().context("--config requires a path")?);
            }
            "--listen" | "-l" => {
                args.listen = Some(it.next().context("--listen requires an address")?);
            }
            "--help" | "-h" => {
                println!("Usage: dispatch-server [--config <path>] [--listen <addr>]");
                return Ok(None);
            }
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(Some(args))
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let mut config = match &args.config {
        Some(path) => DispatchConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => DispatchConfig::from_env().context("invalid environment configuration")?,
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
        config.validate()?;
    }

    init_logging(config.log_format);
    tracing::info!(
        listen = %config.listen_addr,
        store = if config.redis_url.is_some() { "redis" } else { "memory" },
        backends = config.backends.len(),
        "starting dispatch server"
    );

    ai_dispatch::server::serve(config).await?;
    Ok(())
}
