// Roadhill provisioning daemon: device session listener plus firmware/media file host.

mod assets;
mod config;
mod listener;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use config::Config;
use roadhill_core::{firmware, Dispatcher, FirmwareArtifact};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const USAGE: &str = "usage: roadhill-server [--config <path>] [--version]";

fn main() -> Result<()> {
    let mut config_path: Option<PathBuf> = std::env::var_os("ROADHILL_CONFIG").map(PathBuf::from);
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("roadhill-server {}", VERSION);
                return Ok(());
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            "--config" | "-c" => match args.next() {
                Some(p) => config_path = Some(PathBuf::from(p)),
                None => bail!("--config needs a path\n{USAGE}"),
            },
            other => bail!("unknown argument {other:?}\n{USAGE}"),
        }
    }

    init_tracing();

    let cfg = config::load(config_path.as_deref()).context("loading configuration")?;
    info!(
        tcp = %cfg.tcp_bind(),
        http = %cfg.http_bind(),
        base_url = %cfg.advertised_base_url,
        "starting roadhill-server {}",
        VERSION
    );

    let dispatcher = prepare(&cfg)?;
    let limits = listener::Limits {
        max_connections: cfg.max_connections,
        max_message_len: cfg.max_message_len,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let tcp_bind = cfg.tcp_bind();
        let http_bind = cfg.http_bind();
        let mut devices = tokio::spawn(async move {
            listener::run_listener(&tcp_bind, dispatcher, limits).await
        });
        let root = cfg.asset_root.clone();
        let mut files = tokio::spawn(async move { assets::run_asset_host(&http_bind, root).await });

        tokio::select! {
            r = &mut devices => {
                let e = flatten(r, "device listener");
                error!(error = %e, "device listener stopped");
                Err(e)
            }
            r = &mut files => {
                let e = flatten(r, "asset host");
                error!(error = %e, "asset host stopped");
                Err(e)
            }
            s = shutdown_signal() => {
                info!("shutting down");
                s
            }
        }
    })
}

/// Stage and load the firmware image, then build the shared dispatcher.
fn prepare(cfg: &Config) -> Result<Arc<Dispatcher>> {
    if let Some(source) = &cfg.firmware_source {
        let n = firmware::stage(source, &cfg.firmware_path).context("staging firmware")?;
        info!(
            from = %source.display(),
            to = %cfg.firmware_path.display(),
            bytes = n,
            "firmware staged"
        );
    }
    let fw = FirmwareArtifact::load(&cfg.firmware_path).context("loading firmware")?;
    info!(
        path = %cfg.firmware_path.display(),
        sha256 = fw.current_digest(),
        bytes = fw.byte_length(),
        "firmware loaded"
    );
    if !fw.embedded_digest_matches() {
        warn!("firmware trailer is not the SHA-256 of the image body; serving it anyway");
    }
    if !cfg.firmware_is_served() {
        warn!(
            firmware = %cfg.firmware_path.display(),
            root = %cfg.asset_root.display(),
            "firmware is outside the asset root; OTA URL will not resolve"
        );
    }

    let play = cfg.playback.to_directive(cfg.tracks_url());
    let dispatcher = Dispatcher::new(Arc::new(fw), cfg.firmware_url(), play)
        .context("encoding directives")?;
    Ok(Arc::new(dispatcher))
}

fn init_tracing() {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter_layer)
        .with_target(false)
        .init();
}

/// A listener task only returns on failure; turn its result into that error.
fn flatten(
    r: Result<std::io::Result<()>, tokio::task::JoinError>,
    what: &str,
) -> anyhow::Error {
    match r {
        Ok(Ok(())) => anyhow::anyhow!("{what} exited"),
        Ok(Err(e)) => anyhow::Error::new(e).context(format!("{what} failed")),
        Err(e) => anyhow::Error::new(e).context(format!("{what} panicked")),
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
