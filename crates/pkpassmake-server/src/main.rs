//! pkpassmake-sign-server - signing endpoint backed by a local signer
//!
//! Reads the signing home and passphrase from `PKPASSMAKE_HOME` /
//! `PKPASSMAKE_PASSWORD`, the port from `PORT` and the optional client token
//! from `PKPASSMAKE_AUTHORIZATION`.

use pkpassmake::LocalSigner;
use pkpassmake_server::{start, Result, ServerConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run() {
        error!("{}", e);
        eprintln!("pkpassmake-sign-server: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(serve())
}

async fn serve() -> Result<()> {
    let config = ServerConfig::from_env();
    let signer = LocalSigner::from_env().await?;
    info!("Signing with certificate {}", signer.context().cert().display());

    let handle = start(config, Arc::new(signer)).await?;
    info!("Ready on port {}", handle.port);

    tokio::signal::ctrl_c().await?;
    handle.shutdown();
    Ok(())
}
