//! pkpassmake CLI - build and sign pass bundles
//!
//! This is the command-line front end over the pkpassmake library.

mod cli;
mod output;

use clap::Parser;
use cli::{AnchorArgs, Cli, Commands, PackArgs, VerifyArgs};
use pkpassmake::http::HttpClient;
use pkpassmake::{
    verify_bundle, BundleAssembler, LocalSigner, LocalSignerConfig, OpenSsl, PassError,
    RemoteSigner, Result, Signer, TrustAnchorResolver,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run() {
        error!("{}", e);
        eprintln!("pkpassmake: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| PassError::Config(format!("failed to create async runtime: {e}")))?;

    match cli.command {
        Commands::Pack(args) => rt.block_on(run_pack(args, cli.silent)),
        Commands::Verify(args) => rt.block_on(run_verify(args, cli.silent)),
        Commands::Anchor(args) => rt.block_on(run_anchor(args, cli.silent)),
    }
}

async fn run_pack(args: PackArgs, silent: bool) -> Result<()> {
    let signer: Arc<dyn Signer> = match &args.remote {
        Some(url) => Arc::new(RemoteSigner::new(url, args.authorization.clone())?),
        None => {
            let mut config = LocalSignerConfig::default();
            if let Some(home) = &args.home {
                config = config.with_home(home);
            }
            let resolver = TrustAnchorResolver::with_defaults(config.openssl.clone())?;
            let signer = LocalSigner::new(config, &resolver).await?;
            info!("Using signing home {}", signer.home().display());
            Arc::new(signer)
        }
    };

    let archive = BundleAssembler::new(signer)
        .assemble(&args.source, args.output.as_deref())
        .await?;
    output::print_packed(&archive, args.remote.as_deref(), silent);
    Ok(())
}

async fn run_verify(args: VerifyArgs, silent: bool) -> Result<()> {
    let bundle = verify_bundle(&args.archive).await?;
    if args.json {
        let report = serde_json::json!({
            "archive": args.archive.display().to_string(),
            "manifest": bundle.manifest,
            "signature_bytes": bundle.signature.len(),
        });
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| PassError::Manifest(format!("failed to render report: {e}")))?;
        println!("{}", text);
    } else {
        output::print_verified(&args.archive, &bundle, silent);
    }
    Ok(())
}

async fn run_anchor(args: AnchorArgs, silent: bool) -> Result<()> {
    let resolver = match args.cache_dir {
        Some(dir) => TrustAnchorResolver::new(dir, Arc::new(HttpClient::new()), OpenSsl::new()),
        None => TrustAnchorResolver::with_defaults(OpenSsl::new())?,
    };
    let path = resolver.resolve().await?;
    output::print_anchor(&path, silent);
    Ok(())
}
