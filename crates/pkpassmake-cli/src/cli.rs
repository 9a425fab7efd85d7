//! CLI argument definitions for pkpassmake
//!
//! Uses clap for argument parsing. This module defines all subcommands
//! and their options.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// pkpassmake - build and sign pass bundles
///
/// Digests every file in a directory into manifest.json, signs the manifest
/// locally with openssl or through a remote signing endpoint, and packs
/// everything into a .pkpass archive.
#[derive(Parser, Debug)]
#[command(name = "pkpassmake")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Silent mode - suppress status output
    #[arg(long, short = 's', global = true)]
    pub silent: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign a pass directory and write the archive
    #[command(after_help = "EXAMPLES:
    # Sign with cert.pem/key.pem from ~/.pkpassmake (or $PKPASSMAKE_HOME)
    pkpassmake pack ./Event.pass

    # Explicit signing home and output path
    pkpassmake pack ./Event.pass --home /etc/pkpassmake -o Event.pkpass

    # Sign through a remote endpoint
    pkpassmake pack ./Event.pass --remote https://signer.internal/ --authorization 'Bearer ...'
")]
    Pack(PackArgs),

    /// Check that an archive's entries match its manifest
    Verify(VerifyArgs),

    /// Fetch (if needed) and print the cached signing trust anchor
    Anchor(AnchorArgs),
}

#[derive(Args, Debug)]
pub struct PackArgs {
    /// Directory containing the pass files
    #[arg(value_name = "DIR")]
    pub source: PathBuf,

    /// Output archive (default: <DIR>.pkpass next to the directory)
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Sign through a remote signing endpoint instead of locally
    #[arg(long, value_name = "URL", conflicts_with = "home")]
    pub remote: Option<String>,

    /// Authorization header value for the remote endpoint
    #[arg(
        long,
        value_name = "VALUE",
        env = "PKPASSMAKE_AUTHORIZATION",
        hide_env_values = true
    )]
    pub authorization: Option<String>,

    /// Signing home containing cert.pem and key.pem
    #[arg(long, value_name = "DIR")]
    pub home: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Archive to check
    #[arg(value_name = "FILE")]
    pub archive: PathBuf,

    /// Print the verified manifest as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct AnchorArgs {
    /// Cache directory (default: the user data directory)
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_local() {
        let cli = Cli::parse_from(["pkpassmake", "pack", "Event.pass", "--home", "/etc/pkpassmake"]);
        match cli.command {
            Commands::Pack(args) => {
                assert_eq!(args.source, PathBuf::from("Event.pass"));
                assert_eq!(args.home, Some(PathBuf::from("/etc/pkpassmake")));
                assert!(args.remote.is_none());
                assert!(args.output.is_none());
            }
            _ => panic!("Expected Pack command"),
        }
    }

    #[test]
    fn test_pack_remote_with_output() {
        let cli = Cli::parse_from([
            "pkpassmake",
            "-s",
            "pack",
            "Event.pass",
            "--remote",
            "https://signer.test/",
            "--authorization",
            "Bearer t",
            "-o",
            "out.pkpass",
        ]);
        assert!(cli.silent);
        match cli.command {
            Commands::Pack(args) => {
                assert_eq!(args.remote.as_deref(), Some("https://signer.test/"));
                assert_eq!(args.authorization.as_deref(), Some("Bearer t"));
                assert_eq!(args.output, Some(PathBuf::from("out.pkpass")));
            }
            _ => panic!("Expected Pack command"),
        }
    }

    #[test]
    fn test_pack_remote_conflicts_with_home() {
        let result = Cli::try_parse_from([
            "pkpassmake",
            "pack",
            "Event.pass",
            "--remote",
            "https://signer.test/",
            "--home",
            "/etc/pkpassmake",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_pack_requires_source() {
        assert!(Cli::try_parse_from(["pkpassmake", "pack"]).is_err());
    }

    #[test]
    fn test_verify_json() {
        let cli = Cli::parse_from(["pkpassmake", "verify", "Event.pkpass", "--json"]);
        match cli.command {
            Commands::Verify(args) => {
                assert_eq!(args.archive, PathBuf::from("Event.pkpass"));
                assert!(args.json);
            }
            _ => panic!("Expected Verify command"),
        }
    }

    #[test]
    fn test_anchor_cache_dir_and_global_silent() {
        let cli = Cli::parse_from(["pkpassmake", "anchor", "--cache-dir", "/tmp/anchors", "--silent"]);
        assert!(cli.silent);
        match cli.command {
            Commands::Anchor(args) => {
                assert_eq!(args.cache_dir, Some(PathBuf::from("/tmp/anchors")));
            }
            _ => panic!("Expected Anchor command"),
        }
    }
}
