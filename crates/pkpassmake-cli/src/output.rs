//! CLI output styling for pkpassmake

use colored::Colorize;
use pkpassmake::{Manifest, VerifiedBundle};
use std::path::Path;

/// Print the result of a successful `pack`.
pub fn print_packed(archive: &Path, remote: Option<&str>, silent: bool) {
    if silent {
        return;
    }
    let how = match remote {
        Some(url) => format!("signed by {}", url),
        None => "signed locally".to_string(),
    };
    eprintln!(
        "  {} {} ({})",
        "\u{2713}".green().bold(),
        archive.display().to_string().bold(),
        how.truecolor(150, 150, 150)
    );
}

/// Print the summary and entry list of a verified archive.
pub fn print_verified(archive: &Path, bundle: &VerifiedBundle, silent: bool) {
    if silent {
        return;
    }
    eprintln!(
        "  {} {}: {} files, {}B signature",
        "\u{2713}".green().bold(),
        archive.display().to_string().bold(),
        bundle.manifest.len(),
        bundle.signature.len()
    );
    for line in entry_lines(&bundle.manifest) {
        eprintln!("    {}", line);
    }
}

/// Print the trust anchor location.
pub fn print_anchor(path: &Path, silent: bool) {
    if !silent {
        eprintln!("  {} trust anchor cached", "\u{2713}".green().bold());
    }
    println!("{}", path.display());
}

/// `<digest>  <path>` lines, paths in manifest order.
fn entry_lines(manifest: &Manifest) -> Vec<String> {
    manifest
        .iter()
        .map(|(path, digest)| format!("{}  {}", digest.dimmed(), path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_lines_follow_manifest_order() {
        colored::control::set_override(false);
        let mut manifest = Manifest::new();
        manifest.insert("pass.json".into(), "bb".into());
        manifest.insert("icon.png".into(), "aa".into());
        assert_eq!(entry_lines(&manifest), vec!["aa  icon.png", "bb  pass.json"]);
    }
}
