//! Bundle assembly and verification
//!
//! [`assemble`] turns a source directory into a signed archive:
//!
//! 1. enumerate and digest every eligible file,
//! 2. write `manifest.json` into the source directory,
//! 3. sign the manifest bytes and write `signature` next to it,
//! 4. write a deflate archive of the captured files plus both artifacts.
//!
//! The archive is staged in a temporary file next to the destination and
//! renamed over it as the final step, so a failed or cancelled run never
//! leaves a partial archive at the destination path.

use crate::error::{PassError, Result};
use crate::manifest::{collect_files, Manifest, SourceFile, MANIFEST_FILE, SIGNATURE_FILE};
use crate::signer::Signer;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Extension appended to the source directory name for the default output.
pub const BUNDLE_EXTENSION: &str = "pkpass";

/// Largest single entry [`verify_bundle`] will decompress (64 MiB).
const MAX_VERIFY_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

/// Default output path: a sibling of `source` named `<dir>.pkpass`.
///
/// # Errors
///
/// Returns `PassError::Config` if `source` has no final path component
/// (for example `/` or `..`).
pub fn default_destination(source: &Path) -> Result<PathBuf> {
    let name = source.file_name().ok_or_else(|| {
        PassError::Config(format!(
            "cannot derive a bundle name from {}",
            source.display()
        ))
    })?;
    let mut name = name.to_os_string();
    name.push(".");
    name.push(BUNDLE_EXTENSION);
    Ok(source.with_file_name(name))
}

/// Builds signed bundles with one bound [`Signer`].
#[derive(Clone)]
pub struct BundleAssembler {
    signer: Arc<dyn Signer>,
}

impl std::fmt::Debug for BundleAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleAssembler").finish_non_exhaustive()
    }
}

impl BundleAssembler {
    #[must_use]
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer }
    }

    /// See [`assemble`].
    ///
    /// # Errors
    ///
    /// See [`assemble`].
    pub async fn assemble(&self, source: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        assemble(source, self.signer.as_ref(), destination).await
    }
}

/// Sign `source` with `signer` and write the archive to `destination`
/// (default: [`default_destination`]). Returns the archive path.
///
/// `manifest.json` and `signature` are left in `source` afterwards.
///
/// # Errors
///
/// `PassError::NotADirectory` for a bad source, `PassError::Io` /
/// `PassError::Archive` for filesystem or archive failures, and whatever
/// the signer returns.
pub async fn assemble(
    source: &Path,
    signer: &dyn Signer,
    destination: Option<&Path>,
) -> Result<PathBuf> {
    info!("Signing and compressing {}", source.display());
    let result = assemble_inner(source, signer, destination).await;
    if let Err(e) = &result {
        error!("{}", e);
    }
    result
}

async fn assemble_inner(
    source: &Path,
    signer: &dyn Signer,
    destination: Option<&Path>,
) -> Result<PathBuf> {
    let is_dir = tokio::fs::metadata(source)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(PassError::NotADirectory {
            path: source.to_path_buf(),
        });
    }

    let destination = match destination {
        Some(path) => path.to_path_buf(),
        None => {
            let absolute = tokio::fs::canonicalize(source)
                .await
                .map_err(|e| PassError::io(source, e))?;
            default_destination(&absolute)?
        }
    };

    let files = collect_files(source).await?;
    let manifest = Manifest::from_files(&files);
    let manifest_bytes = manifest.to_json_bytes()?;
    debug!("Manifest: {} entries [{}B]", manifest.len(), manifest_bytes.len());

    let manifest_path = source.join(MANIFEST_FILE);
    tokio::fs::write(&manifest_path, &manifest_bytes)
        .await
        .map_err(|e| PassError::io(&manifest_path, e))?;

    let signature = signer.sign(&manifest_bytes).await?;
    let signature_path = source.join(SIGNATURE_FILE);
    tokio::fs::write(&signature_path, &signature)
        .await
        .map_err(|e| PassError::io(&signature_path, e))?;
    debug!("Signature: [{}B]", signature.len());

    let target = destination.clone();
    let size = tokio::task::spawn_blocking(move || {
        write_archive(&target, &files, &manifest_bytes, &signature)
    })
    .await
    .map_err(|e| PassError::io(&destination, std::io::Error::other(e)))??;

    info!("Output: {} [{}B]", destination.display(), size);
    Ok(destination)
}

/// Write the archive to a staging file beside `destination`, then rename it
/// into place. Returns the archive size.
fn write_archive(
    destination: &Path,
    files: &[SourceFile],
    manifest: &[u8],
    signature: &[u8],
) -> Result<u64> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let archive_err = |source: zip::result::ZipError| PassError::Archive {
        path: destination.to_path_buf(),
        source,
    };

    let staged = tempfile::Builder::new()
        .prefix(".pkpassmake-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| PassError::io(parent, e))?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(staged);

    let entries = files
        .iter()
        .map(|file| (file.path.as_str(), file.data.as_slice()))
        .chain([(MANIFEST_FILE, manifest), (SIGNATURE_FILE, signature)]);
    for (name, data) in entries {
        zip.start_file(name, options).map_err(archive_err)?;
        zip.write_all(data).map_err(|e| archive_err(e.into()))?;
    }

    let staged = zip.finish().map_err(archive_err)?;
    staged
        .as_file()
        .sync_all()
        .map_err(|e| PassError::io(staged.path(), e))?;
    let size = staged
        .as_file()
        .metadata()
        .map_err(|e| PassError::io(staged.path(), e))?
        .len();

    // Replaces any previous archive in one step.
    staged
        .persist(destination)
        .map_err(|e| PassError::io(destination, e.error))?;
    Ok(size)
}

/// Contents of an archive that passed [`verify_bundle`].
#[derive(Debug, Clone)]
pub struct VerifiedBundle {
    pub manifest: Manifest,
    pub signature: Vec<u8>,
}

/// Check that an archive is internally consistent.
///
/// The entry set must equal the manifest keys plus `manifest.json` and
/// `signature`, and every listed entry must match its recorded digest. The
/// signature itself is not validated cryptographically.
///
/// # Errors
///
/// `PassError::Archive` if the file is not a readable archive and
/// `PassError::Integrity` describing the first inconsistency found.
pub async fn verify_bundle(path: &Path) -> Result<VerifiedBundle> {
    let path = path.to_path_buf();
    let target = path.clone();
    tokio::task::spawn_blocking(move || verify_blocking(&target))
        .await
        .map_err(|e| PassError::io(&path, std::io::Error::other(e)))?
}

fn verify_blocking(path: &Path) -> Result<VerifiedBundle> {
    let archive_err = |source: zip::result::ZipError| PassError::Archive {
        path: path.to_path_buf(),
        source,
    };

    let file = std::fs::File::open(path).map_err(|e| PassError::io(path, e))?;
    let mut archive = ZipArchive::new(file).map_err(archive_err)?;

    let mut entries = BTreeMap::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(archive_err)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if entry.size() > MAX_VERIFY_ENTRY_BYTES {
            return Err(PassError::Integrity(format!(
                "entry {} is larger than {} bytes",
                name, MAX_VERIFY_ENTRY_BYTES
            )));
        }
        let mut data = Vec::new();
        entry
            .by_ref()
            .take(MAX_VERIFY_ENTRY_BYTES)
            .read_to_end(&mut data)
            .map_err(|e| archive_err(e.into()))?;
        if entries.insert(name.clone(), data).is_some() {
            return Err(PassError::Integrity(format!("duplicate entry {}", name)));
        }
    }

    let manifest_bytes = entries
        .remove(MANIFEST_FILE)
        .ok_or_else(|| PassError::Integrity(format!("missing {}", MANIFEST_FILE)))?;
    let signature = entries
        .remove(SIGNATURE_FILE)
        .ok_or_else(|| PassError::Integrity(format!("missing {}", SIGNATURE_FILE)))?;
    let manifest = Manifest::from_json_bytes(&manifest_bytes)?;

    for (name, data) in &entries {
        if manifest.get(name).is_none() {
            return Err(PassError::Integrity(format!(
                "entry {} is not listed in the manifest",
                name
            )));
        }
        if !manifest.verify_entry(name, data) {
            return Err(PassError::Integrity(format!("digest mismatch for {}", name)));
        }
    }
    if let Some(missing) = manifest.paths().find(|p| !entries.contains_key(*p)) {
        return Err(PassError::Integrity(format!(
            "manifest lists {} but the archive does not contain it",
            missing
        )));
    }

    debug!("Verified {} ({} entries)", path.display(), manifest.len());
    Ok(VerifiedBundle {
        manifest,
        signature,
    })
}
