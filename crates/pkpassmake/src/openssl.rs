//! OpenSSL command-line invocation
//!
//! Local signing and trust-anchor conversion both shell out to `openssl`.
//! Input is fed on stdin; stdout and stderr are captured up to
//! [`MAX_CAPTURE_BYTES`] each and the remainder is drained and discarded so
//! a chatty child can never block on a full pipe. The child is killed if the
//! calling future is dropped.

use crate::error::{PassError, Result};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, error, info};

/// Default program name, resolved through `PATH`.
pub const OPENSSL_PROGRAM: &str = "openssl";

/// Capture limit for each of stdout and stderr (16 KiB).
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024;

/// Bytes captured from a successful invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Handle to the `openssl` executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSsl {
    program: PathBuf,
}

impl Default for OpenSsl {
    fn default() -> Self {
        Self {
            program: PathBuf::from(OPENSSL_PROGRAM),
        }
    }
}

impl OpenSsl {
    /// Use `openssl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific executable.
    #[must_use]
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run `openssl` with `args`, writing `input` to its stdin.
    ///
    /// # Errors
    ///
    /// Returns `PassError::ToolSpawn` if the process cannot be started and
    /// `PassError::ToolFailed` on a non-zero exit status.
    pub async fn run(&self, args: &[OsString], input: &[u8]) -> Result<ToolOutput> {
        let program = self.program.display().to_string();
        let suffix = if input.is_empty() {
            String::new()
        } else {
            format!(" < [{}B]", input.len())
        };
        info!("{} {}{}", program, display_args(args), suffix);

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PassError::ToolSpawn {
                program: program.clone(),
                source: e,
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let feed = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(input).await {
                    // The child may exit before consuming its input; the
                    // exit status tells the real story.
                    debug!("stdin write to {} stopped early: {}", OPENSSL_PROGRAM, e);
                }
                // dropping stdin closes the pipe
            }
        };

        let (_, stdout, stderr) = tokio::join!(
            feed,
            read_bounded(stdout, MAX_CAPTURE_BYTES),
            read_bounded(stderr, MAX_CAPTURE_BYTES),
        );
        let stdout = stdout.map_err(|e| PassError::signing_io(&self.program, e))?;
        let stderr = stderr.map_err(|e| PassError::signing_io(&self.program, e))?;

        let status = child
            .wait()
            .await
            .map_err(|e| PassError::signing_io(&self.program, e))?;

        if !status.success() {
            error!("{} failed: {}", program, status);
            return Err(PassError::ToolFailed {
                program,
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(ToolOutput { stdout, stderr })
    }

    /// Convert a DER certificate to PEM, writing the result to `out`.
    ///
    /// # Errors
    ///
    /// Same as [`OpenSsl::run`].
    pub async fn der_to_pem(&self, der: &[u8], out: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "x509".into(),
            "-inform".into(),
            "DER".into(),
            "-outform".into(),
            "PEM".into(),
            "-out".into(),
            out.as_os_str().to_owned(),
        ];
        self.run(&args, der).await.map(|_| ())
    }
}

/// Read a pipe to EOF, keeping at most `limit` bytes.
async fn read_bounded<R: AsyncRead + Unpin>(
    reader: Option<R>,
    limit: usize,
) -> std::io::Result<Vec<u8>> {
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
    }
    Ok(buf)
}

/// Render arguments for logging: quote arguments containing whitespace and
/// redact inline passphrases.
#[must_use]
pub fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| display_arg(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_arg(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    if arg.starts_with("pass:") {
        return "pass:***".to_string();
    }
    if arg.chars().any(char::is_whitespace) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.into_owned()
    }
}
