use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::io::as_overhead;

/// Name of the bundler executable looked up on `PATH`.
pub const ESBUILD: &str = "esbuild";

/// Errors that can occur when bundling scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't find `{ESBUILD}` on PATH, install it with `npm i -g esbuild`")]
    Missing,

    #[error("Esbuild execution failed: {0}")]
    Esbuild(String),

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

fn spawn_error(e: std::io::Error) -> ScriptError {
    match e.kind() {
        ErrorKind::NotFound => ScriptError::Missing,
        _ => ScriptError::Io(e),
    }
}

/// Bundle `entry` with its imports into `outfile`. Dev builds keep an
/// external source map next to the bundle. A missing entry is not an error,
/// some sites have no scripts at all.
pub async fn bundle(entry: &Utf8Path, outfile: &Utf8Path, sourcemap: bool) -> Result<bool, ScriptError> {
    if !entry.is_file() {
        debug!("no script entry at {entry}, skipping");
        return Ok(false);
    }

    let s = Instant::now();

    if let Some(dir) = outfile.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut command = Command::new(ESBUILD);
    command
        .arg(entry.as_str())
        .arg("--bundle")
        .arg("--minify")
        .arg("--target=es2015")
        .arg(format!("--outfile={outfile}"))
        .arg("--log-level=warning");

    if sourcemap {
        command.arg("--sourcemap");
    }

    let output = command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(spawn_error)?;

    if !output.status.success() {
        return Err(ScriptError::Esbuild(String::from_utf8(output.stderr)?));
    }

    info!("bundled {outfile} {}", as_overhead(s));

    Ok(true)
}

/// Minify standalone JavaScript by piping it through the bundler.
pub async fn minify_js(source: Vec<u8>) -> Result<Vec<u8>, ScriptError> {
    let mut child = Command::new(ESBUILD)
        .arg("--minify")
        .arg("--loader=js")
        .arg("--log-level=warning")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_error)?;

    if let Some(mut stdin) = child.stdin.take() {
        // Writer runs alongside the reader so large inputs can't deadlock
        // on a full pipe.
        let writer = tokio::spawn(async move {
            stdin.write_all(&source).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await?;
        writer.await.map_err(std::io::Error::other)??;

        if !output.status.success() {
            return Err(ScriptError::Esbuild(String::from_utf8(output.stderr)?));
        }

        return Ok(output.stdout);
    }

    Err(ScriptError::Esbuild(String::from("stdin unavailable")))
}

/// Default bundle location for `entry` inside the scripts output directory.
pub fn outfile(entry: &Utf8Path, out: &Utf8Path) -> Utf8PathBuf {
    out.join(entry.file_name().unwrap_or("main.js"))
}
