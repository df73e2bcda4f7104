use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::GlobError;
use crate::io::{as_overhead, glob_files, rebase, write};
use crate::transform::{blocking, lint, prefix};

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sass compilation error: {0}")]
    Sass(#[from] Box<grass::Error>),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Partials are only ever pulled in by other stylesheets.
fn is_partial(path: &Utf8Path) -> bool {
    path.file_name().is_some_and(|name| name.starts_with('_'))
}

fn compile_one(entry: &Utf8Path, src: &Utf8Path) -> Result<String, StyleError> {
    let options = grass::Options::default()
        .style(grass::OutputStyle::Compressed)
        .load_path(src);

    let css = grass::from_path(entry, &options)?;
    Ok(prefix::autoprefix(&css))
}

/// Compile every non-partial stylesheet under `src` into `out`, mirroring the
/// directory layout with a `.min.css` extension.
///
/// All entries are compiled before anything is written, so a syntax error in
/// any of them leaves the previous output in place.
pub fn compile(src: &Utf8Path, out: &Utf8Path) -> Result<Vec<Utf8PathBuf>, StyleError> {
    let s = Instant::now();

    let entries: Vec<_> = glob_files(src, "**/*.scss")?
        .into_iter()
        .filter(|path| !is_partial(path))
        .collect();

    let compiled = entries
        .par_iter()
        .map(|entry| -> Result<_, StyleError> {
            let css = compile_one(entry, src)?;
            let path = rebase(entry, src, out).with_extension("min.css");
            Ok((path, css))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (path, css) in &compiled {
        write(path, css)?;
    }

    info!("compiled {} stylesheets {}", compiled.len(), as_overhead(s));

    Ok(compiled.into_iter().map(|(path, _)| path).collect())
}

/// Check every stylesheet under `src`, partials included, and log what was
/// found. Findings never fail the build.
pub fn lint_dir(src: &Utf8Path) -> Result<Vec<lint::Finding>, StyleError> {
    let mut findings = Vec::new();

    for file in glob_files(src, "**/*.scss")? {
        let text = fs::read_to_string(&file)?;
        findings.extend(lint::lint(&file, &text));
    }

    for finding in &findings {
        warn!("{finding}");
    }

    Ok(findings)
}

/// Lint (when asked to) and compile on the blocking pool.
pub async fn build_styles(
    src: Utf8PathBuf,
    out: Utf8PathBuf,
    lint: bool,
) -> Result<Vec<Utf8PathBuf>, StyleError> {
    blocking(move || {
        if lint {
            lint_dir(&src)?;
        }
        compile(&src, &out)
    })
    .await
}
