//! Third-party libraries concatenated into one stylesheet and one script.

use std::fs;

use camino::Utf8PathBuf;
use thiserror::Error;
use tracing::{info, warn};

use crate::io::write;
use crate::transform::blocking;
use crate::transform::scripts::{ScriptError, minify_js};

pub const LIBS_CSS: &str = "libs.min.css";
pub const LIBS_JS: &str = "libs.min.js";

#[derive(Debug, Error)]
pub enum VendorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't minify vendor styles: {0}")]
    Css(#[from] Box<grass::Error>),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Read the listed files in order. Missing files are reported and left out.
/// Returns the joined text along with the number of files read.
fn concat(files: &[Utf8PathBuf], separator: &str) -> Result<Option<(usize, String)>, VendorError> {
    let mut parts = Vec::with_capacity(files.len());

    for file in files {
        if !file.is_file() {
            warn!("vendor file {file} not found, skipping");
            continue;
        }
        parts.push(fs::read_to_string(file)?);
    }

    if parts.is_empty() {
        return Ok(None);
    }

    Ok(Some((parts.len(), parts.join(separator))))
}

/// Minify a plain CSS bundle.
pub fn minify_css(css: &str) -> Result<String, Box<grass::Error>> {
    let options = grass::Options::default()
        .style(grass::OutputStyle::Compressed)
        .input_syntax(grass::InputSyntax::Css);

    grass::from_string(css.to_owned(), &options)
}

/// Concatenate and minify the vendor stylesheets into `out/libs.min.css`.
/// Nothing is written when none of the files exist.
pub async fn vendor_css(files: Vec<Utf8PathBuf>, out: Utf8PathBuf) -> Result<Option<Utf8PathBuf>, VendorError> {
    blocking(move || {
        let Some((count, css)) = concat(&files, "\n")? else {
            return Ok(None);
        };

        let path = out.join(LIBS_CSS);
        write(&path, minify_css(&css)?)?;
        info!("bundled {count} vendor stylesheets into {path}");

        Ok(Some(path))
    })
    .await
}

/// Concatenate and minify the vendor scripts into `out/libs.min.js`.
pub async fn vendor_js(files: Vec<Utf8PathBuf>, out: Utf8PathBuf) -> Result<Option<Utf8PathBuf>, VendorError> {
    let Some((count, js)) = blocking(move || concat(&files, ";\n")).await? else {
        return Ok(None);
    };

    let data = minify_js(js.into_bytes()).await?;

    let path = out.join(LIBS_JS);
    tokio::fs::create_dir_all(&out).await?;
    tokio::fs::write(&path, data).await?;
    info!("bundled {count} vendor scripts into {path}");

    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tmp;

    #[tokio::test]
    async fn test_vendor_css_concatenates_in_order() {
        let (_guard, root) = tmp();
        let a = root.join("lib/a.css");
        let b = root.join("lib/b.css");
        write(&a, "html {\n  margin: 0;\n}\n").unwrap();
        write(&b, ".swiper {\n  display: block;\n}\n").unwrap();

        let out = root.join("app/css");
        let path = vendor_css(vec![a, root.join("lib/missing.css"), b], out.clone())
            .await
            .unwrap();

        assert_eq!(path, Some(out.join(LIBS_CSS)));
        let css = fs::read_to_string(out.join(LIBS_CSS)).unwrap();
        let html = css.find("html{margin:0}").unwrap();
        let swiper = css.find(".swiper{display:block}").unwrap();
        assert!(html < swiper);
    }

    #[test]
    fn test_concat_counts_only_existing_files() {
        let (_guard, root) = tmp();
        let a = root.join("a.js");
        let b = root.join("b.js");
        write(&a, "var a = 1").unwrap();
        write(&b, "var b = 2").unwrap();

        let (count, js) = concat(&[a, root.join("gone.js"), b], ";\n").unwrap().unwrap();
        assert_eq!(count, 2);
        assert_eq!(js, "var a = 1;\nvar b = 2");
    }

    #[tokio::test]
    async fn test_vendor_nothing_to_do() {
        let (_guard, root) = tmp();
        let out = root.join("app/css");

        let path = vendor_css(vec![root.join("missing.css")], out.clone()).await.unwrap();
        assert_eq!(path, None);
        assert!(!out.exists());

        let path = vendor_js(vec![], root.join("app/js")).await.unwrap();
        assert_eq!(path, None);
    }
}
