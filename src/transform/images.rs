use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use thiserror::Error;
use tracing::info;

use crate::error::GlobError;
use crate::io::{as_overhead, glob_files, rebase};
use crate::transform::blocking;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Couldn't copy '{0}'.\n{1}")]
    Copy(Utf8PathBuf, std::io::Error),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Copy every file under `src` to the same relative path under `out`.
pub fn copy_images(src: &Utf8Path, out: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ImageError> {
    let s = Instant::now();
    let files = glob_files(src, "**/*")?;

    let copied = files
        .par_iter()
        .map(|file| -> Result<_, ImageError> {
            let path = rebase(file, src, out);
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir).map_err(|e| ImageError::Copy(file.clone(), e))?;
            }
            fs::copy(file, &path).map_err(|e| ImageError::Copy(file.clone(), e))?;
            Ok(path)
        })
        .collect::<Result<Vec<_>, _>>()?;

    info!("copied {} images {}", copied.len(), as_overhead(s));

    Ok(copied)
}

pub async fn build_images(src: Utf8PathBuf, out: Utf8PathBuf) -> Result<Vec<Utf8PathBuf>, ImageError> {
    blocking(move || copy_images(&src, &out)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{tmp, write};

    #[tokio::test]
    async fn test_copy_mirrors_tree() {
        let (_guard, root) = tmp();
        let src = root.join("images");
        let out = root.join("app/images");
        write(&src.join("logo.svg"), "<svg/>").unwrap();
        write(&src.join("photos/a.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();

        let mut copied = build_images(src.clone(), out.clone()).await.unwrap();
        copied.sort();

        assert_eq!(copied, vec![out.join("logo.svg"), out.join("photos/a.jpg")]);
        assert_eq!(fs::read(out.join("photos/a.jpg")).unwrap(), vec![0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_missing_source_is_empty() {
        let (_guard, root) = tmp();
        assert!(copy_images(&root.join("images"), &root.join("out")).unwrap().is_empty());
    }
}
