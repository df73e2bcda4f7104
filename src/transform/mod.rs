//! File-set transformers. Each one reads from the source tree and writes
//! under its own subdirectory of the output tree, so any of them can run in
//! parallel with the others.
//!
//! CPU-bound work (Sass compilation, font encoding, directory walks) runs on
//! the blocking pool; external tools and the compression service are awaited
//! directly.

pub mod compress;
pub mod fonts;
pub mod images;
pub mod lint;
pub mod markup;
pub mod prefix;
pub mod scripts;
pub mod styles;
pub mod vendor;

use tokio::task::JoinError;

/// Run `f` on the blocking thread pool.
pub(crate) async fn blocking<T, E, F>(f: F) -> Result<T, E>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<JoinError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
