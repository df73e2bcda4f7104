use std::fmt::Display;
use std::fs;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::error::{CleanError, GlobError};

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let f = format!("(+{}ms)", s.elapsed().as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Delete the entire output directory if it exists and create it empty.
pub fn clean(dir: &Utf8Path) -> Result<(), CleanError> {
    let s = Instant::now();

    if fs::symlink_metadata(dir).is_ok() {
        fs::remove_dir_all(dir) //
            .map_err(|e| CleanError::Remove(dir.to_string(), e))?;
    }

    fs::create_dir_all(dir) //
        .map_err(|e| CleanError::Create(dir.to_string(), e))?;

    tracing::info!("cleaned {dir} {}", as_overhead(s));

    Ok(())
}

/// Expand `glob` relative to `base` into the list of matching files,
/// directories are skipped. `base` is matched literally, so brackets or stars
/// in the project path are fine. The result is sorted so downstream output
/// is deterministic.
pub fn glob_files(base: &Utf8Path, glob: &str) -> Result<Vec<Utf8PathBuf>, GlobError> {
    let base = glob::Pattern::escape(base.as_str());
    let pattern = format!("{}/{}", base.trim_end_matches('/'), glob.trim_start_matches("./"));
    let mut paths = Vec::new();

    for path in glob::glob(&pattern)? {
        let path = Utf8PathBuf::try_from(path?)?;
        if path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Write `data` to `path`, creating parent directories as needed.
pub fn write(path: &Utf8Path, data: impl AsRef<[u8]>) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    fs::write(path, data)
}

/// Map `file` from under `base` onto the same relative location under
/// `dest`, falling back to the bare file name when `file` is outside `base`.
pub fn rebase(file: &Utf8Path, base: &Utf8Path, dest: &Utf8Path) -> Utf8PathBuf {
    match file.strip_prefix(base) {
        Ok(relative) => dest.join(relative),
        Err(_) => dest.join(file.file_name().unwrap_or(file.as_str())),
    }
}

/// Temporary directory as a UTF-8 path, removed when the guard drops.
#[cfg(test)]
pub(crate) fn tmp() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    (dir, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_removes_everything() {
        let (_guard, root) = tmp();
        let out = root.join("app");
        write(&out.join("css/old.css"), "a{}").unwrap();
        write(&out.join("index.html"), "<p>").unwrap();

        clean(&out).unwrap();

        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_clean_missing_dir() {
        let (_guard, root) = tmp();
        let out = root.join("nested/app");

        clean(&out).unwrap();
        assert!(out.is_dir());
    }

    #[test]
    fn test_glob_files_sorted_and_files_only() {
        let (_guard, root) = tmp();
        write(&root.join("b.txt"), "").unwrap();
        write(&root.join("a.txt"), "").unwrap();
        fs::create_dir_all(root.join("dir.txt")).unwrap();

        let found = glob_files(&root, "*.txt").unwrap();
        assert_eq!(found, vec![root.join("a.txt"), root.join("b.txt")]);
    }

    #[test]
    fn test_glob_files_base_with_wildcards() {
        let (_guard, root) = tmp();
        let base = root.join("site [v2]*");
        write(&base.join("scss/main.scss"), "").unwrap();
        write(&root.join("site v/scss/other.scss"), "").unwrap();

        let found = glob_files(&base, "**/*.scss").unwrap();
        assert_eq!(found, vec![base.join("scss/main.scss")]);
    }

    #[test]
    fn test_rebase() {
        assert_eq!(
            rebase(
                Utf8Path::new("src/images/a/b.png"),
                Utf8Path::new("src/images"),
                Utf8Path::new("app/images")
            ),
            Utf8Path::new("app/images/a/b.png")
        );

        assert_eq!(
            rebase(
                Utf8Path::new("vendor/x.css"),
                Utf8Path::new("src"),
                Utf8Path::new("app")
            ),
            Utf8Path::new("app/x.css")
        );
    }
}
