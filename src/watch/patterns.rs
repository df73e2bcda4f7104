use camino::{Utf8Path, Utf8PathBuf};
use glob::{MatchOptions, Pattern};

pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Compile `glob` relative to `root`. The root is escaped so that brackets
/// or stars in the project path are matched literally.
pub(crate) fn compile(root: &Utf8Path, glob: &str) -> Result<Pattern, glob::PatternError> {
    let root = Pattern::escape(root.as_str());
    let glob = glob.trim_start_matches("./");
    Pattern::new(&format!("{}/{}", root.trim_end_matches('/'), glob))
}

/// The static part of a glob, i.e. every leading component free of
/// wildcards. This is the directory that has to be watched recursively for
/// the pattern to ever match.
pub(crate) fn static_root(glob: &Utf8Path) -> Utf8PathBuf {
    glob.components()
        .take_while(|c| !c.as_str().contains(['*', '?', '[']))
        .collect()
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
pub(crate) fn collapse_watch_paths(paths: impl IntoIterator<Item = Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();
    paths.dedup();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
