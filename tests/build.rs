use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use kumitate::pipeline::{STYLES, build_graph};
use kumitate::{Config, GraphError};
use tempfile::TempDir;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

fn write(path: &Utf8Path, data: impl AsRef<[u8]>) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// A small project without scripts or fonts, so no external tools are needed.
fn project() -> (TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    (dir, project_at(root))
}

fn project_at(root: Utf8PathBuf) -> Config {
    let src = root.join("src");

    write(
        &src.join("index.html"),
        "<!DOCTYPE html>\n<html>\n<body>\n  <!-- header -->\n  @include('partials/header.html', {\"title\": \"Hello\"})\n</body>\n</html>\n",
    );
    write(&src.join("partials/header.html"), "<h1>@title</h1>");
    write(&src.join("scss/_vars.scss"), "$accent: #c00;\n");
    write(
        &src.join("scss/main.scss"),
        "@import 'vars';\n\nbody {\n  color: $accent;\n  user-select: none;\n}\n",
    );
    write(&src.join("images/icons/logo.png"), PNG);

    // left over from an earlier build
    write(&root.join("app/stale.txt"), "old");

    Config::with_root(root)
}

fn snapshot(dir: &Utf8Path) -> BTreeMap<Utf8PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];

    while let Some(next) = stack.pop() {
        for entry in next.read_dir_utf8().unwrap() {
            let path = entry.unwrap().into_path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let data = fs::read(&path).unwrap();
                files.insert(path.strip_prefix(dir).unwrap().to_path_buf(), data);
            }
        }
    }

    files
}

#[tokio::test]
async fn test_build_output() {
    let (_guard, config) = project();

    let report = build_graph(&config).run().await.unwrap();
    assert_eq!(report.names().first(), Some(&"clean"));
    assert_eq!(report.names().last(), Some(&"compress"));
    assert_eq!(report.executions.len(), 7);

    let out = snapshot(&config.out());
    let names: Vec<_> = out.keys().map(|path| path.as_str()).collect();
    assert_eq!(names, vec!["css/main.min.css", "images/icons/logo.png", "index.html"]);

    let html = String::from_utf8(out[Utf8Path::new("index.html")].clone()).unwrap();
    assert_eq!(html, "<!DOCTYPE html><html><body><h1>Hello</h1></body></html>");

    let css = String::from_utf8(out[Utf8Path::new("css/main.min.css")].clone()).unwrap();
    assert!(css.contains("color:#c00"));
    assert!(css.contains("-webkit-user-select:none"));

    // no compression key: images are copied untouched
    assert_eq!(out[Utf8Path::new("images/icons/logo.png")], PNG);
}

#[tokio::test]
async fn test_build_under_root_with_glob_characters() {
    let dir = tempfile::tempdir().unwrap();
    let base = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
    let config = project_at(base.join("site [v2]"));

    build_graph(&config).run().await.unwrap();

    let out = snapshot(&config.out());
    let names: Vec<_> = out.keys().map(|path| path.as_str()).collect();
    assert_eq!(names, vec!["css/main.min.css", "images/icons/logo.png", "index.html"]);
}

#[tokio::test]
async fn test_build_is_reproducible() {
    let (_guard, config) = project();
    let graph = build_graph(&config);

    graph.run().await.unwrap();
    let first = snapshot(&config.out());

    graph.run().await.unwrap();
    let second = snapshot(&config.out());

    assert_eq!(first, second);
}

#[tokio::test]
async fn test_build_stops_on_style_error() {
    let (_guard, config) = project();
    write(&config.src().join("scss/main.scss"), "body { color: ");

    let err = build_graph(&config).run().await.unwrap_err();
    assert_eq!(err.task(), STYLES);
    assert!(matches!(err, GraphError::Task(..)));

    // the steps before it did run
    assert!(config.out().join("index.html").exists());
    assert!(!config.out().join("css/main.min.css").exists());
}

#[tokio::test]
async fn test_custom_layout_from_config() {
    let (_guard, mut config) = project();
    let root = config.root.clone();
    write(
        &root.join("kumitate.toml"),
        "output = \"dist\"\n\n[compress]\nkey = \"  \"\n",
    );
    config = Config::load(&root, None).unwrap();

    build_graph(&config).run().await.unwrap();

    assert!(root.join("dist/index.html").exists());
    // untouched: the stale directory belongs to the default layout
    assert!(root.join("app/stale.txt").exists());
}
