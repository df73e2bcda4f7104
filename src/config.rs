//! Project configuration.
//!
//! Everything has a default matching the conventional layout:
//!
//! ```text
//! src/                  app/
//! ├── index.html        ├── index.html
//! ├── partials/         ├── css/
//! ├── scss/             ├── js/
//! ├── js/main.js        ├── images/
//! ├── images/           └── fonts/
//! └── fonts/
//! ```
//!
//! An optional `kumitate.toml` in the project root can override the source and
//! output roots, the server ports, the script entry point, the vendor library
//! lists and the compression settings.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the config file looked up in the project root.
pub const CONFIG_FILE: &str = "kumitate.toml";

/// Environment variable holding the image compression credential.
pub const ENV_TINIFY_KEY: &str = "TINIFY_KEY";

/// Fixed subdirectories of the source and output trees.
pub mod layout {
    pub const SRC_STYLES: &str = "scss";
    pub const SRC_SCRIPTS: &str = "js";
    pub const SRC_IMAGES: &str = "images";
    pub const SRC_FONTS: &str = "fonts";

    pub const OUT_STYLES: &str = "css";
    pub const OUT_SCRIPTS: &str = "js";
    pub const OUT_IMAGES: &str = "images";
    pub const OUT_FONTS: &str = "fonts";
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Project root, every other path is relative to it. Never read from the
    /// file itself.
    #[serde(skip)]
    pub root: Utf8PathBuf,
    /// Source tree, relative to the root.
    pub source: Utf8PathBuf,
    /// Output tree, relative to the root. Purged on every full build.
    pub output: Utf8PathBuf,
    pub server: ServerConfig,
    pub scripts: ScriptsConfig,
    pub vendor: VendorConfig,
    pub compress: CompressConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// HTTP port serving the output directory.
    pub port: u16,
    /// WebSocket port for live reload. Falls back to a random free port when
    /// taken.
    pub reload_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptsConfig {
    /// Bundle entry point, relative to the source `js` directory.
    pub entry: Utf8PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VendorConfig {
    /// Stylesheets concatenated into `css/libs.min.css`, relative to the root.
    pub css: Vec<Utf8PathBuf>,
    /// Scripts concatenated into `js/libs.min.js`, relative to the root.
    pub js: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressConfig {
    /// Tinify API key. Empty or absent disables compression.
    pub key: Option<String>,
    /// Directory for compressed results keyed by content hash, relative to
    /// the root.
    pub cache: Utf8PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            source: Utf8PathBuf::from("src"),
            output: Utf8PathBuf::from("app"),
            server: ServerConfig::default(),
            scripts: ScriptsConfig::default(),
            vendor: VendorConfig::default(),
            compress: CompressConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            reload_port: 1337,
        }
    }
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            entry: Utf8PathBuf::from("main.js"),
        }
    }
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            css: vec![
                "node_modules/normalize.css/normalize.css".into(),
                "node_modules/swiper/swiper-bundle.min.css".into(),
            ],
            js: vec![
                "node_modules/swiper/swiper-bundle.min.js".into(),
                "node_modules/lazysizes/lazysizes.min.js".into(),
            ],
        }
    }
}

impl Default for CompressConfig {
    fn default() -> Self {
        Self {
            key: None,
            cache: Utf8PathBuf::from(".cache/compress"),
        }
    }
}

impl Config {
    /// Defaults rooted at `root`.
    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load `path` if it exists, otherwise fall back to defaults. The root is
    /// always set to `root` regardless of the file contents.
    pub fn load(root: impl AsRef<Utf8Path>, path: Option<&Utf8Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let default_path = root.join(CONFIG_FILE);
        let path = path.unwrap_or(&default_path);

        let mut config = if path.exists() {
            let text =
                fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_string(), e))?;
            Self::parse(&text).map_err(|e| ConfigError::Parse(path.to_string(), e))?
        } else {
            tracing::debug!(%path, "no config file, using defaults");
            Self::default()
        };

        config.root = root.to_path_buf();
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Set the compression key from the CLI or environment, blank values
    /// clear it.
    pub fn set_compress_key(&mut self, key: Option<String>) {
        if key.is_some() {
            self.compress.key = key;
        }
    }

    /// Compression key, if one is configured and non-blank.
    pub fn compress_key(&self) -> Option<&str> {
        self.compress
            .key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn src(&self) -> Utf8PathBuf {
        self.root.join(&self.source)
    }

    pub fn out(&self) -> Utf8PathBuf {
        self.root.join(&self.output)
    }

    pub fn src_dir(&self, sub: &str) -> Utf8PathBuf {
        self.src().join(sub)
    }

    pub fn out_dir(&self, sub: &str) -> Utf8PathBuf {
        self.out().join(sub)
    }

    pub fn script_entry(&self) -> Utf8PathBuf {
        self.src_dir(layout::SRC_SCRIPTS).join(&self.scripts.entry)
    }

    pub fn vendor_css(&self) -> Vec<Utf8PathBuf> {
        self.vendor.css.iter().map(|p| self.root.join(p)).collect()
    }

    pub fn vendor_js(&self) -> Vec<Utf8PathBuf> {
        self.vendor.js.iter().map(|p| self.root.join(p)).collect()
    }

    pub fn compress_cache(&self) -> Utf8PathBuf {
        self.root.join(&self.compress.cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::with_root("/project");
        assert_eq!(config.src(), Utf8Path::new("/project/src"));
        assert_eq!(config.out_dir(layout::OUT_STYLES), Utf8Path::new("/project/app/css"));
        assert_eq!(config.script_entry(), Utf8Path::new("/project/src/js/main.js"));
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.vendor_js().len(), 2);
        assert!(config.compress_key().is_none());
    }

    #[test]
    fn test_parse_partial() {
        let config = Config::parse(
            r#"
            output = "dist"

            [server]
            port = 8080

            [vendor]
            css = ["lib/reset.css"]
            "#,
        )
        .unwrap();

        assert_eq!(config.output, Utf8Path::new("dist"));
        assert_eq!(config.source, Utf8Path::new("src"));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.reload_port, 1337);
        assert_eq!(config.vendor.css, vec![Utf8PathBuf::from("lib/reset.css")]);
        // untouched section keeps its defaults
        assert_eq!(config.vendor.js.len(), 2);
    }

    #[test]
    fn test_parse_unknown_field() {
        assert!(Config::parse("sources = \"x\"").is_err());
    }

    #[test]
    fn test_blank_key_is_absent() {
        let mut config = Config::default();
        config.set_compress_key(Some("   ".into()));
        assert!(config.compress_key().is_none());

        config.set_compress_key(Some("abc".into()));
        assert_eq!(config.compress_key(), Some("abc"));

        // no override keeps the configured key
        config.set_compress_key(None);
        assert_eq!(config.compress_key(), Some("abc"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        let config = Config::load(root, None).unwrap();
        assert_eq!(config.root, root);
        assert_eq!(config.output, Utf8Path::new("app"));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::write(root.join(CONFIG_FILE), "source = \"assets\"\n").unwrap();

        let config = Config::load(root, None).unwrap();
        assert_eq!(config.src(), root.join("assets"));
    }
}
