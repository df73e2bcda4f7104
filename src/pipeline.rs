//! The two task graphs, assembled from the transform functions.
//!
//! ```text
//! build: sequence(clean, parallel(markup, scripts, fonts, images), styles, compress)
//! dev:   sequence(clean, parallel(markup, scripts, fonts, images, vendor-css, vendor-js), styles, watch)
//! ```
//!
//! In dev mode the style and script leaves report their failures through a
//! [`Notifier`](crate::notify::Notifier) instead of failing, and the same leaves are bound to the
//! watch supervisor so they re-run on change.

use camino::Utf8PathBuf;

use crate::config::{Config, layout};
use crate::graph::{Node, Task, TaskResult, parallel, sequence};
use crate::transform::{compress, fonts, images, markup, scripts, styles, vendor};
use crate::Mode;

pub const CLEAN: &str = "clean";
pub const MARKUP: &str = "markup";
pub const SCRIPTS: &str = "scripts";
pub const FONTS: &str = "fonts";
pub const IMAGES: &str = "images";
pub const VENDOR_CSS: &str = "vendor-css";
pub const VENDOR_JS: &str = "vendor-js";
pub const STYLES: &str = "styles";
pub const COMPRESS: &str = "compress";
pub const WATCH: &str = "watch";

async fn run_clean(out: Utf8PathBuf) -> TaskResult {
    tokio::task::spawn_blocking(move || crate::io::clean(&out)).await??;
    Ok(())
}

async fn run_markup(src: Utf8PathBuf, out: Utf8PathBuf, live_reload: Option<u16>) -> TaskResult {
    markup::build_markup(src, out, live_reload).await?;
    Ok(())
}

async fn run_scripts(entry: Utf8PathBuf, outfile: Utf8PathBuf, sourcemap: bool) -> TaskResult {
    scripts::bundle(&entry, &outfile, sourcemap).await?;
    Ok(())
}

async fn run_styles(src: Utf8PathBuf, out: Utf8PathBuf, lint: bool) -> TaskResult {
    styles::build_styles(src, out, lint).await?;
    Ok(())
}

async fn run_fonts(src: Utf8PathBuf, out: Utf8PathBuf) -> TaskResult {
    fonts::convert_fonts(src, out).await?;
    Ok(())
}

async fn run_images(src: Utf8PathBuf, out: Utf8PathBuf) -> TaskResult {
    images::build_images(src, out).await?;
    Ok(())
}

async fn run_vendor_css(files: Vec<Utf8PathBuf>, out: Utf8PathBuf) -> TaskResult {
    vendor::vendor_css(files, out).await?;
    Ok(())
}

async fn run_vendor_js(files: Vec<Utf8PathBuf>, out: Utf8PathBuf) -> TaskResult {
    vendor::vendor_js(files, out).await?;
    Ok(())
}

async fn run_compress(dir: Utf8PathBuf, key: Option<String>, cache: Utf8PathBuf) -> TaskResult {
    compress::compress_images(dir, key, cache).await?;
    Ok(())
}

/// Purge the output directory.
pub fn clean(config: &Config) -> Task {
    let out = config.out();
    Task::new(CLEAN, move || run_clean(out.clone()))
}

/// Assemble pages; `live_reload` adds the client script for that port.
pub fn markup(config: &Config, live_reload: Option<u16>) -> Task {
    let (src, out) = (config.src(), config.out());
    Task::new(MARKUP, move || run_markup(src.clone(), out.clone(), live_reload))
}

pub fn scripts(config: &Config, mode: Mode) -> Task {
    let entry = config.script_entry();
    let outfile = scripts::outfile(&entry, &config.out_dir(layout::OUT_SCRIPTS));
    let sourcemap = mode.is_dev();
    Task::new(SCRIPTS, move || run_scripts(entry.clone(), outfile.clone(), sourcemap))
}

pub fn styles(config: &Config, mode: Mode) -> Task {
    let src = config.src_dir(layout::SRC_STYLES);
    let out = config.out_dir(layout::OUT_STYLES);
    let lint = mode.is_dev();
    Task::new(STYLES, move || run_styles(src.clone(), out.clone(), lint))
}

pub fn fonts(config: &Config) -> Task {
    let src = config.src_dir(layout::SRC_FONTS);
    let out = config.out_dir(layout::OUT_FONTS);
    Task::new(FONTS, move || run_fonts(src.clone(), out.clone()))
}

pub fn images(config: &Config) -> Task {
    let src = config.src_dir(layout::SRC_IMAGES);
    let out = config.out_dir(layout::OUT_IMAGES);
    Task::new(IMAGES, move || run_images(src.clone(), out.clone()))
}

pub fn vendor_css(config: &Config) -> Task {
    let files = config.vendor_css();
    let out = config.out_dir(layout::OUT_STYLES);
    Task::new(VENDOR_CSS, move || run_vendor_css(files.clone(), out.clone()))
}

pub fn vendor_js(config: &Config) -> Task {
    let files = config.vendor_js();
    let out = config.out_dir(layout::OUT_SCRIPTS);
    Task::new(VENDOR_JS, move || run_vendor_js(files.clone(), out.clone()))
}

pub fn compress(config: &Config) -> Task {
    let dir = config.out_dir(layout::OUT_IMAGES);
    let key = config.compress_key().map(String::from);
    let cache = config.compress_cache();
    Task::new(COMPRESS, move || run_compress(dir.clone(), key.clone(), cache.clone()))
}

/// One-shot production graph. Every error aborts it.
pub fn build_graph(config: &Config) -> Node {
    sequence([
        clean(config).into(),
        parallel([
            markup(config, None).into(),
            scripts(config, Mode::Build).into(),
            fonts(config).into(),
            images(config).into(),
        ]),
        styles(config, Mode::Build).into(),
        compress(config).into(),
    ])
}

#[cfg(feature = "live")]
pub use dev::{DevPipeline, dev_graph};

#[cfg(feature = "live")]
mod dev {
    use std::sync::Arc;

    use super::*;
    use crate::error::WatchError;
    use crate::notify::{ConsoleNotifier, Notifier};
    use crate::watch::{Reload, Supervisor};

    /// The dev graph along with the supervisor its last leaf attaches.
    pub struct DevPipeline {
        pub graph: Node,
        pub supervisor: Arc<Supervisor>,
    }

    async fn run_watch(supervisor: Arc<Supervisor>) -> TaskResult {
        supervisor.attach().await?;
        Ok(())
    }

    fn watch(supervisor: Arc<Supervisor>) -> Task {
        Task::new(WATCH, move || run_watch(supervisor.clone()))
    }

    /// Build the dev graph and register the watch bindings.
    pub fn dev_graph(config: &Config) -> Result<DevPipeline, WatchError> {
        let mut supervisor = Supervisor::new(config)?;

        let notifier: Arc<dyn Notifier> =
            Arc::new(ConsoleNotifier::new().with_reloader(supervisor.reloader()));

        let markup = markup(config, Some(supervisor.reload_port()));
        // a broken stylesheet or script must not stop the watcher
        let scripts = scripts(config, Mode::Dev).recover(notifier.clone());
        let styles = styles(config, Mode::Dev).recover(notifier);
        let fonts = fonts(config);
        let images = images(config);

        let bindings = [
            (format!("{}/**/*.scss", layout::SRC_STYLES), &styles, Some(Reload::styles())),
            (String::from("**/*.html"), &markup, Some(Reload::Page)),
            (format!("{}/**/*", layout::SRC_IMAGES), &images, None),
            (format!("{}/**/*.ttf", layout::SRC_FONTS), &fonts, None),
            (format!("{}/**/*.js", layout::SRC_SCRIPTS), &scripts, Some(Reload::Page)),
        ];

        for (glob, task, reload) in bindings {
            supervisor.bind(&glob, task.clone(), reload)?;
        }

        let supervisor = Arc::new(supervisor);

        let graph = sequence([
            clean(config).into(),
            parallel([
                markup.into(),
                scripts.into(),
                fonts.into(),
                images.into(),
                vendor_css(config).into(),
                vendor_js(config).into(),
            ]),
            styles.into(),
            watch(supervisor.clone()).into(),
        ]);

        Ok(DevPipeline { graph, supervisor })
    }
}
