//! HTML page assembly.
//!
//! Pages are the `*.html` files at the top of the source tree. A page can pull
//! in fragments with
//!
//! ```text
//! @include('partials/header.html', {"title": "Home"})
//! ```
//!
//! where the path is relative to the including file and the optional JSON
//! object adds parameters. Inside a fragment `@title` is replaced with the
//! parameter value; parameters are inherited by nested includes. Names that
//! are not parameters are left as they are, so `mail@example.com` survives.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use rayon::prelude::*;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use crate::error::GlobError;
use crate::io::{as_overhead, glob_files, write};
use crate::transform::blocking;
use crate::watch::client_script;

const DIRECTIVE: &str = "@include(";

/// Elements whose contents are copied without minification.
const RAW_ELEMENTS: &[&str] = &["pre", "textarea", "script", "style"];

type Params = Map<String, Value>;

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("Couldn't read '{path}'.\n{source}")]
    Io {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("{file}:{line}: {message}")]
    Syntax {
        file: Utf8PathBuf,
        line: usize,
        message: String,
    },

    #[error("{file}: include parameters are not a JSON object.\n{source}")]
    Json {
        file: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("Include cycle: {0}")]
    Cycle(String),

    #[error(transparent)]
    Glob(#[from] GlobError),

    #[error("Worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

struct Include<'a> {
    path: &'a str,
    params: Option<&'a str>,
}

fn line_at(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

fn skip_ws(text: &str, i: usize) -> usize {
    text[i..]
        .find(|c: char| !c.is_whitespace())
        .map_or(text.len(), |j| i + j)
}

/// Parse the arguments of a directive starting right after `@include(`.
/// Returns the directive and the offset just past its closing parenthesis.
fn parse_include(text: &str, at: usize) -> Result<(Include<'_>, usize), String> {
    let bytes = text.as_bytes();
    let mut i = skip_ws(text, at);

    let quote = match bytes.get(i) {
        Some(q @ (b'\'' | b'"')) => *q,
        _ => return Err(String::from("expected a quoted path")),
    };

    let path_start = i + 1;
    let path_end = text[path_start..]
        .find(quote as char)
        .map(|j| path_start + j)
        .ok_or("unterminated path")?;

    let path = &text[path_start..path_end];
    if path.is_empty() {
        return Err(String::from("empty include path"));
    }

    i = skip_ws(text, path_end + 1);

    let mut params = None;
    if bytes.get(i) == Some(&b',') {
        i = skip_ws(text, i + 1);
        if bytes.get(i) != Some(&b'{') {
            return Err(String::from("expected a JSON object after the path"));
        }

        let start = i;
        let mut depth = 0usize;
        let mut in_string = false;

        while i < bytes.len() {
            match bytes[i] {
                b'\\' if in_string => i += 1,
                b'"' => in_string = !in_string,
                b'{' if !in_string => depth += 1,
                b'}' if !in_string => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                _ => {}
            }
            i += 1;
        }

        if i >= bytes.len() {
            return Err(String::from("unterminated parameter object"));
        }

        params = Some(&text[start..=i]);
        i = skip_ws(text, i + 1);
    }

    if bytes.get(i) != Some(&b')') {
        return Err(String::from("expected `)`"));
    }

    Ok((Include { path, params }, i + 1))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace `@name` with the value of parameter `name`.
fn substitute(text: &str, params: &Params) -> String {
    if params.is_empty() {
        return text.to_owned();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(i) = rest.find('@') {
        out.push_str(&rest[..i]);
        let after = &rest[i + 1..];
        let len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());

        match params.get(&after[..len]) {
            Some(value) if len > 0 => {
                out.push_str(&render(value));
                rest = &after[len..];
            }
            _ => {
                out.push('@');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn expand(
    file: &Utf8Path,
    text: &str,
    params: &Params,
    stack: &mut Vec<PathBuf>,
) -> Result<String, MarkupError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = 0;

    while let Some(found) = text[rest..].find(DIRECTIVE) {
        let start = rest + found;
        out.push_str(&substitute(&text[rest..start], params));

        let (include, end) =
            parse_include(text, start + DIRECTIVE.len()).map_err(|message| MarkupError::Syntax {
                file: file.to_owned(),
                line: line_at(text, start),
                message,
            })?;

        let mut inner = params.clone();
        if let Some(json) = include.params {
            let extra: Params = serde_json::from_str(json).map_err(|source| MarkupError::Json {
                file: file.to_owned(),
                source,
            })?;
            inner.extend(extra);
        }

        let target = file.parent().unwrap_or(Utf8Path::new("")).join(include.path);
        out.push_str(&assemble_file(&target, &inner, stack)?);

        rest = end;
    }

    out.push_str(&substitute(&text[rest..], params));
    Ok(out)
}

fn assemble_file(
    file: &Utf8Path,
    params: &Params,
    stack: &mut Vec<PathBuf>,
) -> Result<String, MarkupError> {
    let io_error = |source| MarkupError::Io {
        path: file.to_owned(),
        source,
    };

    let canonical = fs::canonicalize(file).map_err(io_error)?;

    if let Some(i) = stack.iter().position(|seen| *seen == canonical) {
        let chain = stack[i..]
            .iter()
            .chain(std::iter::once(&canonical))
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(MarkupError::Cycle(chain));
    }

    let text = fs::read_to_string(file).map_err(io_error)?;

    stack.push(canonical);
    let out = expand(file, &text, params, stack)?;
    stack.pop();

    Ok(out)
}

/// Resolve every include of a page.
pub fn assemble(page: &Utf8Path) -> Result<String, MarkupError> {
    assemble_file(page, &Params::new(), &mut Vec::new())
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

fn find_ignore_case(text: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    text.as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

/// Name of the raw element opened at the start of `text`, if any.
fn raw_element(text: &str) -> Option<&'static str> {
    let tag = text.strip_prefix('<')?;

    RAW_ELEMENTS.iter().copied().find(|name| {
        starts_with_ignore_case(tag, name)
            && tag[name.len()..]
                .chars()
                .next()
                .is_some_and(|c| c == '>' || c == '/' || c.is_ascii_whitespace())
    })
}

/// Minify an HTML document.
///
/// Comments are removed except conditional ones, whitespace runs collapse to
/// one space, and a whitespace run that spans a line break between two tags is
/// dropped entirely. Contents of `pre`, `textarea`, `script` and `style` and
/// quoted attribute values are copied untouched.
pub fn minify_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut i = 0;

    while i < html.len() {
        let rest = &html[i..];

        if rest.starts_with("<!--") {
            let end = rest.find("-->").map_or(rest.len(), |j| j + 3);
            if rest.starts_with("<!--[if") || rest.starts_with("<!--<![endif]") {
                out.push_str(&rest[..end]);
            }
            i += end;
            continue;
        }

        if let Some(name) = raw_element(rest) {
            let end = find_ignore_case(rest, &format!("</{name}"))
                .and_then(|close| rest[close..].find('>').map(|j| close + j + 1))
                .unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            i += end;
            continue;
        }

        let Some(c) = rest.chars().next() else {
            break;
        };

        if in_tag && (c == '"' || c == '\'') {
            let end = rest[1..].find(c).map_or(rest.len(), |j| j + 2);
            out.push_str(&rest[..end]);
            i += end;
            continue;
        }

        match c {
            '<' => in_tag = rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()),
            '>' => in_tag = false,
            _ => {}
        }

        if c.is_ascii_whitespace() {
            let len = rest
                .find(|c: char| !c.is_ascii_whitespace())
                .unwrap_or(rest.len());
            let run = &rest[..len];
            let next = rest[len..].chars().next();

            let between_tags = out.ends_with('>') && next == Some('<');
            let edge = out.is_empty() || next.is_none();

            if !(edge || between_tags && run.contains('\n')) {
                out.push(' ');
            }

            i += len;
            continue;
        }

        out.push(c);
        i += c.len_utf8();
    }

    out
}

/// Add the live-reload client right before `</body>`, or at the end when the
/// page has no body tag.
pub fn inject_client(html: &str, port: u16) -> String {
    let script = client_script(port);

    match html
        .as_bytes()
        .windows(7)
        .rposition(|window| window.eq_ignore_ascii_case(b"</body>"))
    {
        Some(i) => format!("{}{script}{}", &html[..i], &html[i..]),
        None => format!("{html}{script}"),
    }
}

/// Assemble and minify every page under `src` into `out`. When
/// `live_reload` is set the client script for that port is added to each
/// page. Nothing is written unless every page assembles.
pub fn build(src: &Utf8Path, out: &Utf8Path, live_reload: Option<u16>) -> Result<Vec<Utf8PathBuf>, MarkupError> {
    let s = Instant::now();
    let pages = glob_files(src, "*.html")?;

    let built = pages
        .par_iter()
        .map(|page| -> Result<_, MarkupError> {
            let mut html = minify_html(&assemble(page)?);
            if let Some(port) = live_reload {
                html = inject_client(&html, port);
            }

            let path = out.join(page.file_name().unwrap_or("index.html"));
            Ok((path, html))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for (path, html) in &built {
        write(path, html).map_err(|source| MarkupError::Io {
            path: path.clone(),
            source,
        })?;
    }

    info!("assembled {} pages {}", built.len(), as_overhead(s));

    Ok(built.into_iter().map(|(path, _)| path).collect())
}

pub async fn build_markup(
    src: Utf8PathBuf,
    out: Utf8PathBuf,
    live_reload: Option<u16>,
) -> Result<Vec<Utf8PathBuf>, MarkupError> {
    blocking(move || build(&src, &out, live_reload)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tmp;

    #[test]
    fn test_nested_includes_with_params() {
        let (_guard, root) = tmp();
        write(
            &root.join("index.html"),
            "<html><body>\n  @include('partials/header.html', {\"title\": \"Home\", \"n\": 2})\n</body></html>\n",
        )
        .unwrap();
        write(
            &root.join("partials/header.html"),
            "<h1>@title</h1>@include(\"nav.html\")",
        )
        .unwrap();
        write(&root.join("partials/nav.html"), "<nav>@title @n</nav>").unwrap();

        let html = minify_html(&assemble(&root.join("index.html")).unwrap());
        assert_eq!(html, "<html><body><h1>Home</h1><nav>Home 2</nav></body></html>");
    }

    #[test]
    fn test_params_only_in_included_files() {
        let (_guard, root) = tmp();
        write(&root.join("index.html"), "@title <a>mail@example.com</a>@include('a.html', {\"x\": 1})").unwrap();
        write(&root.join("a.html"), "@x@y").unwrap();

        assert_eq!(
            assemble(&root.join("index.html")).unwrap(),
            "@title <a>mail@example.com</a>1@y"
        );
    }

    #[test]
    fn test_include_cycle() {
        let (_guard, root) = tmp();
        write(&root.join("a.html"), "@include('b.html')").unwrap();
        write(&root.join("b.html"), "@include('a.html')").unwrap();

        let err = assemble(&root.join("a.html")).unwrap_err();
        assert!(matches!(err, MarkupError::Cycle(_)));
    }

    #[test]
    fn test_syntax_error_line() {
        let (_guard, root) = tmp();
        write(&root.join("a.html"), "<p>\n</p>\n@include(partials/x.html)").unwrap();

        match assemble(&root.join("a.html")) {
            Err(MarkupError::Syntax { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_include() {
        let (_guard, root) = tmp();
        write(&root.join("a.html"), "@include('nope.html')").unwrap();

        match assemble(&root.join("a.html")) {
            Err(MarkupError::Io { path, .. }) => assert_eq!(path, root.join("nope.html")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_minify_comments() {
        assert_eq!(
            minify_html("<p>a</p>\n<!-- note -->\n<!--[if IE]><p>old</p><![endif]-->"),
            "<p>a</p><!--[if IE]><p>old</p><![endif]-->"
        );
    }

    #[test]
    fn test_minify_whitespace() {
        assert_eq!(
            minify_html("  <p>a   b\n c</p> <b>x</b>\n\n"),
            "<p>a b c</p> <b>x</b>"
        );
    }

    #[test]
    fn test_minify_keeps_attribute_values() {
        assert_eq!(
            minify_html("<p title=\"a   b\"  class='x\n  y'>it's   here</p>"),
            "<p title=\"a   b\" class='x\n  y'>it's here</p>"
        );
    }

    #[test]
    fn test_minify_raw_elements() {
        let html = "<div>\n  <pre>  a\n   b</pre>\n  <SCRIPT>if (a  <  b) {}\n</SCRIPT>\n</div>";
        assert_eq!(
            minify_html(html),
            "<div><pre>  a\n   b</pre><SCRIPT>if (a  <  b) {}\n</SCRIPT></div>"
        );
        // prefix of a raw element name is not a raw element
        assert_eq!(minify_html("<prefix>a   b</prefix>"), "<prefix>a b</prefix>");
    }

    #[test]
    fn test_inject_client() {
        let html = inject_client("<body><p></p></BODY>", 1337);
        assert!(html.starts_with("<body><p></p><script>"));
        assert!(html.ends_with("</script></BODY>"));

        let html = inject_client("<p></p>", 1337);
        assert!(html.ends_with("</script>"));
    }

    #[tokio::test]
    async fn test_build_markup_pages_only() {
        let (_guard, root) = tmp();
        let src = root.join("src");
        let out = root.join("app");
        write(&src.join("index.html"), "<body>\n@include('partials/a.html')\n</body>").unwrap();
        write(&src.join("about.html"), "<p>about</p>").unwrap();
        write(&src.join("partials/a.html"), "<p>a</p>").unwrap();

        let mut built = build_markup(src, out.clone(), None).await.unwrap();
        built.sort();

        assert_eq!(built, vec![out.join("about.html"), out.join("index.html")]);
        assert_eq!(
            fs::read_to_string(out.join("index.html")).unwrap(),
            "<body><p>a</p></body>"
        );
        assert!(!out.join("partials").exists());
    }
}
