//! Vendor prefixing for compiled stylesheets.
//!
//! Works on the compressed output of the Sass compiler: the stylesheet is
//! split into segments at `{`, `}` and `;` (outside of strings, comments and
//! parentheses), and every declaration whose property is in the table gets its
//! prefixed variants inserted in front of it. Variants the block already
//! declares are not added twice.

use std::collections::HashSet;

/// Properties that still need prefixes for the supported browser range.
const PROPERTIES: &[(&str, &[&str])] = &[
    ("appearance", &["-webkit-", "-moz-"]),
    ("backdrop-filter", &["-webkit-"]),
    ("box-decoration-break", &["-webkit-"]),
    ("hyphens", &["-webkit-", "-ms-"]),
    ("mask-image", &["-webkit-"]),
    ("text-size-adjust", &["-webkit-", "-moz-"]),
    ("user-select", &["-webkit-", "-moz-"]),
];

/// Property values that need a prefixed fallback.
const VALUES: &[(&str, &str, &str)] = &[("position", "sticky", "-webkit-")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Open,
    Close,
    Semi,
    Eof,
}

impl End {
    fn as_str(self) -> &'static str {
        match self {
            End::Open => "{",
            End::Close => "}",
            End::Semi => ";",
            End::Eof => "",
        }
    }
}

struct Segment<'a> {
    text: &'a str,
    end: End,
    block: Option<usize>,
}

impl Segment<'_> {
    /// `(property, value)` when this segment is a declaration inside a block.
    fn declaration(&self) -> Option<(&str, &str)> {
        if self.end == End::Open || self.block.is_none() {
            return None;
        }

        let text = self.text.trim();
        if text.starts_with('@') {
            return None;
        }

        let (prop, value) = text.split_once(':')?;
        Some((prop.trim(), value))
    }
}

fn segments(css: &str) -> Vec<Segment<'_>> {
    let bytes = css.as_bytes();
    let mut out = Vec::new();
    let mut stack: Vec<usize> = Vec::new();
    let mut blocks = 0;
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        let end = match b {
            b'"' | b'\'' => {
                quote = Some(b);
                None
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = css[i + 2..]
                    .find("*/")
                    .map_or(bytes.len(), |j| i + 2 + j + 2);
                continue;
            }
            b'(' => {
                depth += 1;
                None
            }
            b')' => {
                depth = depth.saturating_sub(1);
                None
            }
            b'{' if depth == 0 => Some(End::Open),
            b'}' if depth == 0 => Some(End::Close),
            b';' if depth == 0 => Some(End::Semi),
            _ => None,
        };

        if let Some(end) = end {
            out.push(Segment {
                text: &css[start..i],
                end,
                block: stack.last().copied(),
            });

            match end {
                End::Open => {
                    stack.push(blocks);
                    blocks += 1;
                }
                End::Close => {
                    stack.pop();
                }
                _ => {}
            }

            start = i + 1;
        }

        i += 1;
    }

    if start < css.len() {
        out.push(Segment {
            text: &css[start..],
            end: End::Eof,
            block: stack.last().copied(),
        });
    }

    out
}

/// Insert vendor-prefixed variants for the properties in the table.
pub fn autoprefix(css: &str) -> String {
    let segments = segments(css);

    let mut present: HashSet<(usize, String)> = HashSet::new();
    for segment in &segments {
        if let (Some(block), Some((prop, value))) = (segment.block, segment.declaration()) {
            present.insert((block, prop.to_ascii_lowercase()));
            present.insert((block, declaration_key(prop, value)));
        }
    }

    let mut out = String::with_capacity(css.len() + css.len() / 8);

    for segment in &segments {
        if let (Some(block), Some((prop, value))) = (segment.block, segment.declaration()) {
            let lower = prop.to_ascii_lowercase();

            if let Some((_, prefixes)) = PROPERTIES.iter().find(|(name, _)| *name == lower) {
                for prefix in *prefixes {
                    let variant = format!("{prefix}{lower}");
                    if !present.contains(&(block, variant.clone())) {
                        out.push_str(&format!("{variant}:{value};"));
                    }
                }
            }

            let (head, tail) = match value.find('!') {
                Some(i) => value.split_at(i),
                None => (value, ""),
            };

            for (name, bare, prefix) in VALUES {
                if lower == *name && head.trim().eq_ignore_ascii_case(bare) {
                    let prefixed = format!("{prefix}{bare}{tail}");
                    if !present.contains(&(block, declaration_key(prop, &prefixed))) {
                        out.push_str(&format!("{prop}:{prefixed};"));
                    }
                }
            }
        }

        out.push_str(segment.text);
        out.push_str(segment.end.as_str());
    }

    out
}

fn declaration_key(prop: &str, value: &str) -> String {
    let mut key = prop.trim().to_ascii_lowercase();
    key.push(':');
    key.extend(value.chars().filter(|c| !c.is_whitespace()));
    key
}
