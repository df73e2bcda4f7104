//! Style checks for SCSS sources, reported in dev mode only.

use std::collections::HashSet;
use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};

pub const RULE_IMPORTANT: &str = "declaration-no-important";
pub const RULE_EMPTY_BLOCK: &str = "block-no-empty";
pub const RULE_DUPLICATE: &str = "declaration-block-no-duplicate-properties";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub file: Utf8PathBuf,
    pub line: usize,
    pub rule: &'static str,
    pub message: String,
}

impl Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} {} ({})", self.file, self.line, self.message, self.rule)
    }
}

#[derive(Default)]
struct Block {
    line: usize,
    props: HashSet<String>,
    content: bool,
}

struct Scanner<'a> {
    file: &'a Utf8Path,
    text: &'a str,
    lines: Vec<usize>,
    blocks: Vec<Block>,
    findings: Vec<Finding>,
}

impl<'a> Scanner<'a> {
    fn new(file: &'a Utf8Path, text: &'a str) -> Self {
        let lines = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();

        Self {
            file,
            text,
            lines,
            blocks: Vec::new(),
            findings: Vec::new(),
        }
    }

    fn line_at(&self, offset: usize) -> usize {
        self.lines.partition_point(|&start| start <= offset)
    }

    fn report(&mut self, offset: usize, rule: &'static str, message: String) {
        self.findings.push(Finding {
            file: self.file.to_owned(),
            line: self.line_at(offset),
            rule,
            message,
        });
    }

    fn mark_content(&mut self) {
        if let Some(block) = self.blocks.last_mut() {
            block.content = true;
        }
    }

    /// Handle the source between `start` and a statement terminator.
    fn statement(&mut self, start: usize, end: usize) {
        let raw = &self.text[start..end];
        let trimmed = raw.trim_start();
        if trimmed.trim_end().is_empty() {
            return;
        }

        let offset = start + (raw.len() - trimmed.len());
        let text = trimmed.trim_end();
        self.mark_content();

        if text.starts_with('$') || text.starts_with('@') || self.blocks.is_empty() {
            return;
        }

        let Some((prop, value)) = text.split_once(':') else {
            return;
        };

        let prop = prop.trim();
        if prop.is_empty() || prop.contains("#{") || prop.contains(char::is_whitespace) {
            return;
        }

        if value.to_ascii_lowercase().contains("!important") {
            self.report(
                offset,
                RULE_IMPORTANT,
                format!("Unexpected !important on \"{prop}\""),
            );
        }

        let key = prop.to_ascii_lowercase();
        let duplicate = self
            .blocks
            .last_mut()
            .is_some_and(|block| !block.props.insert(key));

        if duplicate {
            self.report(
                offset,
                RULE_DUPLICATE,
                format!("Unexpected duplicate \"{prop}\""),
            );
        }
    }

    fn run(mut self) -> Vec<Finding> {
        let bytes = self.text.as_bytes();
        let mut start = 0;
        let mut depth = 0usize;
        let mut i = 0;

        while i < bytes.len() {
            match bytes[i] {
                q @ (b'"' | b'\'') => {
                    i += 1;
                    while i < bytes.len() && bytes[i] != q {
                        if bytes[i] == b'\\' {
                            i += 1;
                        }
                        i += 1;
                    }
                }
                b'/' if bytes.get(i + 1) == Some(&b'*') => {
                    self.mark_content();
                    i = self.text[i + 2..]
                        .find("*/")
                        .map_or(bytes.len(), |j| i + 2 + j + 1);
                }
                b'/' if depth == 0 && bytes.get(i + 1) == Some(&b'/') => {
                    self.mark_content();
                    i = self.text[i..].find('\n').map_or(bytes.len(), |j| i + j);
                }
                b'#' if bytes.get(i + 1) == Some(&b'{') => {
                    let mut nested = 0usize;
                    i += 1;
                    while i < bytes.len() {
                        match bytes[i] {
                            b'{' => nested += 1,
                            b'}' => {
                                nested -= 1;
                                if nested == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        i += 1;
                    }
                }
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b'{' => {
                    self.mark_content();
                    self.blocks.push(Block {
                        line: self.line_at(i),
                        ..Block::default()
                    });
                    start = i + 1;
                }
                b';' if depth == 0 => {
                    self.statement(start, i);
                    start = i + 1;
                }
                b'}' => {
                    self.statement(start, i);
                    if let Some(block) = self.blocks.pop()
                        && !block.content
                    {
                        self.findings.push(Finding {
                            file: self.file.to_owned(),
                            line: block.line,
                            rule: RULE_EMPTY_BLOCK,
                            message: String::from("Unexpected empty block"),
                        });
                    }
                    start = i + 1;
                }
                _ => {}
            }

            i += 1;
        }

        self.findings.sort_by_key(|finding| finding.line);
        self.findings
    }
}

/// Check a single SCSS source.
pub fn lint(file: &Utf8Path, text: &str) -> Vec<Finding> {
    Scanner::new(file, text).run()
}
