//! Markdown-to-markup rendering for the final report.
//!
//! Only the small subset the research pipeline emits is recognised: headings
//! up to level five, bold, italic, links, inline and fenced code, bullet and
//! numbered lists, blockquotes, horizontal rules and paragraphs.

use console::style;
use regex::{Captures, Regex};
use std::sync::LazyLock;

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,5}) (.*)$").unwrap());

static BULLET_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-*] (.*)$").unwrap());

static NUMBERED_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\. (.*)$").unwrap());

static QUOTE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^> ?(.*)$").unwrap());

static BOLD_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").unwrap());

static ITALIC_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*(.+?)\*").unwrap());

static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]\((.*?)\)").unwrap());

static CODE_SPAN_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());

/// Turns markdown text into display markup.
pub trait MarkupRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// Block-level structure shared by the renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: usize, text: String },
    List { ordered: bool, items: Vec<String> },
    Code(String),
    Quote(String),
    Rule,
    Paragraph(String),
}

/// Split markdown into blocks. Consecutive list items of the same kind form
/// one list; an unterminated code fence runs to the end of the text.
pub fn parse_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut lines = markdown.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_end();

        if trimmed.starts_with("```") {
            flush(&mut paragraph, &mut blocks);
            let mut code = Vec::new();
            for inner in lines.by_ref() {
                if inner.trim_end().starts_with("```") {
                    break;
                }
                code.push(inner);
            }
            blocks.push(Block::Code(code.join("\n")));
            continue;
        }

        if trimmed.trim().is_empty() {
            flush(&mut paragraph, &mut blocks);
            continue;
        }

        if let Some(caps) = HEADING_REGEX.captures(trimmed) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Heading {
                level: caps[1].len(),
                text: caps[2].to_string(),
            });
        } else if trimmed == "---" {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Rule);
        } else if let Some(caps) = QUOTE_REGEX.captures(trimmed) {
            flush(&mut paragraph, &mut blocks);
            blocks.push(Block::Quote(caps[1].to_string()));
        } else if let Some((ordered, item)) = list_item(trimmed) {
            flush(&mut paragraph, &mut blocks);
            match blocks.last_mut() {
                Some(Block::List { ordered: o, items }) if *o == ordered => items.push(item),
                _ => blocks.push(Block::List {
                    ordered,
                    items: vec![item],
                }),
            }
        } else {
            paragraph.push(trimmed);
        }
    }
    flush(&mut paragraph, &mut blocks);
    blocks
}

fn flush(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if !paragraph.is_empty() {
        blocks.push(Block::Paragraph(paragraph.join("\n")));
        paragraph.clear();
    }
}

fn list_item(line: &str) -> Option<(bool, String)> {
    if let Some(caps) = BULLET_REGEX.captures(line) {
        return Some((false, caps[1].to_string()));
    }
    NUMBERED_REGEX
        .captures(line)
        .map(|caps| (true, caps[1].to_string()))
}

/// HTML output for browser-style surfaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlMarkup;

impl HtmlMarkup {
    fn inline(text: &str) -> String {
        let text = escape_html(text);
        let text = BOLD_REGEX.replace_all(&text, "<strong>${1}</strong>");
        let text = ITALIC_REGEX.replace_all(&text, "<em>${1}</em>");
        let text = LINK_REGEX.replace_all(&text, |caps: &Captures| {
            if is_safe_href(&caps[2]) {
                format!(r#"<a href="{}" target="_blank">{}</a>"#, &caps[2], &caps[1])
            } else {
                caps[1].to_string()
            }
        });
        CODE_SPAN_REGEX
            .replace_all(&text, "<code>${1}</code>")
            .into_owned()
    }
}

/// Links may point at the web, a mail address or a relative location. Any
/// other scheme (`javascript:`, `data:` and the like) is dropped.
fn is_safe_href(href: &str) -> bool {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    if ["http://", "https://", "mailto:"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    // A relative reference has no ':' before its first '/', '?' or '#'.
    match href.find([':', '/', '?', '#']) {
        Some(i) => !href[i..].starts_with(':'),
        None => true,
    }
}

impl MarkupRenderer for HtmlMarkup {
    fn render(&self, markdown: &str) -> String {
        parse_blocks(markdown)
            .into_iter()
            .map(|block| match block {
                Block::Heading { level, text } => {
                    format!("<h{level}>{}</h{level}>", Self::inline(&text))
                }
                Block::List { ordered, items } => {
                    let tag = if ordered { "ol" } else { "ul" };
                    let items: String = items
                        .iter()
                        .map(|item| format!("<li>{}</li>", Self::inline(item)))
                        .collect();
                    format!("<{tag}>{items}</{tag}>")
                }
                Block::Code(code) => format!("<pre><code>{}</code></pre>", escape_html(&code)),
                Block::Quote(text) => format!("<blockquote>{}</blockquote>", Self::inline(&text)),
                Block::Rule => "<hr>".to_string(),
                Block::Paragraph(text) => format!("<p>{}</p>", Self::inline(&text)),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// ANSI-styled output for terminals.
///
/// Styling follows `console`'s color detection, so piped output stays plain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalMarkup;

impl TerminalMarkup {
    fn inline(text: &str) -> String {
        let text = BOLD_REGEX.replace_all(text, |caps: &Captures| style(&caps[1]).bold().to_string());
        let text = ITALIC_REGEX.replace_all(&text, |caps: &Captures| style(&caps[1]).italic().to_string());
        let text = LINK_REGEX.replace_all(&text, |caps: &Captures| {
            format!("{} ({})", style(&caps[1]).underlined(), style(&caps[2]).dim())
        });
        CODE_SPAN_REGEX
            .replace_all(&text, |caps: &Captures| style(&caps[1]).yellow().to_string())
            .into_owned()
    }
}

impl MarkupRenderer for TerminalMarkup {
    fn render(&self, markdown: &str) -> String {
        parse_blocks(markdown)
            .into_iter()
            .map(|block| match block {
                Block::Heading { level, text } => {
                    let text = Self::inline(&text);
                    if level == 1 {
                        style(text).bold().cyan().underlined().to_string()
                    } else {
                        style(text).bold().cyan().to_string()
                    }
                }
                Block::List { ordered, items } => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let marker = if ordered {
                            format!("{}.", i + 1)
                        } else {
                            "•".to_string()
                        };
                        format!("  {} {}", marker, Self::inline(item))
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Block::Code(code) => code
                    .lines()
                    .map(|line| format!("    {}", style(line).dim()))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Block::Quote(text) => format!("  │ {}", style(Self::inline(&text)).italic()),
                Block::Rule => style("─".repeat(40)).dim().to_string(),
                Block::Paragraph(text) => Self::inline(&text),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
