use once_cell::sync::Lazy;
use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;

use crate::studio::artifacts::sanitize_report_markup;

static EXTRA_NEWLINES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("valid newline regex"));
static ANY_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid tag regex"));
static REPORT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(/?)([a-z0-9]+)>").expect("valid report tag regex"));

pub fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Drops tags and decodes the entities `escape_html` produces.
pub fn html_to_plain(html: &str) -> String {
    ANY_TAG_RE
        .replace_all(html, "")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

fn collapse_newlines(text: &str) -> String {
    EXTRA_NEWLINES_RE
        .replace_all(text.trim(), "\n\n")
        .into_owned()
}

/// Renders assistant markdown into the HTML subset Telegram accepts.
pub fn markdown_to_telegram_html(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(markdown.len() + 32);
    // `None` for bullet lists, the next number for ordered ones.
    let mut lists: Vec<Option<u64>> = Vec::new();

    for event in Parser::new_ext(markdown, options) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading(..) | Tag::Strong => out.push_str("<b>"),
                Tag::Emphasis => out.push_str("<i>"),
                Tag::Strikethrough => out.push_str("<s>"),
                Tag::BlockQuote => out.push_str("<blockquote>"),
                Tag::CodeBlock(_) => out.push_str("<pre>"),
                Tag::Link(_, dest, _) => {
                    out.push_str(&format!("<a href=\"{}\">", escape_html(&dest)));
                }
                Tag::List(start) => lists.push(start),
                Tag::Item => {
                    let depth = lists.len().saturating_sub(1);
                    out.push_str(&"  ".repeat(depth));
                    match lists.last_mut() {
                        Some(Some(number)) => {
                            out.push_str(&format!("{number}. "));
                            *number += 1;
                        }
                        _ => out.push_str("• "),
                    }
                }
                _ => {}
            },
            Event::End(tag) => match tag {
                Tag::Paragraph => out.push_str("\n\n"),
                Tag::Heading(..) => out.push_str("</b>\n"),
                Tag::Strong => out.push_str("</b>"),
                Tag::Emphasis => out.push_str("</i>"),
                Tag::Strikethrough => out.push_str("</s>"),
                Tag::BlockQuote => out.push_str("</blockquote>\n"),
                Tag::CodeBlock(_) => out.push_str("</pre>\n"),
                Tag::Link(..) => out.push_str("</a>"),
                Tag::List(_) => {
                    lists.pop();
                    out.push('\n');
                }
                Tag::Item => {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Event::Text(text) | Event::Html(text) => out.push_str(&escape_html(&text)),
            Event::Code(code) => {
                out.push_str("<code>");
                out.push_str(&escape_html(&code));
                out.push_str("</code>");
            }
            Event::SoftBreak | Event::HardBreak | Event::Rule => out.push('\n'),
            Event::TaskListMarker(checked) => out.push_str(if checked { "[x] " } else { "[ ] " }),
            Event::FootnoteReference(_) => {}
        }
    }

    collapse_newlines(&out)
}

/// Converts the report's `<h3>/<p>/<ul>/<li>` markup into Telegram HTML.
pub fn report_to_telegram_html(markup: &str) -> String {
    let sanitized = sanitize_report_markup(markup);
    let converted = REPORT_TAG_RE.replace_all(&sanitized, |caps: &regex::Captures| {
        let closing = !caps[1].is_empty();
        match (&caps[2], closing) {
            ("h3", false) | ("strong", false) | ("b", false) => "<b>".to_string(),
            ("h3", true) => "</b>\n".to_string(),
            ("strong", true) | ("b", true) => "</b>".to_string(),
            ("em", false) | ("i", false) => "<i>".to_string(),
            ("em", true) | ("i", true) => "</i>".to_string(),
            ("li", false) => "• ".to_string(),
            ("p", true) | ("ul", true) | ("ol", true) | ("li", true) | ("br", _) => "\n".to_string(),
            _ => String::new(),
        }
    });
    collapse_newlines(&converted)
}

/// Splits `text` into chunks of at most `max_chars`, preferring paragraph and
/// line boundaries.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if current.chars().count() + line.chars().count() > max_chars && !current.is_empty() {
            chunks.push(current.trim_end().to_string());
            current.clear();
        }
        if line.chars().count() > max_chars {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(line);
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks.retain(|chunk| !chunk.trim().is_empty());
    chunks
}
