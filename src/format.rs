//! Renders feed entries into Telegram message text.
//!
//! Output is either
//!
//! ```text
//! <b>Title</b>
//!
//! Description
//!
//! https://link
//! ```
//!
//! for sources flagged `full_content` whose entry has a description, or the
//! same without the middle segment. Text is escaped for the declared
//! [`ParseMode`], so the delivery client must send with that same mode.
use serde::Deserialize;

use crate::feed::{FeedEntry, FeedSource};
use crate::util::{html_to_text, strip_control_chars, truncate_chars};

/// Bot API limit on message text length, in characters after entity parsing.
pub const MAX_MESSAGE_CHARS: usize = 4096;

const SEGMENT_SEPARATOR: &str = "\n\n";

/// Below this many characters of room the description is dropped.
const MIN_DESCRIPTION_CHARS: usize = 16;

/// Markup convention declared to the Bot API alongside each message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    #[default]
    Html,
    MarkdownV2,
}

impl ParseMode {
    /// Value of the `parse_mode` field in a `sendMessage` request.
    pub fn as_api_str(self) -> &'static str {
        match self {
            ParseMode::Html => "HTML",
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }

    /// Escapes literal text so it renders verbatim in this mode.
    pub fn escape(self, text: &str) -> String {
        match self {
            ParseMode::Html => escape_html(text),
            ParseMode::MarkdownV2 => escape_markdown_v2(text),
        }
    }

    /// Wraps already escaped text in bold markup. Empty text stays empty.
    fn bold(self, escaped: &str) -> String {
        if escaped.is_empty() {
            return String::new();
        }
        match self {
            ParseMode::Html => format!("<b>{}</b>", escaped),
            ParseMode::MarkdownV2 => format!("*{}*", escaped),
        }
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_markdown_v2(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}',
        '.', '!',
    ];
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Pure function from `(entry, source)` to message text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostFormatter {
    parse_mode: ParseMode,
}

impl PostFormatter {
    pub fn new(parse_mode: ParseMode) -> Self {
        Self { parse_mode }
    }

    pub fn parse_mode(&self) -> ParseMode {
        self.parse_mode
    }

    /// Formats one entry. Never fails: missing fields become empty segments.
    ///
    /// Lengths are measured on unescaped text, which is what the API counts.
    /// The link is never cut. The title is cut to fit beside it, and the
    /// description gets whatever room is left, or is dropped when too little
    /// remains.
    pub fn format(&self, entry: &FeedEntry, source: &FeedSource) -> String {
        let link = strip_control_chars(entry.link.trim()).into_owned();
        let link_chars = link.chars().count();

        let title = single_line(&strip_control_chars(&entry.title));
        let title_budget =
            MAX_MESSAGE_CHARS.saturating_sub(link_chars + SEGMENT_SEPARATOR.len());
        let title = truncate_chars(&title, title_budget);

        let description = if source.full_content {
            html_to_text(&entry.description)
        } else {
            String::new()
        };

        let heading = self.parse_mode.bold(&self.parse_mode.escape(&title));
        let link_segment = self.parse_mode.escape(&link);

        let fixed = title.chars().count() + link_chars + 2 * SEGMENT_SEPARATOR.len();
        let budget = MAX_MESSAGE_CHARS.saturating_sub(fixed);
        let body = truncate_chars(&description, budget);

        if budget < MIN_DESCRIPTION_CHARS || body.trim().is_empty() {
            return [heading, link_segment].join(SEGMENT_SEPARATOR);
        }

        let body = self.parse_mode.escape(&body);
        [heading, body, link_segment].join(SEGMENT_SEPARATOR)
    }
}

/// Titles are one line; feeds occasionally wrap them.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
