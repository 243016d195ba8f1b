use std::borrow::Cow;

/// Ellipsis appended to truncated text.
const ELLIPSIS: &str = "...";

/// Truncates a string to at most `max_chars` characters.
///
/// If truncation is necessary the result ends with "..." and still fits within
/// `max_chars`. Counts Unicode scalar values, so multi-byte text is never cut
/// mid-codepoint.
///
/// # Examples
///
/// ```
/// use feedcast::util::truncate_chars;
///
/// assert_eq!(truncate_chars("Short", 10), "Short");
/// assert_eq!(truncate_chars("Hello World", 8), "Hello...");
/// ```
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    if max_chars <= ELLIPSIS.len() {
        return Cow::Owned(s.chars().take(max_chars).collect());
    }

    let keep = max_chars - ELLIPSIS.len();
    let cut = s
        .char_indices()
        .nth(keep)
        .map(|(idx, _)| idx)
        .unwrap_or(s.len());
    Cow::Owned(format!("{}{}", s[..cut].trim_end(), ELLIPSIS))
}

fn is_stripped_control(c: char) -> bool {
    c.is_control() && c != '\n' && c != '\t'
}

/// Removes control characters other than newline and tab.
///
/// Carriage returns are dropped too, so `\r\n` line endings collapse to `\n`.
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_stripped_control(c)).collect())
}

/// Converts a feed description (often HTML) into plain text.
///
/// Tags are dropped, block-level breaks (`<br>`, `</p>`, `</div>`, `</li>`)
/// become newlines, common entities are decoded, runs of blank lines collapse to
/// a single blank line, and the result is trimmed.
pub fn html_to_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        match after.find('>') {
            Some(close) => {
                let tag = after[1..close].trim().to_ascii_lowercase();
                if is_line_break_tag(&tag) {
                    out.push('\n');
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unterminated '<' is literal text, not markup.
                out.push_str(after);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    let decoded = decode_entities(&out);
    let cleaned = strip_control_chars(&decoded);
    collapse_blank_lines(&cleaned)
}

fn is_line_break_tag(tag: &str) -> bool {
    let name = tag
        .trim_end_matches('/')
        .split_whitespace()
        .next()
        .unwrap_or("");
    matches!(
        name,
        "br" | "/p" | "/div" | "/li" | "/h1" | "/h2" | "/h3" | "/h4" | "/blockquote" | "/pre"
    )
}

fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp..];
        // Entities are short; anything longer is a bare ampersand.
        let decoded = after
            .char_indices()
            .take(12)
            .find(|&(_, c)| c == ';')
            .and_then(|(semi, _)| decode_entity(&after[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}

fn collapse_blank_lines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut blank_run = 0;
    for line in s.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(line.trim_start());
    }
    out
}
