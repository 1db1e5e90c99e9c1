//! MarkdownV2 formatting for outgoing answers

use regex::Regex;
use std::sync::OnceLock;

/// Telegram rejects messages longer than 4096 characters
pub const MESSAGE_CHUNK_CHARS: usize = 4000;

const SPECIAL_CHARS: &str = r"_*[]()~`>#+-=|{}.!";

fn code_fence() -> &'static Regex {
    static CODE_FENCE: OnceLock<Regex> = OnceLock::new();
    CODE_FENCE.get_or_init(|| Regex::new(r"(?s)```.*?```").expect("code fence pattern is valid"))
}

/// Escape MarkdownV2 special characters everywhere except inside
/// ```fenced``` code blocks, which are passed through verbatim.
pub fn escape_markdown_v2(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut last = 0;

    for block in code_fence().find_iter(text) {
        escape_into(&text[last..block.start()], &mut out);
        out.push_str(block.as_str());
        last = block.end();
    }
    escape_into(&text[last..], &mut out);

    out
}

fn escape_into(segment: &str, out: &mut String) {
    for ch in segment.chars() {
        if SPECIAL_CHARS.contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
}

/// One outgoing MarkdownV2 message and the raw text it was made from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageChunk {
    pub formatted: String,
    pub plain: String,
}

const FENCE: &str = "```";
const FENCE_CLOSE: &str = "\n```";

enum Unit<'a> {
    /// Outside code blocks, escaped when formatted
    Text(char),
    /// Inside a code block, verbatim
    Code(char),
    /// Opening fence with its language line
    Open(&'a str),
    Close,
}

impl Unit<'_> {
    fn formatted(&self) -> String {
        match self {
            Unit::Text(ch) if SPECIAL_CHARS.contains(*ch) => format!("\\{}", ch),
            Unit::Text(ch) | Unit::Code(ch) => ch.to_string(),
            Unit::Open(header) => header.to_string(),
            Unit::Close => FENCE.to_string(),
        }
    }

    fn plain(&self) -> String {
        match self {
            Unit::Text(ch) | Unit::Code(ch) => ch.to_string(),
            Unit::Open(header) => header.to_string(),
            Unit::Close => FENCE.to_string(),
        }
    }
}

fn units(text: &str) -> Vec<Unit<'_>> {
    let mut units = Vec::with_capacity(text.len());
    let mut last = 0;

    for block in code_fence().find_iter(text) {
        units.extend(text[last..block.start()].chars().map(Unit::Text));

        let body_end = block.end() - FENCE.len();
        let header_end = block.start()
            + FENCE.len()
            + fence_header_len(&text[block.start() + FENCE.len()..body_end]);

        units.push(Unit::Open(&text[block.start()..header_end]));
        units.extend(text[header_end..body_end].chars().map(Unit::Code));
        units.push(Unit::Close);
        last = block.end();
    }
    units.extend(text[last..].chars().map(Unit::Text));

    units
}

/// Length of a `lang\n` line right after an opening fence, or 0
fn fence_header_len(body: &str) -> usize {
    let lang = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || "+-#_".contains(c)))
        .unwrap_or(body.len());

    if body[lang..].starts_with('\n') {
        lang + 1
    } else {
        0
    }
}

/// Escape `text` for MarkdownV2 and split it into messages of at most
/// `max_chars` characters.
///
/// Escape pairs are never split. A code block cut by a chunk boundary is
/// closed at the end of the chunk and reopened with its language line at
/// the start of the next one.
pub fn split_markdown_v2(text: &str, max_chars: usize) -> Vec<MessageChunk> {
    let mut chunks = Vec::new();
    let mut current = MessageChunk::default();
    let mut current_len = 0;
    let mut base_len = 0;
    let mut open: Option<&str> = None;

    for unit in units(text) {
        let formatted = unit.formatted();
        let unit_len = formatted.chars().count();

        let open_after = match unit {
            Unit::Open(_) => true,
            Unit::Close => false,
            _ => open.is_some(),
        };
        let reserve = if open_after { FENCE_CLOSE.len() } else { 0 };

        if max_chars > 0 && current_len + unit_len + reserve > max_chars && current_len > base_len {
            if open.is_some() {
                current.formatted.push_str(FENCE_CLOSE);
            }
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
            base_len = 0;

            if let Some(header) = open {
                current.formatted.push_str(header);
                current_len = header.chars().count();
                base_len = current_len;
            }
        }

        current.formatted.push_str(&formatted);
        current.plain.push_str(&unit.plain());
        current_len += unit_len;

        open = match unit {
            Unit::Open(header) => Some(header),
            Unit::Close => None,
            _ => open,
        };
    }

    if !current.formatted.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split `text` into pieces of at most `max_chars` characters
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 {
        return vec![text.to_string()];
    }

    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
