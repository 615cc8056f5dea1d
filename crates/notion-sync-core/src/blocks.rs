//! Markdown to Notion block conversion.
//!
//! Supports the subset of markdown notes are mostly written in:
//! - Headings: `#`, `##`, `###` (deeper levels collapse to heading 3)
//! - Paragraphs (consecutive lines are joined)
//! - Bulleted (`-`, `*`, `+`), numbered (`1.`) and to-do (`- [ ]`) items
//! - Quotes (`>`), dividers (`---`, `***`), fenced code with a language
//! - Inline `**bold**`, `*italic*`, `~~strike~~`, `` `code` `` and `[text](url)`
//!
//! Conversion is a pure function of the input text.

use serde::Serialize;

/// Longest `text.content` Notion accepts in one rich text object.
pub const MAX_RICH_TEXT_LEN: usize = 2000;

/// A single content block, serialized in Notion's wire shape:
/// `{"object": "block", "type": "paragraph", "paragraph": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    object: &'static str,
    #[serde(flatten)]
    pub content: BlockContent,
}

impl Block {
    pub fn new(content: BlockContent) -> Self {
        Self {
            object: "block",
            content,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    Paragraph { paragraph: TextBlock },
    #[serde(rename = "heading_1")]
    Heading1 { heading_1: TextBlock },
    #[serde(rename = "heading_2")]
    Heading2 { heading_2: TextBlock },
    #[serde(rename = "heading_3")]
    Heading3 { heading_3: TextBlock },
    BulletedListItem { bulleted_list_item: TextBlock },
    NumberedListItem { numbered_list_item: TextBlock },
    ToDo { to_do: ToDoBlock },
    Quote { quote: TextBlock },
    Code { code: CodeBlock },
    Divider { divider: Empty },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    pub rich_text: Vec<RichText>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToDoBlock {
    pub rich_text: Vec<RichText>,
    pub checked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CodeBlock {
    pub rich_text: Vec<RichText>,
    pub language: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Empty {}

/// One run of uniformly styled text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RichText {
    #[serde(rename = "type")]
    kind: &'static str,
    pub text: TextContent,
    #[serde(skip_serializing_if = "Annotations::is_plain")]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextContent {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Link {
    pub url: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Annotations {
    pub bold: bool,
    pub italic: bool,
    pub strikethrough: bool,
    pub code: bool,
}

impl Annotations {
    fn is_plain(&self) -> bool {
        *self == Self::default()
    }
}

impl RichText {
    pub fn plain(content: &str) -> Self {
        Self::styled(content, Annotations::default(), None)
    }

    fn styled(content: &str, annotations: Annotations, link: Option<&str>) -> Self {
        Self {
            kind: "text",
            text: TextContent {
                content: content.to_string(),
                link: link.map(|url| Link {
                    url: url.to_string(),
                }),
            },
            annotations,
        }
    }
}

/// Convert markdown text into an ordered list of blocks.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph: Vec<&str> = Vec::new();
    let mut lines = markdown.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            flush_paragraph(&mut paragraph, &mut blocks);
            continue;
        }

        if let Some(fence) = trimmed.strip_prefix("```") {
            flush_paragraph(&mut paragraph, &mut blocks);
            let language = fence.trim();
            let mut code = Vec::new();
            for code_line in lines.by_ref() {
                if code_line.trim_start().starts_with("```") {
                    break;
                }
                code.push(code_line);
            }
            blocks.push(Block::new(BlockContent::Code {
                code: CodeBlock {
                    rich_text: split_rich_text(&code.join("\n"), Annotations::default(), None),
                    language: code_language(language),
                },
            }));
            continue;
        }

        if let Some(block) = line_block(trimmed) {
            flush_paragraph(&mut paragraph, &mut blocks);
            blocks.push(block);
            continue;
        }

        paragraph.push(trimmed);
    }

    flush_paragraph(&mut paragraph, &mut blocks);
    blocks
}

fn flush_paragraph(paragraph: &mut Vec<&str>, blocks: &mut Vec<Block>) {
    if paragraph.is_empty() {
        return;
    }
    let text = paragraph.join("\n");
    paragraph.clear();
    blocks.push(Block::new(BlockContent::Paragraph {
        paragraph: text_block(&text),
    }));
}

/// Single-line block syntax, or None for paragraph text.
fn line_block(line: &str) -> Option<Block> {
    if is_divider(line) {
        return Some(Block::new(BlockContent::Divider { divider: Empty {} }));
    }

    if line.starts_with('#') {
        let level = line.chars().take_while(|&c| c == '#').count();
        if let Some(text) = line[level..].strip_prefix(' ') {
            let text = text_block(text.trim());
            return Some(Block::new(match level {
                1 => BlockContent::Heading1 { heading_1: text },
                2 => BlockContent::Heading2 { heading_2: text },
                _ => BlockContent::Heading3 { heading_3: text },
            }));
        }
    }

    if let Some(text) = line.strip_prefix('>') {
        return Some(Block::new(BlockContent::Quote {
            quote: text_block(text.trim_start()),
        }));
    }

    if let Some(item) = ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
    {
        for (marker, checked) in [("[ ] ", false), ("[x] ", true), ("[X] ", true)] {
            if let Some(task) = item.strip_prefix(marker) {
                return Some(Block::new(BlockContent::ToDo {
                    to_do: ToDoBlock {
                        rich_text: parse_inline(task),
                        checked,
                    },
                }));
            }
        }
        return Some(Block::new(BlockContent::BulletedListItem {
            bulleted_list_item: text_block(item),
        }));
    }

    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(item) = line[digits..]
            .strip_prefix(". ")
            .or_else(|| line[digits..].strip_prefix(") "))
        {
            return Some(Block::new(BlockContent::NumberedListItem {
                numbered_list_item: text_block(item),
            }));
        }
    }

    None
}

fn is_divider(line: &str) -> bool {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    compact.len() >= 3
        && (compact.chars().all(|c| c == '-')
            || compact.chars().all(|c| c == '*')
            || compact.chars().all(|c| c == '_'))
}

fn text_block(text: &str) -> TextBlock {
    TextBlock {
        rich_text: parse_inline(text),
    }
}

/// Map a fence info string onto a language Notion knows.
fn code_language(info: &str) -> String {
    let lang = info
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match lang.as_str() {
        "" | "text" | "txt" => "plain text".to_string(),
        "sh" | "zsh" => "shell".to_string(),
        "js" => "javascript".to_string(),
        "ts" => "typescript".to_string(),
        "py" => "python".to_string(),
        "rs" => "rust".to_string(),
        "yml" => "yaml".to_string(),
        "md" => "markdown".to_string(),
        _ => lang,
    }
}

/// Parse inline markup into styled runs.
pub fn parse_inline(text: &str) -> Vec<RichText> {
    let mut runs = Vec::new();
    let mut plain = String::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some((run, consumed)) = styled_run(rest) {
            if !plain.is_empty() {
                runs.extend(split_rich_text(&plain, Annotations::default(), None));
                plain.clear();
            }
            runs.extend(run);
            rest = &rest[consumed..];
            continue;
        }

        let Some(c) = rest.chars().next() else {
            break;
        };
        plain.push(c);
        rest = &rest[c.len_utf8()..];
    }

    if !plain.is_empty() {
        runs.extend(split_rich_text(&plain, Annotations::default(), None));
    }
    runs
}

/// Try to read one styled run at the start of `s`.
///
/// Returns the runs and the number of bytes consumed.
fn styled_run(s: &str) -> Option<(Vec<RichText>, usize)> {
    if let Some(inner) = s.strip_prefix('`') {
        let end = inner.find('`')?;
        let code = Annotations {
            code: true,
            ..Annotations::default()
        };
        return Some((split_rich_text(&inner[..end], code, None), end + 2));
    }

    if let Some(inner) = s.strip_prefix('[') {
        let close = inner.find("](")?;
        let after = &inner[close + 2..];
        let url_end = after.find(')')?;
        let label = &inner[..close];
        let url = &after[..url_end];
        if label.is_empty() || url.is_empty() {
            return None;
        }
        return Some((
            split_rich_text(label, Annotations::default(), Some(url)),
            1 + close + 2 + url_end + 1,
        ));
    }

    for (marker, style) in [("**", "bold"), ("~~", "strike")] {
        if let Some(inner) = s.strip_prefix(marker) {
            let end = inner.find(marker)?;
            if end == 0 {
                return None;
            }
            let mut annotations = Annotations::default();
            match style {
                "bold" => annotations.bold = true,
                _ => annotations.strikethrough = true,
            }
            return Some((
                restyle(parse_inline(&inner[..end]), annotations),
                end + marker.len() * 2,
            ));
        }
    }

    // Underscores are left alone so snake_case survives
    if let Some(inner) = s.strip_prefix('*') {
        let end = inner.find('*')?;
        if end == 0 || inner.starts_with(' ') {
            return None;
        }
        let italic = Annotations {
            italic: true,
            ..Annotations::default()
        };
        return Some((restyle(parse_inline(&inner[..end]), italic), end + 2));
    }

    None
}

/// Layer outer styling onto already-parsed runs.
fn restyle(mut runs: Vec<RichText>, outer: Annotations) -> Vec<RichText> {
    for run in &mut runs {
        run.annotations.bold |= outer.bold;
        run.annotations.italic |= outer.italic;
        run.annotations.strikethrough |= outer.strikethrough;
        run.annotations.code |= outer.code;
    }
    runs
}

/// Break text into rich text objects within Notion's per-object limit.
fn split_rich_text(text: &str, annotations: Annotations, link: Option<&str>) -> Vec<RichText> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut runs = Vec::new();
    let mut current = String::new();
    let mut count = 0;
    for c in text.chars() {
        if count == MAX_RICH_TEXT_LEN {
            runs.push(RichText::styled(&current, annotations, link));
            current.clear();
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    runs.push(RichText::styled(&current, annotations, link));
    runs
}
