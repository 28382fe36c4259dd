//! Block-level document model and deterministic formatter.
//!
//! [`Document::parse`] reads repaired text with pulldown-cmark and keeps the
//! block tree. [`Document::render`] writes that tree back in one fixed style.
//! Inline text is copied from the source span of each leaf, so escapes, links
//! and code spans survive byte for byte apart from whitespace.
//!
//! Rendering choices:
//!
//! - headings are ATX, thematic breaks are `___`
//! - lists are tight, keep their bullet or delimiter, and are renumbered
//! - code blocks are fenced; a code block inside a list item is lifted out
//!   of the list so its fence lines start at column 0
//! - tables get outer pipes and a normalized delimiter row
//! - blocks are separated by exactly one blank line

use std::ops::Range;

use pulldown_cmark::{
    Alignment, CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd,
};

use super::fence::{parse_fence_line, split_info};
use super::normalize;

const INLINE_WS: [char; 2] = [' ', '\t'];
const THEMATIC_BREAK: &str = "___";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading {
        level: u8,
        text: String,
    },
    Paragraph {
        lines: Vec<String>,
    },
    CodeBlock {
        info: String,
        body: Vec<String>,
    },
    List {
        marker: ListMarker,
        items: Vec<Vec<Block>>,
    },
    Quote {
        blocks: Vec<Block>,
    },
    Table {
        alignments: Vec<Align>,
        head: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Html {
        lines: Vec<String>,
    },
    /// Link reference definitions. The parser consumes them without emitting
    /// an event, so they are recovered from the text between blocks.
    Definitions {
        lines: Vec<String>,
    },
    ThematicBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMarker {
    Bullet(char),
    Ordered { start: u64, delimiter: char },
}

impl ListMarker {
    /// Read the marker of a list whose first item starts at `source`.
    fn detect(source: &str, start: Option<u64>) -> Self {
        let marker = source.trim_start_matches(|c: char| c == ' ' || c == '\t' || c == '>');
        match start {
            Some(start) => {
                let delimiter = marker
                    .trim_start_matches(|c: char| c.is_ascii_digit())
                    .chars()
                    .next()
                    .filter(|c| *c == ')')
                    .unwrap_or('.');
                ListMarker::Ordered { start, delimiter }
            }
            None => ListMarker::Bullet(
                marker
                    .chars()
                    .next()
                    .filter(|c| matches!(c, '-' | '+' | '*'))
                    .unwrap_or('-'),
            ),
        }
    }

    fn label(&self, index: usize) -> String {
        match self {
            ListMarker::Bullet(c) => c.to_string(),
            ListMarker::Ordered { start, delimiter } => {
                format!("{}{delimiter}", start.saturating_add(index as u64))
            }
        }
    }

    fn advance(&mut self, items: usize) {
        if let ListMarker::Ordered { start, .. } = self {
            *start = start.saturating_add(items as u64);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    None,
    Left,
    Center,
    Right,
}

impl Align {
    fn delimiter(self) -> &'static str {
        match self {
            Align::None => "---",
            Align::Left => ":---",
            Align::Center => ":---:",
            Align::Right => "---:",
        }
    }
}

impl From<Alignment> for Align {
    fn from(alignment: Alignment) -> Self {
        match alignment {
            Alignment::None => Align::None,
            Alignment::Left => Align::Left,
            Alignment::Center => Align::Center,
            Alignment::Right => Align::Right,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let mut builder = Builder::new(text);
        for (event, range) in Parser::new_ext(text, parser_options()).into_offset_iter() {
            builder.event(event, range);
        }
        Document {
            blocks: hoist_code(builder.finish()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Render in canonical style. Non-empty output ends with one `\n`.
    pub fn render(&self) -> String {
        let lines = render_blocks(&self.blocks);
        if lines.is_empty() {
            return String::new();
        }
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS
}

// ---------------------------------------------------------------------------
// Tree building
// ---------------------------------------------------------------------------

/// Byte range covered by the inline events of one leaf block.
#[derive(Debug, Clone, Copy, Default)]
struct Span(Option<(usize, usize)>);

impl Span {
    fn cover(&mut self, range: &Range<usize>) {
        self.0 = Some(match self.0 {
            Some((lo, hi)) => (lo.min(range.start), hi.max(range.end)),
            None => (range.start, range.end),
        });
    }

    fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Source lines of the span with container prefixes removed and inline
    /// whitespace collapsed.
    fn lines(self, source: &str, quote_depth: usize) -> Vec<String> {
        let Some((mut lo, hi)) = self.0 else {
            return Vec::new();
        };
        // An escaped first character starts one byte after its backslash.
        if lo > 0 && source.as_bytes()[lo - 1] == b'\\' {
            lo -= 1;
        }
        source[lo..hi]
            .split('\n')
            .enumerate()
            .map(|(i, line)| {
                let line = if i == 0 {
                    line
                } else {
                    strip_quote_markers(line, quote_depth)
                };
                collapse_inline(line)
            })
            .filter(|line| !line.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Root,
    Quote,
    Item,
}

/// A block that holds other blocks: the document, a quote or a list item.
#[derive(Debug)]
struct Container {
    kind: ContainerKind,
    blocks: Vec<Block>,
    /// End of the last child; text between here and the next child has not
    /// produced any event yet.
    cursor: usize,
    end: usize,
    leading: bool,
    /// Inline events sitting directly in a tight list item.
    bare: Span,
}

impl Container {
    fn new(kind: ContainerKind, range: Range<usize>) -> Self {
        Container {
            kind,
            blocks: Vec::new(),
            cursor: range.start,
            end: range.end,
            leading: true,
            bare: Span::default(),
        }
    }

    /// Keep link reference definitions found between `cursor` and `to`.
    fn gap(&mut self, source: &str, to: usize, quote_depth: usize) {
        if to > self.cursor {
            let item_marker = self.leading && self.kind == ContainerKind::Item;
            let lines = definition_lines(&source[self.cursor..to], quote_depth, item_marker);
            if !lines.is_empty() {
                self.blocks.push(Block::Definitions { lines });
            }
            self.cursor = to;
        }
        self.leading = false;
    }

    /// Turn pending tight-item text into a paragraph.
    fn flush(&mut self, source: &str, quote_depth: usize) {
        let span = std::mem::take(&mut self.bare);
        if let Some((_, hi)) = span.0 {
            let lines = span.lines(source, quote_depth);
            if !lines.is_empty() {
                self.blocks.push(Block::Paragraph { lines });
            }
            self.cursor = self.cursor.max(hi);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LeafKind {
    Paragraph,
    Heading(u8),
    Cell,
}

#[derive(Debug)]
enum Frame {
    Container(Container),
    List {
        marker: ListMarker,
        items: Vec<Vec<Block>>,
    },
    Leaf {
        kind: LeafKind,
        span: Span,
    },
    Code {
        info: String,
        body: String,
    },
    Html {
        body: String,
    },
    Table {
        alignments: Vec<Align>,
        head: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Row {
        cells: Vec<String>,
    },
    /// Content the formatter does not model; its events are dropped.
    Skip,
}

struct Builder<'s> {
    source: &'s str,
    stack: Vec<Frame>,
}

impl<'s> Builder<'s> {
    fn new(source: &'s str) -> Self {
        Builder {
            source,
            stack: vec![Frame::Container(Container::new(
                ContainerKind::Root,
                0..source.len(),
            ))],
        }
    }

    fn quote_depth(&self) -> usize {
        self.stack
            .iter()
            .filter(|frame| {
                matches!(frame, Frame::Container(c) if c.kind == ContainerKind::Quote)
            })
            .count()
    }

    fn event(&mut self, event: Event<'_>, range: Range<usize>) {
        if matches!(self.stack.last(), Some(Frame::Skip)) {
            match event {
                Event::Start(_) => self.stack.push(Frame::Skip),
                Event::End(_) => {
                    self.stack.pop();
                    self.advance(range.end);
                }
                _ => {}
            }
            return;
        }

        match event {
            Event::Start(tag) => self.start(tag, range),
            Event::End(end) => self.end(end, range),
            Event::Text(text) => match self.stack.last_mut() {
                Some(Frame::Code { body, .. }) => body.push_str(&text),
                _ => self.cover(&range),
            },
            Event::Html(html) => match self.stack.last_mut() {
                Some(Frame::Html { body }) => body.push_str(&html),
                _ => self.cover(&range),
            },
            Event::Rule => {
                self.open_block(range.start);
                self.attach(Block::ThematicBreak, range.end);
            }
            _ => self.cover(&range),
        }
    }

    fn start(&mut self, tag: Tag<'_>, range: Range<usize>) {
        let frame = match tag {
            Tag::Emphasis | Tag::Strong | Tag::Strikethrough | Tag::Link { .. } | Tag::Image { .. } => {
                self.cover(&range);
                return;
            }
            Tag::Item => {
                self.stack
                    .push(Frame::Container(Container::new(ContainerKind::Item, range)));
                return;
            }
            Tag::TableHead | Tag::TableRow => {
                self.stack.push(Frame::Row { cells: Vec::new() });
                return;
            }
            Tag::TableCell => {
                self.stack.push(Frame::Leaf {
                    kind: LeafKind::Cell,
                    span: Span::default(),
                });
                return;
            }
            Tag::Paragraph => Frame::Leaf {
                kind: LeafKind::Paragraph,
                span: Span::default(),
            },
            Tag::Heading { level, .. } => Frame::Leaf {
                kind: LeafKind::Heading(heading_level(level)),
                span: Span::default(),
            },
            Tag::BlockQuote(_) => {
                Frame::Container(Container::new(ContainerKind::Quote, range.clone()))
            }
            Tag::CodeBlock(kind) => Frame::Code {
                info: match kind {
                    CodeBlockKind::Fenced(info) => split_info(&info).0.to_string(),
                    CodeBlockKind::Indented => String::new(),
                },
                body: String::new(),
            },
            Tag::HtmlBlock => Frame::Html {
                body: String::new(),
            },
            Tag::List(start) => Frame::List {
                marker: ListMarker::detect(&self.source[range.start..], start),
                items: Vec::new(),
            },
            Tag::Table(alignments) => Frame::Table {
                alignments: alignments.into_iter().map(Align::from).collect(),
                head: Vec::new(),
                rows: Vec::new(),
            },
            _ => Frame::Skip,
        };
        self.open_block(range.start);
        self.stack.push(frame);
    }

    fn end(&mut self, end: TagEnd, range: Range<usize>) {
        if matches!(
            end,
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough | TagEnd::Link | TagEnd::Image
        ) {
            return;
        }
        if self.stack.len() == 1 {
            return;
        }
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let depth = self.quote_depth();

        match frame {
            Frame::Leaf { kind, span } => {
                let lines = span.lines(self.source, depth);
                match kind {
                    LeafKind::Paragraph if lines.is_empty() => self.advance(range.end),
                    LeafKind::Paragraph => self.attach(Block::Paragraph { lines }, range.end),
                    LeafKind::Heading(level) => self.attach(
                        Block::Heading {
                            level,
                            text: lines.join(" "),
                        },
                        range.end,
                    ),
                    LeafKind::Cell => {
                        if let Some(Frame::Row { cells }) = self.stack.last_mut() {
                            cells.push(lines.join(" "));
                        }
                    }
                }
            }
            Frame::Row { cells } => {
                if let Some(Frame::Table { head, rows, .. }) = self.stack.last_mut() {
                    if matches!(end, TagEnd::TableHead) {
                        *head = cells;
                    } else {
                        rows.push(cells);
                    }
                }
            }
            Frame::Code { info, body } => self.attach(
                Block::CodeBlock {
                    info,
                    body: code_lines(&body),
                },
                range.end,
            ),
            Frame::Html { body } => {
                let lines = html_lines(&body);
                if lines.is_empty() {
                    self.advance(range.end);
                } else {
                    self.attach(Block::Html { lines }, range.end);
                }
            }
            Frame::Table {
                alignments,
                head,
                rows,
            } => self.attach(
                Block::Table {
                    alignments,
                    head,
                    rows,
                },
                range.end,
            ),
            Frame::List { marker, items } => self.attach(Block::List { marker, items }, range.end),
            Frame::Container(mut container) => {
                let own = usize::from(container.kind == ContainerKind::Quote);
                container.flush(self.source, depth + own);
                let end = container.end;
                container.gap(self.source, end, depth + own);
                match container.kind {
                    ContainerKind::Quote => self.attach(
                        Block::Quote {
                            blocks: container.blocks,
                        },
                        end,
                    ),
                    ContainerKind::Item => {
                        if let Some(Frame::List { items, .. }) = self.stack.last_mut() {
                            items.push(container.blocks);
                        }
                    }
                    ContainerKind::Root => {}
                }
            }
            Frame::Skip => {}
        }
    }

    /// Record inline content for the innermost leaf.
    fn cover(&mut self, range: &Range<usize>) {
        let depth = self.quote_depth();
        let source = self.source;
        match self.stack.last_mut() {
            Some(Frame::Leaf { span, .. }) => span.cover(range),
            Some(Frame::Container(container)) => {
                if container.bare.is_empty() {
                    container.gap(source, range.start, depth);
                }
                container.bare.cover(range);
            }
            _ => {}
        }
    }

    /// Prepare the enclosing container for a child block starting at `at`.
    fn open_block(&mut self, at: usize) {
        let depth = self.quote_depth();
        let source = self.source;
        if let Some(Frame::Container(container)) = self.stack.last_mut() {
            container.flush(source, depth);
            container.gap(source, at, depth);
        }
    }

    fn attach(&mut self, block: Block, end: usize) {
        if let Some(Frame::Container(container)) = self.stack.last_mut() {
            container.blocks.push(block);
            container.cursor = container.cursor.max(end);
        }
    }

    fn advance(&mut self, end: usize) {
        if let Some(Frame::Container(container)) = self.stack.last_mut() {
            container.cursor = container.cursor.max(end);
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.stack.truncate(1);
        let Some(Frame::Container(mut root)) = self.stack.pop() else {
            return Vec::new();
        };
        root.flush(self.source, 0);
        root.gap(self.source, self.source.len(), 0);
        root.blocks
    }
}

fn heading_level(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn code_lines(body: &str) -> Vec<String> {
    let body = body.strip_suffix('\n').unwrap_or(body);
    if body.is_empty() {
        return Vec::new();
    }
    body.split('\n').map(str::to_string).collect()
}

/// HTML lines pass through the same line rules as the rest of the text, and
/// fence-shaped lines are escaped so fence repair never pairs them.
fn html_lines(body: &str) -> Vec<String> {
    let body = body.strip_suffix('\n').unwrap_or(body);
    let escaped: Vec<String> = body
        .split('\n')
        .map(|line| {
            if parse_fence_line(line).is_some() {
                format!("\\{}", line.trim_start())
            } else {
                line.to_string()
            }
        })
        .collect();
    let mut lines: Vec<String> = normalize::structural(&escaped.join("\n"))
        .split('\n')
        .map(str::to_string)
        .collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines
}

/// Lines of `gap` that belong to link reference definitions.
fn definition_lines(gap: &str, quote_depth: usize, item_marker: bool) -> Vec<String> {
    let mut kept = Vec::new();
    let mut in_definition = false;
    for (i, line) in gap.split('\n').enumerate() {
        let mut line = strip_quote_markers(line, quote_depth);
        if i == 0 && item_marker {
            line = strip_item_marker(line);
        }
        let line = collapse_inline(line);
        if line.is_empty() {
            in_definition = false;
            continue;
        }
        if line.starts_with('[') {
            in_definition = true;
        } else if !in_definition {
            continue;
        }
        kept.push(line);
    }
    kept
}

fn strip_quote_markers(mut line: &str, depth: usize) -> &str {
    for _ in 0..depth {
        match line.trim_start_matches(INLINE_WS).strip_prefix('>') {
            Some(rest) => line = rest,
            None => break,
        }
    }
    line
}

fn strip_item_marker(line: &str) -> &str {
    let line = line.trim_start_matches(INLINE_WS);
    if let Some(rest) = line.strip_prefix(['-', '+', '*']) {
        return rest;
    }
    let number = line.trim_start_matches(|c: char| c.is_ascii_digit());
    if number.len() < line.len() {
        if let Some(rest) = number.strip_prefix(['.', ')']) {
            return rest;
        }
    }
    line
}

/// Lift code blocks out of list items, splitting the list around them.
fn hoist_code(blocks: Vec<Block>) -> Vec<Block> {
    let mut out = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            Block::List { marker, items } => split_list(marker, items, &mut out),
            Block::Quote { blocks } => out.push(Block::Quote {
                blocks: hoist_code(blocks),
            }),
            other => out.push(other),
        }
    }
    out
}

fn split_list(mut marker: ListMarker, items: Vec<Vec<Block>>, out: &mut Vec<Block>) {
    let mut pending: Vec<Vec<Block>> = Vec::new();
    let mut consumed = 0;

    for item in items {
        consumed += 1;
        let mut segment = Vec::new();
        let mut split = false;
        for block in hoist_code(item) {
            if !matches!(block, Block::CodeBlock { .. }) {
                segment.push(block);
                continue;
            }
            if split {
                out.append(&mut segment);
            } else {
                if !segment.is_empty() {
                    pending.push(std::mem::take(&mut segment));
                }
                flush_list(&mut marker, &mut pending, consumed, out);
                consumed = 0;
                split = true;
            }
            out.push(block);
        }
        if split {
            out.append(&mut segment);
        } else {
            pending.push(segment);
        }
    }
    flush_list(&mut marker, &mut pending, consumed, out);
}

fn flush_list(
    marker: &mut ListMarker,
    pending: &mut Vec<Vec<Block>>,
    consumed: usize,
    out: &mut Vec<Block>,
) {
    if !pending.is_empty() {
        out.push(Block::List {
            marker: *marker,
            items: std::mem::take(pending),
        });
    }
    marker.advance(consumed);
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render_blocks(blocks: &[Block]) -> Vec<String> {
    let mut out = Vec::new();
    for block in blocks {
        let lines = render_block(block);
        if lines.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(String::new());
        }
        out.extend(lines);
    }
    out
}

fn render_block(block: &Block) -> Vec<String> {
    match block {
        Block::Heading { level, text } => {
            let hashes = "#".repeat(usize::from(*level));
            if text.is_empty() {
                vec![hashes]
            } else {
                vec![format!("{hashes} {text}")]
            }
        }
        Block::Paragraph { lines } | Block::Html { lines } | Block::Definitions { lines } => {
            lines.clone()
        }
        Block::CodeBlock { info, body } => render_code(info, body),
        Block::List { marker, items } => render_list(marker, items),
        Block::Quote { blocks } => {
            let inner = render_blocks(blocks);
            if inner.is_empty() {
                return vec![">".to_string()];
            }
            inner
                .into_iter()
                .map(|line| {
                    if line.is_empty() {
                        ">".to_string()
                    } else {
                        format!("> {line}")
                    }
                })
                .collect()
        }
        Block::Table {
            alignments,
            head,
            rows,
        } => {
            let delimiters: Vec<String> =
                alignments.iter().map(|a| a.delimiter().to_string()).collect();
            let mut out = vec![table_row(head), table_row(&delimiters)];
            out.extend(rows.iter().map(|row| table_row(row)));
            out
        }
        Block::ThematicBreak => vec![THEMATIC_BREAK.to_string()],
    }
}

/// Fence with backticks unless the info string holds one, and make the
/// marker longer than any run inside the body.
fn render_code(info: &str, body: &[String]) -> Vec<String> {
    let fence_char = if info.contains('`') { '~' } else { '`' };
    let longest = body
        .iter()
        .map(|line| {
            let line = line.trim_start_matches(INLINE_WS);
            line.len() - line.trim_start_matches(fence_char).len()
        })
        .max()
        .unwrap_or(0);
    let marker = fence_char.to_string().repeat(longest.max(2) + 1);

    let mut out = Vec::with_capacity(body.len() + 2);
    out.push(format!("{marker}{info}"));
    out.extend(body.iter().cloned());
    out.push(marker);
    out
}

fn render_list(marker: &ListMarker, items: &[Vec<Block>]) -> Vec<String> {
    let mut out = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let label = marker.label(index);
        let pad = " ".repeat(label.len() + 1);
        let mut lines = render_blocks(item).into_iter();
        let Some(first) = lines.next() else {
            out.push(label);
            continue;
        };
        out.push(format!("{label} {first}"));
        out.extend(lines.map(|line| {
            if line.is_empty() {
                line
            } else {
                format!("{pad}{line}")
            }
        }));
    }
    out
}

fn table_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

/// Trim `text` and collapse whitespace runs to one space, leaving code spans
/// untouched.
fn collapse_inline(text: &str) -> String {
    let text = text.trim_matches(INLINE_WS);
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut pending_space = false;

    while let Some(c) = rest.chars().next() {
        if c == ' ' || c == '\t' {
            pending_space = true;
            rest = &rest[1..];
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '`' {
            let run = rest.len() - rest.trim_start_matches('`').len();
            let span = closing_run(&rest[run..], run).map_or(run, |end| run + end + run);
            out.push_str(&rest[..span]);
            rest = &rest[span..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Byte offset of the next backtick run of exactly `len` in `haystack`.
fn closing_run(haystack: &str, len: usize) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'`' {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i] == b'`' {
            i += 1;
        }
        if i - start == len {
            return Some(start);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(text: &str) -> String {
        Document::parse(text).render()
    }

    fn assert_fixed_point(text: &str) {
        let doc = Document::parse(text);
        let again = Document::parse(&doc.render());
        assert_eq!(doc, again, "render/parse drifted for {text:?}");
    }

    #[test]
    fn empty_input_renders_empty() {
        assert!(Document::parse("").is_empty());
        assert_eq!(round_trip("\n \n\t\n"), "");
    }

    #[test]
    fn atx_heading_strips_closing_sequence() {
        let doc = Document::parse("##  Title   ##");
        assert_eq!(
            doc.blocks,
            vec![Block::Heading {
                level: 2,
                text: "Title".into()
            }]
        );
        assert_eq!(round_trip("# C#"), "# C#\n");
    }

    #[test]
    fn setext_headings_become_atx() {
        assert_eq!(round_trip("Title\n====="), "# Title\n");
        assert_eq!(round_trip("Sub  title\n---"), "## Sub title\n");
    }

    #[test]
    fn paragraph_whitespace_collapses_outside_code_spans() {
        assert_eq!(
            round_trip("  a   b\t\tc  `x   y`  d  "),
            "a b c `x   y` d\n"
        );
    }

    #[test]
    fn unmatched_backticks_are_literal() {
        assert_eq!(round_trip("a ``  b   c"), "a `` b c\n");
    }

    #[test]
    fn escapes_and_links_keep_their_source_text() {
        assert_eq!(round_trip(r"\*not emphasis\*"), "\\*not emphasis\\*\n");
        assert_eq!(
            round_trip("see  [the docs](https://example.com/a_b)  now"),
            "see [the docs](https://example.com/a_b) now\n"
        );
    }

    #[test]
    fn code_body_is_verbatim() {
        let text = "```py\n  x  =  1\n\n\n  y\n```";
        assert_eq!(round_trip(text), "```py\n  x  =  1\n\n\n  y\n```\n");
    }

    #[test]
    fn code_info_keeps_first_word() {
        assert_eq!(round_trip("~~~rust extra words\nfn f() {}\n~~~"), "```rust\nfn f() {}\n```\n");
    }

    #[test]
    fn indented_code_becomes_fenced() {
        assert_eq!(round_trip("para\n\n    let x = 1;"), "para\n\n```\nlet x = 1;\n```\n");
    }

    #[test]
    fn fence_outgrows_backtick_runs_in_quoted_body() {
        assert_eq!(
            round_trip("> ````\n> ```\n> ````"),
            "> ````\n> ```\n> ````\n"
        );
    }

    #[test]
    fn ordered_list_is_renumbered() {
        assert_eq!(round_trip("3. a\n3. b\n3. c"), "3. a\n4. b\n5. c\n");
        assert_eq!(round_trip("1) a\n1) b"), "1) a\n2) b\n");
    }

    #[test]
    fn loose_list_becomes_tight() {
        assert_eq!(round_trip("- a\n\n- b"), "- a\n- b\n");
    }

    #[test]
    fn changing_bullet_starts_new_list() {
        let doc = Document::parse("- a\n* b");
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(round_trip("- a\n* b"), "- a\n\n* b\n");
    }

    #[test]
    fn mixed_bullets_never_become_a_break() {
        assert_eq!(round_trip("* - -"), "* - -\n");
    }

    #[test]
    fn nested_blocks_stay_with_their_item() {
        let text = "- a\n  - nested\n\n  more\n- b";
        let doc = Document::parse(text);
        let Block::List { items, .. } = &doc.blocks[0] else {
            panic!("expected a list, got {:?}", doc.blocks);
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].len(), 3);
        assert_eq!(round_trip(text), "- a\n\n  - nested\n\n  more\n- b\n");
        assert_fixed_point(text);
    }

    #[test]
    fn code_in_list_item_is_lifted_out() {
        let text = "1. a\n   ```sh\n   ls\n   ```\n2. b";
        assert_eq!(round_trip(text), "1. a\n\n```sh\nls\n```\n\n2. b\n");
        assert_fixed_point(text);
    }

    #[test]
    fn empty_item_keeps_its_marker() {
        assert_eq!(round_trip("- a\n-\n- c"), "- a\n-\n- c\n");
    }

    #[test]
    fn unindented_text_after_blank_ends_list() {
        let doc = Document::parse("- a\n\nafter");
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(
            doc.blocks[1],
            Block::Paragraph {
                lines: vec!["after".into()]
            }
        );
    }

    #[test]
    fn table_pipes_and_alignment_are_normalized() {
        let text = "|a|  b |\n|:--|--:|\n| 1 |2|";
        assert_eq!(round_trip(text), "| a | b |\n| :--- | ---: |\n| 1 | 2 |\n");
    }

    #[test]
    fn escaped_pipes_stay_in_cell() {
        let doc = Document::parse("| a \\| b | c |\n| - | - |");
        assert_eq!(
            doc.blocks,
            vec![Block::Table {
                alignments: vec![Align::None, Align::None],
                head: vec![r"a \| b".into(), "c".into()],
                rows: Vec::new(),
            }]
        );
    }

    #[test]
    fn quotes_are_normalized() {
        assert_eq!(round_trip(">a\n>\n>   b"), "> a\n>\n> b\n");
        assert_eq!(round_trip("> a\nlazy"), "> a\n> lazy\n");
    }

    #[test]
    fn thematic_breaks_render_uniformly() {
        assert_eq!(round_trip("* * *"), "___\n");
        assert_eq!(round_trip("para\n\n---"), "para\n\n___\n");
    }

    #[test]
    fn link_definitions_are_kept() {
        let text = "[docs]:   https://example.com\n\nSee [docs].";
        assert_eq!(round_trip(text), "[docs]: https://example.com\n\nSee [docs].\n");
        assert_fixed_point(text);
    }

    #[test]
    fn html_fence_lines_are_escaped() {
        let rendered = round_trip("<div>\n```\n</div>");
        assert_eq!(rendered, "<div>\n\\```\n</div>\n");
        assert_eq!(round_trip(&rendered), rendered);
    }

    #[test]
    fn block_start_ends_paragraph() {
        let doc = Document::parse("text\n# Head\nmore\n> quote");
        assert_eq!(doc.blocks.len(), 4);
    }

    #[test]
    fn mixed_document_is_a_fixed_point() {
        let text = "# Title\n\nSome   text\nwrapped\n\n- one\n  cont\n- two\n\n1. x\n2. y\n\n\
                    | h | i |\n| --- | --- |\n| 1 | 2 |\n\n> q\n\n```rs\nfn main() {}\n```\n\n---\n\n* - -\n";
        assert_fixed_point(text);
        let rendered = round_trip(text);
        assert_eq!(round_trip(&rendered), rendered);
    }
}
