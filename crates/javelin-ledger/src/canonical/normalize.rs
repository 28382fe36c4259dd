//! Line-level cleanup applied outside fenced code.

use std::sync::OnceLock;

use regex::Regex;

use super::fence::parse_fence_line;

fn heading_without_space() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([ \t]*#{1,6})([^ \t#])").expect("heading pattern is valid"))
}

/// Convert `\r\n` and lone `\r` into `\n`.
pub fn normalize_newlines(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

/// Whether an unindented line starts a list item or a table row.
fn starts_list_or_table(line: &str) -> bool {
    if line.starts_with('|') || ["- ", "* ", "+ "].iter().any(|m| line.starts_with(m)) {
        return true;
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    digits > 0 && (line[digits..].starts_with(". ") || line[digits..].starts_with(") "))
}

/// Same test, tolerant of indentation, used for the preceding line.
fn is_list_or_table_member(line: &str) -> bool {
    starts_list_or_table(line.trim_start_matches([' ', '\t']))
}

/// Structural pass over text whose fences are already repaired:
///
/// - `#Title` becomes `# Title`
/// - a blank line is inserted before an unindented list item or table row
///   that directly follows a non-blank line of another kind
/// - runs of blank lines collapse to one
///
/// Lines inside fenced code are copied through untouched.
pub fn structural(text: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut inside_fence = false;
    let mut previous_blank = true;
    let mut previous_member = false;

    for line in text.split('\n') {
        if parse_fence_line(line).is_some() {
            inside_fence = !inside_fence;
            out.push(line.to_string());
            previous_blank = false;
            previous_member = false;
            continue;
        }
        if inside_fence {
            out.push(line.to_string());
            continue;
        }

        if line.trim_matches([' ', '\t']).is_empty() {
            if !previous_blank {
                out.push(String::new());
            }
            previous_blank = true;
            previous_member = false;
            continue;
        }

        let line = heading_without_space().replace(line, "${1} ${2}");
        if starts_list_or_table(&line) && !previous_blank && !previous_member {
            out.push(String::new());
        }
        previous_member = is_list_or_table_member(&line);
        previous_blank = false;
        out.push(line.into_owned());
    }

    out.join("\n")
}

/// Number of fence markers in `text`, counted as lines starting with
/// ```` ``` ```` or `~~~`.
pub fn count_fence_markers(text: &str) -> usize {
    text.split('\n')
        .filter(|line| line.starts_with("```") || line.starts_with("~~~"))
        .count()
}

/// Append a closing fence when the marker count is odd.
pub fn balance_fences(text: String) -> String {
    if count_fence_markers(&text) % 2 == 0 {
        return text;
    }
    let mut text = text;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text.push_str("```");
    text
}
