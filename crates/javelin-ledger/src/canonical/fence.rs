//! Fenced-code repair.
//!
//! Model output regularly glues the language tag and the first line of code
//! onto the opening fence (```` ```python import os ````) or leaves stray text
//! on the closing fence. [`repair`] walks the text line by line with an
//! explicit two-state machine and rewrites both cases into clean fence lines.

/// Where the scanner currently is relative to fenced code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceState {
    Outside,
    /// Inside a fence opened with `marker`. The marker is remembered so an
    /// unterminated fence can be closed with the same run at end of input.
    Inside { marker: String },
}

/// A line that opens or closes a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceLine<'a> {
    /// The run of three or more identical fence characters.
    pub marker: &'a str,
    /// Everything after the marker.
    pub tail: &'a str,
}

/// Recognize a fence line: optional leading whitespace, then at least three
/// identical `` ` `` or `~` characters.
pub fn parse_fence_line(line: &str) -> Option<FenceLine<'_>> {
    let trimmed = line.trim_start_matches(|c: char| c.is_ascii_whitespace());
    let first = trimmed.chars().next()?;
    if first != '`' && first != '~' {
        return None;
    }
    let run = trimmed.len() - trimmed.trim_start_matches(first).len();
    if run < 3 {
        return None;
    }
    Some(FenceLine {
        marker: &trimmed[..run],
        tail: &trimmed[run..],
    })
}

/// Split an opener's tail into the language tag and any code glued after it.
pub(crate) fn split_info(tail: &str) -> (&str, &str) {
    let tail = tail.trim_matches(|c: char| c.is_ascii_whitespace());
    match tail.find(|c: char| c.is_ascii_whitespace()) {
        Some(end) => (
            &tail[..end],
            tail[end..].trim_start_matches(|c: char| c.is_ascii_whitespace()),
        ),
        None => (tail, ""),
    }
}

/// Rewrite fence lines so every opener carries only `marker + lang`, every
/// closer repeats the opener's marker, and an unterminated fence is closed.
///
/// Every output line is terminated by `\n`.
pub fn repair(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 64);
    let mut state = FenceState::Outside;

    for line in input.split('\n') {
        let Some(fence) = parse_fence_line(line) else {
            out.push_str(line);
            out.push('\n');
            continue;
        };

        state = match state {
            FenceState::Outside => {
                let (lang, rest) = opener_parts(&fence);
                out.push_str(fence.marker);
                out.push_str(&lang);
                out.push('\n');
                if rest.is_empty() {
                    FenceState::Inside {
                        marker: fence.marker.to_string(),
                    }
                } else if parse_fence_line(&rest).is_some() {
                    // "``` a ```": the glued remainder closes the block.
                    out.push_str(fence.marker);
                    out.push('\n');
                    FenceState::Outside
                } else {
                    out.push_str(&rest);
                    out.push('\n');
                    FenceState::Inside {
                        marker: fence.marker.to_string(),
                    }
                }
            }
            FenceState::Inside { marker } => {
                out.push_str(&marker);
                out.push('\n');
                FenceState::Outside
            }
        };
    }

    if let FenceState::Inside { marker } = state {
        out.push_str(&marker);
        out.push('\n');
    }

    out
}

/// Info tag and glued remainder of an opener.
///
/// A backtick fence cannot carry a backtick in its info string, so the tag
/// is cut at the first one and the rest is treated as glued content.
fn opener_parts(fence: &FenceLine<'_>) -> (String, String) {
    let (lang, rest) = split_info(fence.tail);
    // A tag starting with the fence character would lengthen the marker.
    let lang = lang.trim_start_matches(|c: char| fence.marker.starts_with(c));
    let cut = if fence.marker.starts_with('`') {
        lang.find('`')
    } else {
        None
    };
    match cut {
        Some(at) => {
            let mut glued = lang[at..].to_string();
            if !rest.is_empty() {
                glued.push(' ');
                glued.push_str(rest);
            }
            (lang[..at].to_string(), glued)
        }
        None => (lang.to_string(), rest.to_string()),
    }
}
