//! Canonical text form for chat content.
//!
//! Chat output is hashed into the audit chain, so formatting noise (glued
//! fence lines, uneven whitespace, renumbered lists) must not change the
//! digest of content that means the same thing. [`canonicalize`] maps raw text
//! to one deterministic rendering:
//!
//! 1. unify newlines
//! 2. repair fenced-code openers and closers ([`fence`])
//! 3. structural cleanup outside fences ([`normalize`])
//! 4. close an odd trailing fence
//! 5. parse with pulldown-cmark and re-render ([`document`])
//!
//! The line passes and the CommonMark parser can read the same text
//! differently (a fence line inside an HTML block, say). The passes are
//! therefore re-applied until the rendering stops changing, which makes the
//! result idempotent: canonical text canonicalizes to itself.

pub mod document;
pub mod fence;
pub mod normalize;

pub use document::{Align, Block, Document, ListMarker};
pub use fence::{parse_fence_line, FenceLine, FenceState};
pub use normalize::count_fence_markers;

use crate::digest;

/// Upper bound on formatting rounds. Real chat text settles in two.
const MAX_ROUNDS: usize = 8;

/// Map raw text to its canonical rendering. Never fails.
pub fn canonicalize(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let mut current = format_once(raw);
    for _ in 1..MAX_ROUNDS {
        let next = format_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn format_once(text: &str) -> String {
    let text = normalize::normalize_newlines(text);
    let text = fence::repair(&text);
    let text = normalize::structural(&text);
    let text = normalize::balance_fences(text);
    Document::parse(&text).render()
}

/// Canonicalizer handle for callers that take it as a collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Canonicalizer;

impl Canonicalizer {
    pub fn canonicalize(&self, raw: &str) -> String {
        canonicalize(raw)
    }

    /// Deduplication fingerprint of the canonical form.
    pub fn fingerprint(&self, raw: &str) -> String {
        digest::fingerprint(&canonicalize(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repairs_heading_and_unterminated_fence() {
        assert_eq!(
            canonicalize("#Title\n```js\nconsole.log(1)"),
            "# Title\n\n```js\nconsole.log(1)\n```\n"
        );
    }

    #[test]
    fn empty_and_blank_input() {
        assert_eq!(canonicalize(""), "");
        assert_eq!(canonicalize("  \r\n\t\n"), "");
    }

    #[test]
    fn crlf_and_lf_agree() {
        assert_eq!(
            canonicalize("line one\r\nline two\r\n"),
            canonicalize("line one\nline two\n")
        );
    }

    #[test]
    fn glued_opener_is_split() {
        assert_eq!(
            canonicalize("```python import os\nprint(1)\n```"),
            "```python\nimport os\nprint(1)\n```\n"
        );
    }

    #[test]
    fn idempotent_on_messy_input() {
        let raw = "##Setup\nRun:\n```bash npm   install\n```  ok\n\n\n\nThen\n* a\n*   b\n|x|y|\n|-|-|\n~~~\nopen";
        let once = canonicalize(raw);
        assert_eq!(canonicalize(&once), once);
        assert_eq!(count_fence_markers(&once) % 2, 0);
    }

    #[test]
    fn glued_fence_pairs_are_stable() {
        let raw = "``` a ```\n```\n``` a ```b c";
        let once = canonicalize(raw);
        assert_eq!(once, "```a\n```\n\n```\n```\n");
        assert_eq!(canonicalize(&once), once);
    }

    #[test]
    fn fence_inside_html_block_settles() {
        let raw = "<div>\n```\n\n#x\n```";
        let once = canonicalize(raw);
        assert_eq!(canonicalize(&once), once);
        assert_eq!(count_fence_markers(&once) % 2, 0);
    }

    #[test]
    fn fingerprint_ignores_formatting_noise() {
        let c = Canonicalizer;
        assert_eq!(c.fingerprint("a   b\r\n"), c.fingerprint("a b"));
        assert_ne!(c.fingerprint("a b"), c.fingerprint("a c"));
    }
}
