//! # Three-way text merge
//!
//! [`merge`] combines two descendants of a common base without ever emitting
//! conflict markers.
//!
//! ## Blocks
//!
//! Text is cut into fenced code blocks (an opening line of three or more
//! backticks or tildes, indented at most three spaces, through the matching
//! closing fence or the end of the text) and the prose between them. When all
//! three versions have the same sequence of block kinds they are merged block
//! by block, otherwise the texts are merged as one prose block.
//!
//! Fenced blocks never merge internally: an unchanged side takes the other
//! side, two equal sides are kept once, and two different edits are kept
//! whole, ours first.
//!
//! ## Prose
//!
//! Both edit scripts (base→ours, base→theirs) are computed with the
//! character-level diff in [`crate::diff`] and applied together:
//!
//! | Overlap | Result |
//! |---------|--------|
//! | none | both hunks applied |
//! | two inserts at one position | theirs, then ours (once if identical) |
//! | two deletions | their union is deleted |
//! | identical hunks | applied once |
//! | anything else | [`union`] of ours and theirs |

use std::collections::HashSet;

use tracing::debug;

use crate::diff::{apply, diff, Hunk};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Prose,
    Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block<'a> {
    pub kind: BlockKind,
    pub text: &'a str,
}

/// Merge `ours` and `theirs`, both derived from `base`.
pub fn merge(base: &str, ours: &str, theirs: &str) -> String {
    if ours == theirs || theirs == base {
        return ours.to_string();
    }
    if ours == base {
        return theirs.to_string();
    }

    let b = split_blocks(base);
    let o = split_blocks(ours);
    let t = split_blocks(theirs);
    let aligned = b.len() == o.len()
        && b.len() == t.len()
        && b.iter().zip(&o).zip(&t).all(|((b, o), t)| b.kind == o.kind && b.kind == t.kind);
    if !aligned {
        debug!(base = b.len(), ours = o.len(), theirs = t.len(), "block structure differs");
        return merge_prose(base, ours, theirs);
    }

    let mut out = String::with_capacity(ours.len().max(theirs.len()));
    for ((b, o), t) in b.iter().zip(&o).zip(&t) {
        match b.kind {
            BlockKind::Prose => out.push_str(&merge_prose(b.text, o.text, t.text)),
            BlockKind::Fence => out.push_str(&merge_fence(b.text, o.text, t.text)),
        }
    }
    out
}

/// Conservative combination used when edits collide: ours verbatim, then
/// every non-blank line of theirs that ours does not already contain.
pub fn union(ours: &str, theirs: &str) -> String {
    let present: HashSet<&str> = ours.lines().map(str::trim_end).collect();
    let mut seen = HashSet::new();
    let extra: Vec<&str> = theirs
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !present.contains(line.trim_end()))
        .filter(|line| seen.insert(line.trim_end()))
        .collect();

    let mut out = ours.to_string();
    if extra.is_empty() {
        return out;
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&extra.join("\n"));
    // An empty `ours` has no line ending of its own; follow theirs.
    let trailing_newline = if ours.is_empty() {
        theirs.ends_with('\n')
    } else {
        ours.ends_with('\n')
    };
    if trailing_newline {
        out.push('\n');
    }
    out
}

pub fn split_blocks(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut prose_start = 0;
    let mut offset = 0;
    let mut fence: Option<(u8, usize, usize)> = None;

    for line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        match fence {
            None => {
                if let Some((marker, len)) = fence_open(line) {
                    push_prose(&mut blocks, &text[prose_start..line_start]);
                    fence = Some((marker, len, line_start));
                }
            }
            Some((marker, len, start)) => {
                if is_fence_close(line, marker, len) {
                    blocks.push(Block {
                        kind: BlockKind::Fence,
                        text: &text[start..offset],
                    });
                    fence = None;
                    prose_start = offset;
                }
            }
        }
    }

    match fence {
        Some((_, _, start)) => blocks.push(Block {
            kind: BlockKind::Fence,
            text: &text[start..],
        }),
        None => push_prose(&mut blocks, &text[prose_start..]),
    }
    blocks
}

fn push_prose<'a>(blocks: &mut Vec<Block<'a>>, text: &'a str) {
    if !text.is_empty() {
        blocks.push(Block {
            kind: BlockKind::Prose,
            text,
        });
    }
}

/// Strip up to three spaces of indentation; `None` for deeper indents.
fn unindent(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\n', '\r']);
    let indent = line.bytes().take_while(|b| *b == b' ').count();
    (indent <= 3).then(|| &line[indent..])
}

fn fence_open(line: &str) -> Option<(u8, usize)> {
    let rest = unindent(line)?;
    let marker = *rest.as_bytes().first()?;
    if marker != b'`' && marker != b'~' {
        return None;
    }
    let len = rest.bytes().take_while(|b| *b == marker).count();
    if len < 3 || (marker == b'`' && rest[len..].contains('`')) {
        return None;
    }
    Some((marker, len))
}

fn is_fence_close(line: &str, marker: u8, open_len: usize) -> bool {
    let Some(rest) = unindent(line) else {
        return false;
    };
    let len = rest.bytes().take_while(|b| *b == marker).count();
    len >= open_len && rest[len..].trim().is_empty()
}

fn merge_fence(base: &str, ours: &str, theirs: &str) -> String {
    if ours == base {
        return theirs.to_string();
    }
    if theirs == base || ours == theirs {
        return ours.to_string();
    }
    let mut out = ours.to_string();
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(theirs);
    out
}

fn merge_prose(base: &str, ours: &str, theirs: &str) -> String {
    if ours == theirs || theirs == base {
        return ours.to_string();
    }
    if ours == base {
        return theirs.to_string();
    }

    let base_chars: Vec<char> = base.chars().collect();
    let ours_hunks = diff(&base_chars, &ours.chars().collect::<Vec<_>>());
    let theirs_hunks = diff(&base_chars, &theirs.chars().collect::<Vec<_>>());

    match combine(ours_hunks, theirs_hunks) {
        Some(hunks) => apply(&base_chars, &hunks),
        None => {
            debug!("overlapping edits, falling back to line union");
            union(ours, theirs)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Side {
    Theirs,
    Ours,
}

fn overlaps(x: &Hunk, y: &Hunk) -> bool {
    match (x.is_insert(), y.is_insert()) {
        (true, true) => x.start == y.start,
        (true, false) => y.start < x.start && x.start < y.end,
        (false, true) => x.start < y.start && y.start < x.end,
        (false, false) => x.start < y.end && y.start < x.end,
    }
}

/// Combine both edit scripts into one ordered, non-overlapping script.
/// `None` when two edits collide in a way that has no positional answer.
fn combine(ours: Vec<Hunk>, theirs: Vec<Hunk>) -> Option<Vec<Hunk>> {
    let mut all: Vec<(Side, Hunk)> = ours
        .into_iter()
        .map(|h| (Side::Ours, h))
        .chain(theirs.into_iter().map(|h| (Side::Theirs, h)))
        .collect();
    all.sort_by(|(sa, a), (sb, b)| (a.start, a.end, *sa).cmp(&(b.start, b.end, *sb)));

    let mut clusters: Vec<Vec<(Side, Hunk)>> = Vec::new();
    for (side, hunk) in all {
        match clusters.last_mut() {
            Some(cluster) if cluster.iter().any(|(_, h)| overlaps(h, &hunk)) => {
                cluster.push((side, hunk));
            }
            _ => clusters.push(vec![(side, hunk)]),
        }
    }

    let mut out = Vec::new();
    for cluster in clusters {
        if cluster.iter().all(|(s, _)| *s == cluster[0].0) {
            out.extend(cluster.into_iter().map(|(_, h)| h));
            continue;
        }
        out.push(resolve_cluster(cluster)?);
    }
    Some(out)
}

fn resolve_cluster(cluster: Vec<(Side, Hunk)>) -> Option<Hunk> {
    let first = &cluster[0].1;
    if cluster.iter().all(|(_, h)| h == first) {
        return Some(first.clone());
    }
    if cluster.iter().all(|(_, h)| h.is_insert() && h.start == first.start) {
        // Sorted with theirs first.
        let mut insert = Vec::new();
        for (_, h) in &cluster {
            insert.extend_from_slice(&h.insert);
        }
        return Some(Hunk {
            start: first.start,
            end: first.start,
            insert,
        });
    }
    if cluster.iter().all(|(_, h)| h.is_delete() && !h.is_insert()) {
        let start = cluster.iter().map(|(_, h)| h.start).min()?;
        let end = cluster.iter().map(|(_, h)| h.end).max()?;
        return Some(Hunk {
            start,
            end,
            insert: Vec::new(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_laws() {
        for (b, o) in [("", "x"), ("base\n", "ours\n"), ("a\n```\nc\n```\n", "z")] {
            assert_eq!(merge(b, b, o), o);
            assert_eq!(merge(b, o, b), o);
        }
    }

    #[test]
    fn test_one_sided_edit() {
        assert_eq!(
            merge("Hello\nWorld", "Hello brave\nWorld", "Hello\nWorld"),
            "Hello brave\nWorld"
        );
    }

    #[test]
    fn test_shared_insertion_point_puts_theirs_first() {
        assert_eq!(merge("abc", "aXbc", "aYbc"), "aYXbc");
    }

    #[test]
    fn test_identical_insertions_emitted_once() {
        assert_eq!(merge("ab", "aXb", "aXb"), "aXb");
        assert_eq!(merge("a b c", "a X b c", "a X b c!"), "a X b c!");
    }

    #[test]
    fn test_overlapping_deletions_union() {
        assert_eq!(merge("0123456789", "016789", "012389"), "0189");
    }

    #[test]
    fn test_disjoint_edits_both_apply() {
        let base = "# Title\n\nFirst paragraph.\n\nSecond paragraph.\n";
        let ours = "# Title\n\nFirst paragraph, edited.\n\nSecond paragraph.\n";
        let theirs = "# Title\n\nFirst paragraph.\n\nSecond paragraph, also.\n";
        assert_eq!(
            merge(base, ours, theirs),
            "# Title\n\nFirst paragraph, edited.\n\nSecond paragraph, also.\n"
        );
    }

    #[test]
    fn test_conflicting_edit_falls_back_to_union() {
        let merged = merge("status: draft\n", "status: final\n", "status: review\nowner: me\n");
        assert_eq!(merged, "status: final\nstatus: review\nowner: me\n");
    }

    #[test]
    fn test_union_keeps_ours_trailing_newline_style() {
        assert_eq!(union("a\nb", "b\nc\n\nc"), "a\nb\nc");
        assert_eq!(union("a\n", "a\n"), "a\n");
        assert_eq!(union("", "x\ny\n"), "x\ny\n");
        assert_eq!(union("", "y"), "y");
    }

    #[test]
    fn test_emptied_ours_against_edit_adds_no_newline() {
        assert_eq!(merge("x", "", "y"), "y");
        assert_eq!(merge("x\n", "", "y\n"), "y\n");
    }

    #[test]
    fn test_merge_is_deterministic() {
        let args = ("one two three\n", "one 2 three\nfour\n", "one two 3\n");
        assert_eq!(merge(args.0, args.1, args.2), merge(args.0, args.1, args.2));
    }

    #[test]
    fn test_split_blocks() {
        let text = "intro\n```rust\nlet a = 1;\n```\nmiddle\n   ~~~~\nraw\n~~~~\n";
        let kinds: Vec<_> = split_blocks(text).iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            vec![BlockKind::Prose, BlockKind::Fence, BlockKind::Prose, BlockKind::Fence]
        );
        let joined: String = split_blocks(text).iter().map(|b| b.text).collect();
        assert_eq!(joined, text);

        let unclosed = split_blocks("a\n```\nb\n");
        assert_eq!(unclosed[1].text, "```\nb\n");
        assert_eq!(split_blocks("    ```\nindented\n").len(), 1);
    }

    #[test]
    fn test_fenced_block_is_never_split() {
        let base = "Intro\n```\nline a\nline b\n```\nOutro\n";
        let ours = "Intro\n```\nline A\nline b\n```\nOutro\n";
        let theirs = "Intro\n```\nline a\nline B\n```\nOutro\n";
        assert_eq!(
            merge(base, ours, theirs),
            "Intro\n```\nline A\nline b\n```\n```\nline a\nline B\n```\nOutro\n"
        );
    }

    #[test]
    fn test_fence_edited_on_one_side_merges_with_prose_edits() {
        let base = "Intro\n```\ncode\n```\nOutro\n";
        let ours = "Intro!\n```\ncode\n```\nOutro\n";
        let theirs = "Intro\n```\ncode v2\n```\nOutro\n";
        assert_eq!(merge(base, ours, theirs), "Intro!\n```\ncode v2\n```\nOutro\n");
    }
}
