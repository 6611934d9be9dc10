/*!
 * Seam repair for blocks that were translated in several parts.
 *
 * When a block is cut for the model, the translations of neighbouring parts
 * are glued back together. Models sometimes repeat the last words of the
 * previous part (they saw it as context) or start a part on a new line in
 * the middle of a sentence. Both are fixed here, only at the seams.
 */

/// Words a model tends to repeat across a seam
const TRANSITION_WORDS: &[&str] = &[
    "and", "but", "then", "so", "however", "yet", "or", "still",
    "i", "a", "ali", "pa", "zatim", "onda", "no", "ipak", "te",
    "и", "а", "али", "па", "затим", "онда", "но", "ипак", "те", "потом", "однако",
];

/// Longest repeated run, in words, that is removed
const MAX_OVERLAP_WORDS: usize = 12;

fn comparable(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

/// Byte offset in `right` after the words it repeats from the end of `left`
fn overlap_end(left: &str, right: &str) -> usize {
    let left_words: Vec<String> = left.split_whitespace().map(comparable).collect();
    let right_words: Vec<(usize, &str)> = right
        .split_whitespace()
        .map(|w| (w.as_ptr() as usize - right.as_ptr() as usize + w.len(), w))
        .collect();
    let limit = MAX_OVERLAP_WORDS.min(left_words.len()).min(right_words.len().saturating_sub(1));

    for k in (1..=limit).rev() {
        let tail = &left_words[left_words.len() - k..];
        let head: Vec<String> = right_words[..k].iter().map(|(_, w)| comparable(w)).collect();
        if tail.iter().any(|w| w.is_empty()) || tail != head.as_slice() {
            continue;
        }
        if k == 1 && !TRANSITION_WORDS.contains(&tail[0].as_str()) {
            continue;
        }
        return right_words[k - 1].0;
    }
    0
}

fn ends_sentence(text: &str) -> bool {
    text.trim_end()
        .chars()
        .last()
        .is_some_and(|c| matches!(c, '.' | '!' | '?' | '…' | ':' | ';' | '"' | '»' | '”' | '“' | ')'))
}

/// Join two part translations that were separated by `separator` in the source
///
/// Repeated leading words of `right` are dropped. When `right` starts in
/// lowercase on a new line although `left` did not end a sentence, the line
/// break is replaced by a space.
pub fn join_seam(left: &str, separator: &str, right: &str) -> String {
    join_seam_with(left, separator, right, true)
}

fn join_seam_with(left: &str, separator: &str, right: &str, dedupe: bool) -> String {
    let skip = if dedupe { overlap_end(left, right) } else { 0 };
    let right = right[skip..].trim_start();
    let left = left.trim_end();

    let starts_lower = right.chars().next().is_some_and(|c| c.is_lowercase());
    let separator = if separator.contains('\n') && starts_lower && !ends_sentence(left) {
        " "
    } else if separator.is_empty() && !left.is_empty() && !right.is_empty() {
        // parts cut between words always had whitespace between them
        " "
    } else {
        separator
    };

    let mut joined = String::with_capacity(left.len() + separator.len() + right.len());
    joined.push_str(left);
    joined.push_str(separator);
    joined.push_str(right);
    joined
}

/// One translated part of a block
#[derive(Debug, Clone, Copy)]
pub struct SeamPart<'a> {
    pub source: &'a str,
    pub translation: &'a str,
    /// Whitespace that followed the part in the source
    pub trailing: &'a str,
}

/// Fold a block's part translations, in order, into one text
///
/// A repetition that is already present in the source is kept.
pub fn join_parts(parts: &[SeamPart<'_>]) -> String {
    let mut out = String::new();
    for (index, part) in parts.iter().enumerate() {
        if index == 0 {
            out.push_str(part.translation.trim_end());
            continue;
        }
        let previous = &parts[index - 1];
        let dedupe = overlap_end(previous.source, part.source) == 0;
        out = join_seam_with(&out, previous.trailing, part.translation, dedupe);
    }
    out
}
