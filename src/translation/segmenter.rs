/*!
 * Segmenter: splits a chapter into translation units that fit a token budget.
 *
 * By default every translatable block becomes one segment. A block that
 * does not fit is cut on sentence boundaries, then on clause boundaries,
 * then between words, and the pieces are packed greedily so a block is
 * split into as few parts as possible. The `Grouped` strategy packs
 * consecutive prose blocks into one segment with block markers and never
 * groups across a heading.
 */

use std::sync::atomic::{AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::translation::document::{BlockKind, Chapter};
use crate::translation::quality::script::is_cjk;

/// Tokens kept free for system prompt, glossary and style
pub const RESERVED_PROMPT_TOKENS: usize = 1500;

/// Smallest budget a segment may get
pub const MIN_SEGMENT_BUDGET: usize = 32;

/// Upper bound on blocks per grouped segment
const MAX_GROUP_BLOCKS: usize = 16;

const END_MARKER: &str = "<<END>>";

static BLOCK_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<<BLOCK_(\d+)>>").expect("valid block marker regex"));

/// Words whose trailing period does not end a sentence
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "st", "jr", "sr", "vs", "etc", "prof", "gen", "col", "capt", "lt",
    "e.g", "i.e", "vol", "pp", "npr", "tzv", "itd", "str", "gosp", "g", "gđa", "sv", "br",
    "г", "гг", "ул", "стр", "им", "т.е", "др", "итд", "нпр", "тзв", "св", "бр", "госп", "проф",
];

/// How the blocks of a chapter are turned into segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SplitStrategy {
    /// One segment per block, split only when a block does not fit
    #[default]
    PerBlock,
    /// Consecutive prose blocks share a segment up to the budget
    Grouped,
}

/// The atomic unit of translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub segment_id: String,
    pub chapter_id: String,

    /// First block covered by this segment
    pub block_index: usize,

    /// Blocks covered; more than one only for grouped segments
    pub block_count: usize,

    /// Position inside a split block, empty for whole blocks
    pub piece_path: Vec<usize>,

    /// Whitespace that followed this piece in the source block
    pub trailing: String,

    pub text: String,
    pub kind: BlockKind,
    pub token_estimate: usize,
    pub context_before: String,
    pub context_after: String,
}

impl Segment {
    pub fn is_grouped(&self) -> bool {
        self.block_count > 1
    }

    pub fn is_part(&self) -> bool {
        !self.piece_path.is_empty()
    }

    /// Source text without block markers
    pub fn plain_text(&self) -> String {
        if self.is_grouped() {
            split_grouped(&self.text, self.block_count)
                .map(|blocks| blocks.join("\n\n"))
                .unwrap_or_else(|| self.text.clone())
        } else {
            self.text.clone()
        }
    }
}

/// Estimate tokens: codepoints / 3.5, CJK codepoints / 2.0, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    weight(text).ceil() as usize
}

fn weight(text: &str) -> f64 {
    let (cjk, other) = text.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) { (cjk + 1, other) } else { (cjk, other + 1) }
    });
    cjk as f64 / 2.0 + other as f64 / 3.5
}

/// Segment budget derived from a provider's window
pub fn budget_for(max_context_tokens: usize, max_output_tokens: usize) -> usize {
    let available = max_context_tokens.saturating_sub(RESERVED_PROMPT_TOKENS) / 2;
    available.min(max_output_tokens).max(MIN_SEGMENT_BUDGET)
}

/// Compute the stable id of a segment
pub fn segment_id(chapter_id: &str, block_index: usize, piece_path: &[usize], text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(chapter_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(block_index.to_le_bytes());
    for step in piece_path {
        hasher.update((*step as u64).to_le_bytes());
    }
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..24].to_string()
}

/// Join blocks into one marked segment text
pub fn join_grouped<S: AsRef<str>>(texts: &[S]) -> String {
    let mut out = String::new();
    for (i, text) in texts.iter().enumerate() {
        out.push_str(&format!("<<BLOCK_{}>>\n{}\n", i, text.as_ref().trim()));
    }
    out.push_str(END_MARKER);
    out
}

/// Split marked text back into blocks, `None` when markers are missing or out of order
pub fn split_grouped(text: &str, expected: usize) -> Option<Vec<String>> {
    let body = match text.find(END_MARKER) {
        Some(end) => &text[..end],
        None => text,
    };
    let markers: Vec<_> = BLOCK_MARKER.captures_iter(body).collect();
    if markers.len() != expected {
        return None;
    }
    let mut blocks = Vec::with_capacity(expected);
    for (i, caps) in markers.iter().enumerate() {
        let index: usize = caps.get(1)?.as_str().parse().ok()?;
        if index != i {
            return None;
        }
        let start = caps.get(0)?.end();
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(body.len());
        blocks.push(body[start..end].trim().to_string());
    }
    Some(blocks)
}

/// A piece of block text and the whitespace that followed it
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub text: String,
    pub trailing: String,
}

fn is_sentence_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '…' | '。' | '！' | '？')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | '»' | '”' | '’' | ')' | ']')
}

fn is_abbreviation(before: &str) -> bool {
    let word: String = before
        .chars()
        .rev()
        .take_while(|c| c.is_alphabetic() || *c == '.')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if word.is_empty() {
        return false;
    }
    let mut letters = word.chars();
    // single capital initial, as in "J. R. R."
    if let (Some(first), None) = (letters.next(), letters.next()) {
        if first.is_uppercase() {
            return true;
        }
    }
    ABBREVIATIONS.contains(&word.to_lowercase().as_str())
}

/// Byte offsets where sentences end
fn sentence_ends(text: &str) -> Vec<usize> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut ends = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (pos, c) = chars[i];
        if !is_sentence_terminator(c) {
            i += 1;
            continue;
        }
        let cjk = matches!(c, '。' | '！' | '？');
        let mut j = i + 1;
        while j < chars.len() && (is_sentence_terminator(chars[j].1) || is_closing(chars[j].1)) {
            j += 1;
        }
        let end = chars.get(j).map(|(p, _)| *p).unwrap_or(text.len());
        i = j;
        if end >= text.len() {
            continue;
        }
        let followed_by_space = chars[j].1.is_whitespace();
        if !cjk && !followed_by_space {
            continue;
        }
        if c == '.' && is_abbreviation(&text[..pos]) {
            continue;
        }
        // "Wait… what" keeps going when the next word is lowercase
        let next_word = text[end..].trim_start().chars().next();
        if next_word.is_some_and(|n| n.is_lowercase()) {
            continue;
        }
        ends.push(end);
    }
    ends
}

/// Byte offsets after commas, semicolons and colons followed by space
fn clause_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((pos, c)) = chars.next() {
        if matches!(c, ',' | ';' | ':' | '，' | '；') {
            if let Some(&(_, next)) = chars.peek() {
                if next.is_whitespace() || matches!(c, '，' | '；') {
                    ends.push(pos + c.len_utf8());
                }
            }
        }
    }
    ends
}

/// Byte offsets at the end of each word
fn word_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut prev_ws = true;
    for (pos, c) in text.char_indices() {
        if c.is_whitespace() && !prev_ws {
            ends.push(pos);
        }
        prev_ws = c.is_whitespace();
    }
    ends
}

/// Cut text at the given ends, moving following whitespace into `trailing`
fn cut(text: &str, ends: &[usize], trailing: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut start = 0;
    for &end in ends {
        if end <= start || end >= text.len() {
            continue;
        }
        let rest = &text[end..];
        let ws = rest.len() - rest.trim_start().len();
        pieces.push(Piece {
            text: text[start..end].to_string(),
            trailing: rest[..ws].to_string(),
        });
        start = end + ws;
    }
    if start < text.len() {
        pieces.push(Piece {
            text: text[start..].to_string(),
            trailing: trailing.to_string(),
        });
    } else if let Some(last) = pieces.last_mut() {
        last.trailing.push_str(trailing);
    }
    pieces
}

/// Refine pieces that exceed the budget with finer boundaries
fn refine(pieces: Vec<Piece>, budget: f64, level: usize) -> Vec<Piece> {
    let finder: fn(&str) -> Vec<usize> = match level {
        0 => clause_ends,
        1 => word_ends,
        _ => return pieces,
    };
    let mut out = Vec::new();
    for piece in pieces {
        if weight(&piece.text) <= budget {
            out.push(piece);
            continue;
        }
        let finer = cut(&piece.text, &finder(&piece.text), &piece.trailing);
        out.extend(refine(finer, budget, level + 1));
    }
    out
}

/// Greedy packing; for a sequence this yields the fewest parts
fn pack(pieces: Vec<Piece>, budget: f64) -> Vec<Piece> {
    let mut out: Vec<Piece> = Vec::new();
    let mut current: Option<(Piece, f64)> = None;
    for piece in pieces {
        let w = weight(&piece.text);
        current = match current.take() {
            None => Some((piece, w)),
            Some((mut acc, acc_w)) => {
                let joined_w = acc_w + weight(&acc.trailing) + w;
                if joined_w <= budget {
                    acc.text.push_str(&acc.trailing);
                    acc.text.push_str(&piece.text);
                    acc.trailing = piece.trailing;
                    Some((acc, joined_w))
                } else {
                    out.push(acc);
                    Some((piece, w))
                }
            }
        };
    }
    if let Some((acc, _)) = current {
        out.push(acc);
    }
    out
}

/// Split text into the fewest pieces that fit `budget` where possible
pub fn split_text(text: &str, budget: usize) -> Vec<Piece> {
    let budget = budget.max(1) as f64;
    if weight(text) <= budget {
        return vec![Piece { text: text.to_string(), trailing: String::new() }];
    }
    let sentences = cut(text, &sentence_ends(text), "");
    let refined = refine(sentences, budget, 0);
    pack(refined, budget)
}

pub(crate) fn tail_chars(text: &str, n: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(n)).collect()
}

fn head_chars(text: &str, n: usize) -> String {
    text.chars().take(n).collect()
}

/// Splits chapters into segments
#[derive(Debug)]
pub struct Segmenter {
    /// Characters of neighbouring text attached as context
    context_chars: usize,

    /// Number of segment and resegment calls so far
    calls: AtomicUsize,
}

impl Segmenter {
    pub fn new(context_chars: usize) -> Self {
        Self {
            context_chars,
            calls: AtomicUsize::new(0),
        }
    }

    /// How often the segmenter has been asked to cut text
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn make_segment(
        &self,
        chapter_id: &str,
        block_index: usize,
        block_count: usize,
        piece_path: Vec<usize>,
        kind: BlockKind,
        text: String,
        trailing: String,
    ) -> Segment {
        Segment {
            segment_id: segment_id(chapter_id, block_index, &piece_path, &text),
            chapter_id: chapter_id.to_string(),
            block_index,
            block_count,
            piece_path,
            trailing,
            token_estimate: estimate_tokens(&text),
            text,
            kind,
            context_before: String::new(),
            context_after: String::new(),
        }
    }

    /// Split one chapter's translatable blocks into segments
    pub fn segment(&self, chapter: &Chapter, budget: usize, strategy: SplitStrategy) -> Vec<Segment> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let budget = budget.max(1);
        let mut segments = Vec::new();
        let mut group: Vec<usize> = Vec::new();

        let flush = |group: &mut Vec<usize>, segments: &mut Vec<Segment>| {
            match group.len() {
                0 => {}
                1 => {
                    let index = group[0];
                    let block = &chapter.sections[index];
                    segments.extend(self.split_block(&chapter.id, index, block.kind, &block.text, budget));
                }
                n => {
                    let texts: Vec<&str> = group.iter().map(|&i| chapter.sections[i].text.as_str()).collect();
                    let kind = chapter.sections[group[0]].kind;
                    segments.push(self.make_segment(
                        &chapter.id,
                        group[0],
                        n,
                        Vec::new(),
                        kind,
                        join_grouped(&texts),
                        String::new(),
                    ));
                }
            }
            group.clear();
        };

        for (index, block) in chapter.sections.iter().enumerate() {
            if !block.needs_translation() {
                // passthrough blocks end a group so block runs stay contiguous
                flush(&mut group, &mut segments);
                continue;
            }
            if strategy == SplitStrategy::Grouped && block.kind.is_groupable() {
                let mut candidate: Vec<&str> = group.iter().map(|&i| chapter.sections[i].text.as_str()).collect();
                candidate.push(&block.text);
                let fits = estimate_tokens(&join_grouped(&candidate)) <= budget;
                if !group.is_empty() && (!fits || group.len() >= MAX_GROUP_BLOCKS) {
                    flush(&mut group, &mut segments);
                }
                group.push(index);
                continue;
            }
            flush(&mut group, &mut segments);
            segments.extend(self.split_block(&chapter.id, index, block.kind, &block.text, budget));
        }
        flush(&mut group, &mut segments);

        self.attach_context(&mut segments);
        segments
    }

    fn split_block(&self, chapter_id: &str, index: usize, kind: BlockKind, text: &str, budget: usize) -> Vec<Segment> {
        let pieces = split_text(text, budget);
        if pieces.len() == 1 {
            return vec![self.make_segment(chapter_id, index, 1, Vec::new(), kind, text.to_string(), String::new())];
        }
        pieces
            .into_iter()
            .enumerate()
            .map(|(k, piece)| self.make_segment(chapter_id, index, 1, vec![k], kind, piece.text, piece.trailing))
            .collect()
    }

    fn attach_context(&self, segments: &mut [Segment]) {
        if self.context_chars == 0 {
            return;
        }
        for i in 0..segments.len() {
            if i > 0 {
                segments[i].context_before = tail_chars(&segments[i - 1].plain_text(), self.context_chars);
            }
            if i + 1 < segments.len() {
                segments[i].context_after = head_chars(&segments[i + 1].plain_text(), self.context_chars);
            }
        }
    }

    /// Replace a segment that overflowed the model window with smaller ones
    ///
    /// Grouped segments fall apart into their blocks. Other segments are cut
    /// with a budget half the size of the smaller of `budget` and their own
    /// estimate, halving again until at least two pieces come out. Returns
    /// `None` when the text cannot be cut any further.
    pub fn resegment(&self, segment: &Segment, budget: usize) -> Option<Vec<Segment>> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        if segment.is_grouped() {
            let blocks = split_grouped(&segment.text, segment.block_count)?;
            let mut children: Vec<Segment> = blocks
                .into_iter()
                .enumerate()
                .map(|(j, text)| {
                    self.make_segment(&segment.chapter_id, segment.block_index + j, 1, Vec::new(), segment.kind, text, String::new())
                })
                .collect();
            self.inherit_context(segment, &mut children);
            return Some(children);
        }

        let mut reduced = budget.min(segment.token_estimate) / 2;
        while reduced >= 1 {
            let pieces = split_text(&segment.text, reduced);
            if pieces.len() >= 2 {
                let last = pieces.len() - 1;
                let mut children: Vec<Segment> = pieces
                    .into_iter()
                    .enumerate()
                    .map(|(k, piece)| {
                        let mut path = segment.piece_path.clone();
                        path.push(k);
                        // the parent keeps its own trailing whitespace
                        let trailing = if k == last { String::new() } else { piece.trailing };
                        self.make_segment(&segment.chapter_id, segment.block_index, 1, path, segment.kind, piece.text, trailing)
                    })
                    .collect();
                self.inherit_context(segment, &mut children);
                return Some(children);
            }
            reduced /= 2;
        }
        None
    }

    fn inherit_context(&self, parent: &Segment, children: &mut [Segment]) {
        self.attach_context(children);
        if let Some(first) = children.first_mut() {
            first.context_before = parent.context_before.clone();
        }
        if let Some(last) = children.last_mut() {
            last.context_after = parent.context_after.clone();
        }
    }
}
