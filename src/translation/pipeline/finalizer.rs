/*!
 * Chapter slots and the chapter finalizer.
 *
 * Every segment of a chapter owns a slot. A slot is pending until its
 * segment resolves, and a segment that had to be cut smaller is replaced by
 * a list of child slots. Once nothing is pending, the finalizer walks the
 * slot tree in reading order, glues split blocks back together with seam
 * repair and rebuilds the chapter with its original block structure.
 */

use std::collections::BTreeMap;

use crate::translation::document::{Chapter, Section};
use crate::translation::quality::{SeamPart, enhance, join_parts};
use crate::translation::segmenter::{Segment, split_grouped};

/// What a resolved slot holds
#[derive(Debug, Clone, PartialEq)]
pub enum SlotText {
    Translated(String),
    /// Failed; rendered as the review-marked source
    Flagged,
    /// Never translated because the run stopped; rendered as the source
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
enum SlotState {
    Pending,
    Done(SlotText),
    Split(Vec<usize>),
}

#[derive(Debug, Clone)]
struct Slot {
    segment: Segment,
    state: SlotState,
    /// Names the model reported for this slot's translation
    entities: BTreeMap<String, String>,
}

/// Slot tree of one chapter
#[derive(Debug, Clone, Default)]
pub struct ChapterSlots {
    slots: Vec<Slot>,
    roots: Vec<usize>,
}

impl ChapterSlots {
    /// Slots for the chapter's segments; returns the slot ids in order
    pub fn new(segments: Vec<Segment>) -> (Self, Vec<usize>) {
        let mut slots = Self::default();
        let ids: Vec<usize> = segments.into_iter().map(|s| slots.push(s)).collect();
        slots.roots = ids.clone();
        (slots, ids)
    }

    fn push(&mut self, segment: Segment) -> usize {
        self.slots.push(Slot {
            segment,
            state: SlotState::Pending,
            entities: BTreeMap::new(),
        });
        self.slots.len() - 1
    }

    pub fn segment(&self, id: usize) -> Option<&Segment> {
        self.slots.get(id).map(|s| &s.segment)
    }

    pub fn resolve(&mut self, id: usize, text: SlotText) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.state = SlotState::Done(text);
        }
    }

    pub fn set_entities(&mut self, id: usize, entities: BTreeMap<String, String>) {
        if let Some(slot) = self.slots.get_mut(id) {
            slot.entities = entities;
        }
    }

    pub fn entities(&self, id: usize) -> Option<&BTreeMap<String, String>> {
        self.slots.get(id).map(|s| &s.entities)
    }

    /// Translated text of a resolved slot, for in-place glossary fixes
    pub fn translation_mut(&mut self, id: usize) -> Option<&mut String> {
        match self.slots.get_mut(id).map(|s| &mut s.state) {
            Some(SlotState::Done(SlotText::Translated(text))) => Some(text),
            _ => None,
        }
    }

    /// Leaf slot ids in reading order
    pub fn leaf_ids(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            match &self.slots[id].state {
                SlotState::Split(children) => stack.extend(children.iter().rev()),
                _ => out.push(id),
            }
        }
        out
    }

    /// Replace a slot by child slots; returns the children's ids
    pub fn split(&mut self, id: usize, children: Vec<Segment>) -> Vec<usize> {
        let ids: Vec<usize> = children.into_iter().map(|s| self.push(s)).collect();
        if let Some(slot) = self.slots.get_mut(id) {
            slot.state = SlotState::Split(ids.clone());
        }
        ids
    }

    /// Slots still waiting for a result
    pub fn pending(&self) -> usize {
        self.leaves().iter().filter(|l| l.text.is_none()).count()
    }

    /// Leaves in reading order with the whitespace that follows each
    fn leaves(&self) -> Vec<Leaf<'_>> {
        let mut out = Vec::new();
        for &root in &self.roots {
            let trailing = self.slots[root].segment.trailing.as_str();
            self.collect(root, trailing, &mut out);
        }
        out
    }

    fn collect<'a>(&'a self, id: usize, trailing: &'a str, out: &mut Vec<Leaf<'a>>) {
        let slot = &self.slots[id];
        match &slot.state {
            SlotState::Split(children) => {
                let last = children.len().saturating_sub(1);
                for (k, &child) in children.iter().enumerate() {
                    // the last child ends where its parent ended
                    let child_trailing = if k == last {
                        trailing
                    } else {
                        self.slots[child].segment.trailing.as_str()
                    };
                    self.collect(child, child_trailing, out);
                }
            }
            SlotState::Done(text) => out.push(Leaf {
                segment: &slot.segment,
                trailing,
                text: Some(text),
            }),
            SlotState::Pending => out.push(Leaf {
                segment: &slot.segment,
                trailing,
                text: None,
            }),
        }
    }
}

struct Leaf<'a> {
    segment: &'a Segment,
    trailing: &'a str,
    text: Option<&'a SlotText>,
}

/// One part of a block, in its final rendering
struct Part {
    source: String,
    text: String,
    trailing: String,
    translated: bool,
}

/// A rebuilt chapter
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedChapter {
    pub chapter: Chapter,
    /// Blocks that carry the review marker
    pub flagged: usize,
}

/// Rebuilds chapters from their resolved slots
#[derive(Debug, Clone)]
pub struct ChapterFinalizer {
    review_marker: String,
}

impl ChapterFinalizer {
    pub fn new(review_marker: &str) -> Self {
        Self {
            review_marker: review_marker.to_string(),
        }
    }

    fn flagged_text(&self, source: &str) -> String {
        format!("{} {}", self.review_marker, source)
    }

    /// Render one source text for a resolved (or unresolved) slot
    fn render(&self, source: &str, text: Option<&SlotText>) -> (String, bool) {
        match text {
            Some(SlotText::Translated(t)) => (t.clone(), true),
            Some(SlotText::Flagged) => (self.flagged_text(source), false),
            Some(SlotText::Cancelled) | None => (source.to_string(), false),
        }
    }

    /// Rebuild `chapter`; pending slots keep their source text
    pub fn finalize(&self, chapter: &Chapter, slots: &ChapterSlots) -> FinalizedChapter {
        let mut parts: Vec<Vec<Part>> = chapter.sections.iter().map(|_| Vec::new()).collect();
        let mut marked = vec![false; chapter.sections.len()];

        for leaf in slots.leaves() {
            let segment = leaf.segment;
            if matches!(leaf.text, Some(SlotText::Flagged)) {
                // a grouped leaf marks every block it covers, split parts share one block
                let end = (segment.block_index + segment.block_count.max(1)).min(marked.len());
                for block in marked.iter_mut().take(end).skip(segment.block_index) {
                    *block = true;
                }
            }

            if segment.is_grouped() {
                let sources = split_grouped(&segment.text, segment.block_count)
                    .unwrap_or_else(|| vec![segment.text.clone()]);
                let translations = match leaf.text {
                    Some(SlotText::Translated(t)) => split_grouped(t, segment.block_count),
                    _ => None,
                };
                for (j, source) in sources.iter().enumerate() {
                    let index = segment.block_index + j;
                    let Some(block) = parts.get_mut(index) else { continue };
                    let (text, translated) = match &translations {
                        Some(blocks) => (blocks[j].clone(), true),
                        None if matches!(leaf.text, Some(SlotText::Flagged)) => (self.flagged_text(source), false),
                        None => (chapter.sections[index].text.clone(), false),
                    };
                    block.push(Part {
                        source: source.clone(),
                        text,
                        trailing: String::new(),
                        translated,
                    });
                }
                continue;
            }

            let (text, translated) = self.render(&segment.text, leaf.text);
            if let Some(block) = parts.get_mut(segment.block_index) {
                block.push(Part {
                    source: segment.text.clone(),
                    text,
                    trailing: leaf.trailing.to_string(),
                    translated,
                });
            }
        }

        let sections = chapter
            .sections
            .iter()
            .zip(parts)
            .map(|(section, block_parts)| self.rebuild(section, block_parts))
            .collect();

        FinalizedChapter {
            chapter: Chapter {
                id: chapter.id.clone(),
                title: chapter.title.clone(),
                sections,
            },
            flagged: marked.iter().filter(|m| **m).count(),
        }
    }

    fn rebuild(&self, section: &Section, parts: Vec<Part>) -> Section {
        if parts.is_empty() {
            return section.clone();
        }
        let all_translated = parts.iter().all(|p| p.translated);
        let seam_parts: Vec<SeamPart<'_>> = parts
            .iter()
            .map(|p| SeamPart {
                source: &p.source,
                translation: &p.text,
                trailing: &p.trailing,
            })
            .collect();
        let joined = if parts.len() == 1 {
            parts[0].text.clone()
        } else {
            join_parts(&seam_parts)
        };
        let text = if all_translated {
            enhance(&section.text, &joined)
        } else {
            joined
        };
        Section {
            text,
            ..section.clone()
        }
    }
}
