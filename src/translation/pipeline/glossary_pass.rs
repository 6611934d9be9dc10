/*!
 * Glossary pass: commits a finished chapter's names to the glossary.
 *
 * Chapters are harvested one at a time in reading order, and inside a
 * chapter the slots are walked in reading order. Names the model listed for
 * a slot are proposed first, then names the entity detector picked up from
 * the source. The glossary therefore grows the same way for the same
 * translations whatever order the segments finished in, and glossary views
 * and cache keys repeat from one run to the next.
 */

use log::debug;

use crate::errors::TranslationError;
use crate::translation::context::{
    EntityDetector, GlossaryMemory, ProposalContext, ProposalOutcome, TermKind, enforce_canonical,
};

use super::finalizer::ChapterSlots;

/// Proposes names chapter by chapter; one per run
#[derive(Debug)]
pub struct GlossaryPass {
    glossary: GlossaryMemory,
    detector: EntityDetector,
}

impl GlossaryPass {
    pub fn new(glossary: GlossaryMemory) -> Self {
        Self {
            glossary,
            detector: EntityDetector::default(),
        }
    }

    pub fn glossary(&self) -> &GlossaryMemory {
        &self.glossary
    }

    /// Propose the names of chapter `ordinal` and rewrite its translated
    /// slots to the canonical spelling. Returns the number of conflicts.
    ///
    /// Must be called for chapter `n` before chapter `n + 1`.
    pub async fn harvest(&self, ordinal: usize, slots: &mut ChapterSlots) -> Result<usize, TranslationError> {
        let mut conflicts = 0;

        for id in slots.leaf_ids() {
            let Some(segment) = slots.segment(id).cloned() else { continue };
            let entities = slots.entities(id).cloned().unwrap_or_default();
            let context = || ProposalContext {
                segment_id: segment.segment_id.clone(),
                chapter_ordinal: ordinal,
                kind: TermKind::default(),
            };

            let Some(text) = slots.translation_mut(id) else {
                // flagged and cancelled slots still count as sightings
                self.detector.observe(&segment.plain_text(), None);
                continue;
            };

            for (source_term, target_term) in &entities {
                if let ProposalOutcome::Conflict { existing } =
                    self.glossary.propose(source_term, target_term, context()).await?
                {
                    *text = enforce_canonical(text, target_term, &existing.target_term);
                    conflicts += 1;
                }
            }

            for name in self.detector.observe(&segment.plain_text(), Some(text.as_str())) {
                if entities.contains_key(&name) {
                    continue;
                }
                if let ProposalOutcome::Conflict { existing } = self.glossary.propose(&name, &name, context()).await? {
                    *text = enforce_canonical(text, &name, &existing.target_term);
                    conflicts += 1;
                }
            }
        }

        if conflicts > 0 {
            debug!("Chapter {}: {} glossary conflicts resolved to canonical terms", ordinal, conflicts);
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::translation::document::{Chapter, Section};
    use crate::translation::events::{EventBus, EventKind};
    use crate::translation::pipeline::finalizer::SlotText;
    use crate::translation::segmenter::{Segmenter, SplitStrategy};

    fn slots_for(paragraphs: &[&str]) -> (ChapterSlots, Vec<usize>) {
        let chapter = Chapter::new(
            "ch-001",
            "One",
            paragraphs.iter().map(|p| Section::paragraph(*p)).collect(),
        );
        ChapterSlots::new(Segmenter::new(0).segment(&chapter, 500, SplitStrategy::PerBlock))
    }

    fn entities(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(s, t)| (s.to_string(), t.to_string())).collect()
    }

    #[tokio::test]
    async fn test_harvest_conflictingEntity_shouldRewriteToCanonicalTarget() {
        let events = EventBus::new("test", 256);
        let mut sub = events.subscribe();
        let pass = GlossaryPass::new(GlossaryMemory::spawn(events));
        let (mut slots, ids) = slots_for(&["Иван came.", "Иван came later."]);
        // the later slot resolves first; reading order still decides
        slots.resolve(ids[1], SlotText::Translated("John came later.".into()));
        slots.set_entities(ids[1], entities(&[("Иван", "John")]));
        slots.resolve(ids[0], SlotText::Translated("Ivan came.".into()));
        slots.set_entities(ids[0], entities(&[("Иван", "Ivan")]));

        let conflicts = pass.harvest(0, &mut slots).await.unwrap();

        assert_eq!(conflicts, 1);
        assert_eq!(slots.translation_mut(ids[1]).map(|t| t.clone()), Some("Ivan came later.".to_string()));
        assert_eq!(pass.glossary().snapshot().lookup("Иван").unwrap().target_term, "Ivan");
        let conflict_events = sub
            .drain()
            .into_iter()
            .filter(|e| matches!(e.kind, EventKind::GlossaryConflict { .. }))
            .count();
        assert_eq!(conflict_events, 1);
    }

    #[tokio::test]
    async fn test_harvest_detectedName_shouldBeProposedWithChapterOrigin() {
        let pass = GlossaryPass::new(GlossaryMemory::spawn(EventBus::new("test", 256)));
        let (mut slots, ids) = slots_for(&["Marko Polo arrived.", "Later, Marko Polo left.", "Marko Polo smiled."]);
        slots.resolve(ids[0], SlotText::Translated("Marko Polo je stigao.".into()));
        slots.resolve(ids[1], SlotText::Translated("Kasnije je otišao.".into()));
        slots.resolve(ids[2], SlotText::Flagged);

        pass.harvest(3, &mut slots).await.unwrap();

        let snapshot = pass.glossary().snapshot();
        let entry = snapshot.lookup("Marko Polo").expect("detected name");
        assert_eq!(entry.target_term, "Marko Polo");
        assert_eq!(entry.origin, Some(3));
        assert!(snapshot.lookup("Later").is_none());
    }

    #[tokio::test]
    async fn test_harvest_sameTranslationsInAnyResolveOrder_shouldGrowTheSameGlossary() {
        let translations = ["Marko Polo je stigao.", "Kasnije je otišao.", "Marko Polo se nasmejao."];
        let mut digests = Vec::new();
        for order in [[0usize, 1, 2], [2, 1, 0], [1, 2, 0]] {
            let pass = GlossaryPass::new(GlossaryMemory::spawn(EventBus::new("test", 256)));
            let (mut slots, ids) = slots_for(&["Marko Polo arrived.", "Later, Marko Polo left.", "Marko Polo smiled."]);
            for k in order {
                slots.resolve(ids[k], SlotText::Translated(translations[k].into()));
            }
            pass.harvest(0, &mut slots).await.unwrap();
            digests.push(pass.glossary().snapshot().digest().to_string());
        }
        assert!(digests.windows(2).all(|w| w[0] == w[1]));
    }
}
