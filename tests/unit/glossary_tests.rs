/*!
 * Tests for the shared glossary memory
 */

use futures::future::join_all;

use litwai::translation::EventBus;
use litwai::translation::context::{GlossaryEntry, GlossaryMemory, ProposalContext, ProposalOutcome, TermKind};

fn context(ordinal: usize) -> ProposalContext {
    ProposalContext {
        segment_id: format!("seg-{}", ordinal),
        chapter_ordinal: ordinal,
        kind: TermKind::Person,
    }
}

#[tokio::test]
async fn test_propose_concurrentRenderings_shouldAcceptExactlyOne() {
    let glossary = GlossaryMemory::spawn(EventBus::new("run", 256));
    let candidates = ["Ivan", "John", "Jovan", "Iwan", "Johann", "Giovanni"];

    let outcomes = join_all(candidates.iter().enumerate().map(|(i, candidate)| {
        let glossary = glossary.clone();
        async move { glossary.propose("Иван", candidate, context(i)).await.unwrap() }
    }))
    .await;

    let accepted: Vec<&ProposalOutcome> = outcomes
        .iter()
        .filter(|o| matches!(o, ProposalOutcome::Accepted(_)))
        .collect();
    assert_eq!(accepted.len(), 1);
    let ProposalOutcome::Accepted(winner) = accepted[0] else { unreachable!() };
    assert!(outcomes.iter().all(|o| match o {
        ProposalOutcome::Accepted(_) => true,
        ProposalOutcome::Conflict { existing } => existing.target_term == winner.target_term,
        _ => false,
    }));
    assert_eq!(glossary.len(), 1);
}

#[tokio::test]
async fn test_snapshot_heldByReader_shouldNotChangeAfterLaterProposals() {
    let glossary = GlossaryMemory::spawn(EventBus::new("run", 16));
    glossary.propose("Марко", "Marko", context(0)).await.unwrap();
    let before = glossary.snapshot();
    let digest = before.digest().to_string();

    glossary.propose("Ана", "Ana", context(0)).await.unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(before.digest(), digest);
    assert_eq!(glossary.snapshot().len(), 2);
    assert_ne!(glossary.digest(), digest);
}

#[tokio::test]
async fn test_propose_withEmptyTerms_shouldBeRejected() {
    let glossary = GlossaryMemory::spawn(EventBus::new("run", 16));
    assert_eq!(glossary.propose("  ", "Ivan", context(0)).await.unwrap(), ProposalOutcome::Rejected);
    assert_eq!(glossary.propose("Иван", "", context(0)).await.unwrap(), ProposalOutcome::Rejected);
    assert!(glossary.is_empty());
}

#[tokio::test]
async fn test_seed_thenPropose_shouldKeepSeedTranslation() {
    let glossary = GlossaryMemory::spawn(EventBus::new("run", 16));
    glossary
        .seed(vec![GlossaryEntry::new("Нишка Бања", "Niška Banja", TermKind::Place).with_notes("spa town")])
        .await
        .unwrap();

    let outcome = glossary.propose("нишка бања", "Nish Spa", context(4)).await.unwrap();
    let ProposalOutcome::Conflict { existing } = outcome else {
        panic!("expected a conflict, got {:?}", outcome)
    };
    assert_eq!(existing.target_term, "Niška Banja");
    assert_eq!(existing.origin, None);
    assert_eq!(existing.notes.as_deref(), Some("spa town"));
}

#[tokio::test]
async fn test_viewForChapter_withWindowOne_shouldSeePreviousChapter() {
    let glossary = GlossaryMemory::spawn(EventBus::new("run", 16));
    glossary.propose("Иван", "Ivan", context(0)).await.unwrap();
    let snapshot = glossary.snapshot();

    assert!(snapshot.view_for_chapter(0, 1).entries().is_empty());
    assert_eq!(snapshot.view_for_chapter(1, 1).entries().len(), 1);
    assert_eq!(snapshot.view_for_chapter(1, 1).relevant_to("Иван је ту.").len(), 1);
}
