/*!
 * Tests for segmentation and resegmentation
 */

use litwai::translation::document::{BlockKind, Chapter, Section};
use litwai::translation::segmenter::{
    SplitStrategy, Segmenter, estimate_tokens, join_grouped, split_grouped, split_text,
};

use crate::common;

#[test]
fn test_segment_shouldSkipBlocksThatNeedNoTranslation() {
    let chapter = Chapter::new(
        "ch-001",
        "One",
        vec![
            Section::paragraph("Before the code."),
            Section::new(BlockKind::Code, "let answer = 42;"),
            Section::new(BlockKind::Passthrough, "* * *"),
            Section::paragraph("1984"),
            Section::paragraph("After the code."),
        ],
    );
    let segments = Segmenter::new(0).segment(&chapter, 500, SplitStrategy::PerBlock);
    let indices: Vec<usize> = segments.iter().map(|s| s.block_index).collect();
    assert_eq!(indices, vec![0, 4]);
}

#[test]
fn test_segment_grouped_shouldBreakGroupsAtPassthroughBlocks() {
    let chapter = Chapter::new(
        "ch-001",
        "One",
        vec![
            Section::paragraph("One."),
            Section::paragraph("Two."),
            Section::new(BlockKind::ImageAlt, "A map of the valley"),
            Section::paragraph("Three."),
        ],
    );
    let segments = Segmenter::new(0).segment(&chapter, 500, SplitStrategy::Grouped);
    assert_eq!(segments.len(), 2);
    assert_eq!((segments[0].block_index, segments[0].block_count), (0, 2));
    assert_eq!((segments[1].block_index, segments[1].block_count), (3, 1));
    assert!(!segments[1].is_grouped());
}

#[test]
fn test_segment_grouped_shouldCapBlocksPerSegment() {
    let texts: Vec<String> = (0..40).map(|i| format!("Line {}.", i)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let chapter = common::chapter("ch-001", &refs);
    let segments = Segmenter::new(0).segment(&chapter, 3000, SplitStrategy::Grouped);
    assert!(segments.len() >= 3);
    assert!(segments.iter().all(|s| s.block_count <= 16));
    let covered: usize = segments.iter().map(|s| s.block_count).sum();
    assert_eq!(covered, 40);
}

#[test]
fn test_segment_grouped_shouldRespectBudget() {
    let texts: Vec<String> = (0..30).map(|i| format!("Sentence number {} is short.", i)).collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let segments = Segmenter::new(0).segment(&common::chapter("ch-001", &refs), 60, SplitStrategy::Grouped);
    assert!(segments.iter().all(|s| s.token_estimate <= 60));
}

#[test]
fn test_segment_contextChars_shouldLimitNeighbourText() {
    let chapter = common::chapter(
        "ch-001",
        &["A very long first paragraph that goes on.", "Middle.", "The closing paragraph of the chapter."],
    );
    let segments = Segmenter::new(10).segment(&chapter, 500, SplitStrategy::PerBlock);
    assert_eq!(segments[1].context_before, "t goes on.");
    assert_eq!(segments[1].context_after, "The closin");
    assert!(segments[0].context_before.is_empty());
    assert!(segments[2].context_after.is_empty());
}

#[test]
fn test_splitText_withCjk_shouldCutAfterFullStops() {
    let text = "今日は雨が降っています。明日は晴れるでしょう。週末は旅行に行きます。";
    let pieces = split_text(text, 10);
    assert!(pieces.len() >= 2);
    assert!(pieces[0].text.ends_with('。'));
    let rebuilt: String = pieces.iter().map(|p| format!("{}{}", p.text, p.trailing)).collect();
    assert_eq!(rebuilt, text);
}

#[test]
fn test_splitText_shouldPackSentencesIntoFewestPieces() {
    let text = "One. Two. Three. Four. Five. Six.";
    let pieces = split_text(text, 5);
    assert!(pieces.len() < 6);
    assert!(pieces.iter().all(|p| estimate_tokens(&p.text) <= 5));
}

#[test]
fn test_splitGrouped_withBrokenMarkers_shouldReturnNone() {
    let joined = join_grouped(&["First.", "Second."]);
    assert_eq!(joined, "<<BLOCK_0>>\nFirst.\n<<BLOCK_1>>\nSecond.\n<<END>>");
    assert!(split_grouped(&joined, 3).is_none());
    assert!(split_grouped("<<BLOCK_1>>\nA\n<<BLOCK_0>>\nB\n<<END>>", 2).is_none());
    assert_eq!(
        split_grouped("<<BLOCK_0>>\nA\n<<BLOCK_1>>\nB", 2),
        Some(vec!["A".to_string(), "B".to_string()])
    );
}

#[test]
fn test_resegment_groupedSegment_shouldFallApartIntoBlocks() {
    let chapter = common::chapter("ch-001", &["Yes.", "No.", "Maybe."]);
    let segmenter = Segmenter::new(50);
    let grouped = segmenter.segment(&chapter, 500, SplitStrategy::Grouped).remove(0);
    let children = segmenter.resegment(&grouped, 500).unwrap();

    let texts: Vec<&str> = children.iter().map(|c| c.text.as_str()).collect();
    assert_eq!(texts, vec!["Yes.", "No.", "Maybe."]);
    let indices: Vec<usize> = children.iter().map(|c| c.block_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(children[1].context_before, "Yes.");
}

#[test]
fn test_resegment_nestedPieces_shouldExtendPiecePath() {
    let text = "The first sentence is rather long. The second one is also rather long. A third closes it.";
    let segmenter = Segmenter::new(0);
    let parent = segmenter.segment(&common::chapter("ch-001", &[text]), 1000, SplitStrategy::PerBlock).remove(0);
    let children = segmenter.resegment(&parent, 1000).unwrap();
    let grandchildren = segmenter.resegment(&children[0], 1000).unwrap();

    assert_eq!(children[0].piece_path, vec![0]);
    assert_eq!(grandchildren[1].piece_path, vec![0, 1]);
    assert_ne!(grandchildren[0].segment_id, children[0].segment_id);
    assert_eq!(segmenter.calls(), 3);
}
