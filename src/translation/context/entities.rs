/*!
 * Proper-noun detection for glossary proposals.
 *
 * Capitalised tokens (or runs of capitalised tokens) are counted across
 * segments in reading order. Common sentence openers are cut off the front
 * of a run. A term is reported once, as soon as it has been seen in two
 * segments and at least one translation so far kept it unchanged.
 */

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\p{Lu}\p{Ll}{1,}(?:[ \-]\p{Lu}\p{Ll}{1,}){0,2})\b").expect("valid name regex")
});

/// Capitalised words that are almost never names
const COMMON_WORDS: &[&str] = &[
    // English
    "I", "The", "A", "An", "This", "That", "These", "Those", "It", "He", "She", "They", "We", "You",
    "My", "Your", "His", "Her", "Our", "Their", "What", "Who", "Where", "When", "Why", "How", "Yes",
    "No", "Oh", "Ah", "Well", "Now", "Then", "Here", "There", "But", "And", "Or", "If", "So", "In",
    "On", "At", "As", "For", "Not", "All", "One", "Chapter",
    // Serbian and Russian
    "Он", "Она", "Они", "Оно", "Ја", "Ти", "Ми", "Ви", "То", "Та", "Тај", "Ово", "Овај", "Али", "И",
    "А", "Да", "Не", "Што", "Шта", "Како", "Када", "Где", "Гдје", "Зашто", "Ко", "Кто", "Сада",
    "Тада", "Онда", "Још", "Већ", "После", "Затим", "Я", "Мы", "Вы", "Это", "Но", "Нет", "Что",
    "Как", "Когда", "Где", "Потом", "Глава", "Он", "Његов", "Њена", "Његова", "Свој", "Сам",
    "On", "Ona", "Oni", "Ja", "Ti", "Mi", "Vi", "Ali", "Da", "Ne", "Šta", "Kako", "Kada", "Gde",
    "Sada", "Tada", "Onda", "Posle",
];

/// Counts candidate proper nouns across finished segments
#[derive(Debug)]
pub struct EntityDetector {
    min_occurrences: usize,
    exclude: HashSet<&'static str>,
    state: Mutex<DetectorState>,
}

#[derive(Debug, Default)]
struct DetectorState {
    counts: HashMap<String, usize>,
    /// Names some translation carried verbatim
    carried: HashSet<String>,
    reported: HashSet<String>,
}

impl Default for EntityDetector {
    fn default() -> Self {
        Self::new(2)
    }
}

impl EntityDetector {
    pub fn new(min_occurrences: usize) -> Self {
        Self {
            min_occurrences: min_occurrences.max(1),
            exclude: COMMON_WORDS.iter().copied().collect(),
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Candidate names in one piece of text, each listed once
    pub fn candidates(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        NAME_PATTERN
            .captures_iter(text)
            .filter_map(|cap| cap.get(1).map(|m| self.strip_openers(m.as_str())))
            .filter(|name| name.chars().count() > 2)
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Drop leading common words, so "Then Marko Polo" becomes "Marko Polo"
    fn strip_openers(&self, run: &str) -> String {
        let mut rest = run;
        loop {
            let end = rest.find([' ', '-']).unwrap_or(rest.len());
            if !self.exclude.contains(&rest[..end]) {
                return rest.to_string();
            }
            if end == rest.len() {
                return String::new();
            }
            rest = &rest[end + 1..];
        }
    }

    /// Record one segment in reading order; returns terms that just became
    /// reportable. `translation` is `None` when the segment was not translated.
    pub fn observe(&self, source: &str, translation: Option<&str>) -> Vec<String> {
        let candidates = self.candidates(source);
        let mut state = self.state.lock();
        let mut newly = Vec::new();
        for name in candidates {
            let count = {
                let count = state.counts.entry(name.clone()).or_insert(0);
                *count += 1;
                *count
            };
            if translation.is_some_and(|t| t.contains(&name)) {
                state.carried.insert(name.clone());
            }
            if count >= self.min_occurrences && state.carried.contains(&name) && state.reported.insert(name.clone()) {
                newly.push(name);
            }
        }
        newly
    }
}
