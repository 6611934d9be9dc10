/*!
 * Glossary memory for name and term consistency.
 *
 * The glossary is shared by every worker in a run, but only one task ever
 * writes it. Proposals are queued to that task over an mpsc channel and
 * answered over a oneshot; after each accepted entry the writer publishes a
 * fresh immutable snapshot. Readers clone the current `Arc` and never wait
 * on the writer. Entries are only ever added, and once locked an entry is
 * never rewritten: the first translation of a name wins.
 */

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};

use crate::errors::TranslationError;
use crate::translation::events::{EventBus, EventKind};

/// What a glossary entry names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TermKind {
    #[default]
    Person,
    Place,
    Object,
    Idiom,
    Untranslatable,
}

/// Canonical translation of one term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryEntry {
    pub source_term: String,
    pub target_term: String,
    #[serde(default)]
    pub kind: TermKind,
    #[serde(default)]
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Chapter ordinal that proposed the entry, `None` for seed entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<usize>,
}

impl GlossaryEntry {
    pub fn new(source_term: &str, target_term: &str, kind: TermKind) -> Self {
        Self {
            source_term: source_term.trim().to_string(),
            target_term: target_term.trim().to_string(),
            kind,
            locked: false,
            notes: None,
            origin: None,
        }
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

fn term_key(term: &str) -> String {
    term.trim().to_lowercase()
}

fn same_target(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn digest_of<'a>(entries: impl Iterator<Item = &'a GlossaryEntry>) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(term_key(&entry.source_term).as_bytes());
        hasher.update([0u8]);
        hasher.update(entry.target_term.as_bytes());
        hasher.update([0u8]);
        hasher.update(format!("{:?}", entry.kind).as_bytes());
        hasher.update([0xffu8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Terms whose source form occurs in `text`
fn relevant<'a>(entries: impl Iterator<Item = &'a GlossaryEntry>, text: &str) -> Vec<GlossaryEntry> {
    let haystack = text.to_lowercase();
    entries
        .filter(|e| haystack.contains(&term_key(&e.source_term)))
        .cloned()
        .collect()
}

/// Immutable state of the glossary at one point in time
#[derive(Debug, Clone, Default)]
pub struct GlossarySnapshot {
    entries: BTreeMap<String, GlossaryEntry>,
    digest: String,
    seeded: bool,
}

impl GlossarySnapshot {
    fn from_entries(entries: BTreeMap<String, GlossaryEntry>, seeded: bool) -> Self {
        let digest = digest_of(entries.values());
        Self { entries, digest, seeded }
    }

    pub fn lookup(&self, term: &str) -> Option<&GlossaryEntry> {
        self.entries.get(&term_key(term))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn entries(&self) -> impl Iterator<Item = &GlossaryEntry> {
        self.entries.values()
    }

    /// Entries a chapter may rely on when it is enqueued
    ///
    /// Seed entries plus entries from chapters that are guaranteed to have
    /// finished before chapter `ordinal` starts, given at most `window`
    /// chapters in flight and in-order chapter starts.
    pub fn view_for_chapter(&self, ordinal: usize, window: usize) -> GlossaryView {
        let window = window.max(1);
        let entries: Vec<GlossaryEntry> = self
            .entries
            .values()
            .filter(|e| match e.origin {
                None => true,
                Some(origin) => origin + window <= ordinal,
            })
            .cloned()
            .collect();
        let digest = digest_of(entries.iter());
        GlossaryView { entries, digest }
    }
}

/// Fixed subset of the glossary used for one chapter's prompts and cache keys
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlossaryView {
    entries: Vec<GlossaryEntry>,
    digest: String,
}

impl GlossaryView {
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn entries(&self) -> &[GlossaryEntry] {
        &self.entries
    }

    pub fn relevant_to(&self, text: &str) -> Vec<GlossaryEntry> {
        relevant(self.entries.iter(), text)
    }
}

/// Where a proposal came from
#[derive(Debug, Clone, Default)]
pub struct ProposalContext {
    pub segment_id: String,
    pub chapter_ordinal: usize,
    pub kind: TermKind,
}

/// Answer to a proposal
#[derive(Debug, Clone, PartialEq)]
pub enum ProposalOutcome {
    /// New entry, now locked
    Accepted(GlossaryEntry),
    /// Same translation as the existing entry
    Confirmed,
    /// Existing entry wins
    Conflict { existing: GlossaryEntry },
    /// Empty or self-referential proposal
    Rejected,
}

enum Command {
    Seed {
        entries: Vec<GlossaryEntry>,
        reply: oneshot::Sender<Result<usize, TranslationError>>,
    },
    Propose {
        source_term: String,
        candidate: String,
        context: ProposalContext,
        reply: oneshot::Sender<ProposalOutcome>,
    },
}

/// Shared handle to the glossary
#[derive(Clone)]
pub struct GlossaryMemory {
    commands: mpsc::UnboundedSender<Command>,
    current: Arc<RwLock<Arc<GlossarySnapshot>>>,
}

impl std::fmt::Debug for GlossaryMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlossaryMemory")
            .field("entries", &self.snapshot().len())
            .finish()
    }
}

struct Writer {
    commands: mpsc::UnboundedReceiver<Command>,
    current: Arc<RwLock<Arc<GlossarySnapshot>>>,
    events: EventBus,
    reported_conflicts: HashSet<(String, String)>,
}

impl Writer {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Seed { entries, reply } => {
                    let _ = reply.send(self.seed(entries));
                }
                Command::Propose { source_term, candidate, context, reply } => {
                    let _ = reply.send(self.propose(&source_term, &candidate, context));
                }
            }
        }
        debug!("Glossary writer stopped");
    }

    fn publish(&self, snapshot: GlossarySnapshot) {
        *self.current.write() = Arc::new(snapshot);
    }

    fn seed(&mut self, entries: Vec<GlossaryEntry>) -> Result<usize, TranslationError> {
        let current = self.current.read().clone();
        if current.seeded {
            return Err(TranslationError::Internal("glossary seeded twice".to_string()));
        }
        let mut map = current.entries.clone();
        for mut entry in entries {
            if entry.source_term.is_empty() || entry.target_term.is_empty() {
                continue;
            }
            entry.locked = true;
            entry.origin = None;
            // first seed entry for a term wins, like any later proposal
            map.entry(term_key(&entry.source_term)).or_insert(entry);
        }
        let count = map.len();
        self.publish(GlossarySnapshot::from_entries(map, true));
        Ok(count)
    }

    fn propose(&mut self, source_term: &str, candidate: &str, context: ProposalContext) -> ProposalOutcome {
        let source_term = source_term.trim();
        let candidate = candidate.trim();
        if source_term.is_empty() || candidate.is_empty() {
            return ProposalOutcome::Rejected;
        }

        let current = self.current.read().clone();
        if let Some(existing) = current.lookup(source_term) {
            if same_target(&existing.target_term, candidate) {
                return ProposalOutcome::Confirmed;
            }
            let pair = (term_key(source_term), candidate.to_lowercase());
            if self.reported_conflicts.insert(pair) {
                warn!(
                    "Glossary conflict for '{}': keeping '{}', model proposed '{}'",
                    source_term, existing.target_term, candidate
                );
                self.events.publish(EventKind::GlossaryConflict {
                    source_term: existing.source_term.clone(),
                    existing_target: existing.target_term.clone(),
                    proposed_target: candidate.to_string(),
                });
            }
            return ProposalOutcome::Conflict { existing: existing.clone() };
        }

        let mut entry = GlossaryEntry::new(source_term, candidate, context.kind);
        entry.locked = true;
        entry.origin = Some(context.chapter_ordinal);
        entry.notes = Some(format!("first seen in segment {}", context.segment_id));

        let mut map = current.entries.clone();
        map.insert(term_key(source_term), entry.clone());
        self.publish(GlossarySnapshot::from_entries(map, current.seeded));

        debug!("Glossary accepted '{}' -> '{}'", entry.source_term, entry.target_term);
        self.events.publish(EventKind::GlossaryProposed {
            source_term: entry.source_term.clone(),
            target_term: entry.target_term.clone(),
        });
        ProposalOutcome::Accepted(entry)
    }
}

impl GlossaryMemory {
    /// Start the writer task; must be called inside a tokio runtime
    pub fn spawn(events: EventBus) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let current = Arc::new(RwLock::new(Arc::new(GlossarySnapshot::default())));
        let writer = Writer {
            commands: rx,
            current: current.clone(),
            events,
            reported_conflicts: HashSet::new(),
        };
        tokio::spawn(writer.run());
        Self { commands: tx, current }
    }

    /// Install the preparation seed; allowed once per run
    pub async fn seed(&self, entries: Vec<GlossaryEntry>) -> Result<usize, TranslationError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Seed { entries, reply })
            .map_err(|_| TranslationError::Internal("glossary writer is gone".to_string()))?;
        rx.await
            .map_err(|_| TranslationError::Internal("glossary writer dropped a reply".to_string()))?
    }

    /// Offer a translation for a term; the existing entry always wins
    pub async fn propose(
        &self,
        source_term: &str,
        candidate: &str,
        context: ProposalContext,
    ) -> Result<ProposalOutcome, TranslationError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Propose {
                source_term: source_term.to_string(),
                candidate: candidate.to_string(),
                context,
                reply,
            })
            .map_err(|_| TranslationError::Internal("glossary writer is gone".to_string()))?;
        rx.await
            .map_err(|_| TranslationError::Internal("glossary writer dropped a reply".to_string()))
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<GlossarySnapshot> {
        self.current.read().clone()
    }

    pub fn lookup(&self, term: &str) -> Option<GlossaryEntry> {
        self.snapshot().lookup(term).cloned()
    }

    pub fn digest(&self) -> String {
        self.snapshot().digest().to_string()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

/// Replace a rejected rendering with the canonical one
pub fn enforce_canonical(translation: &str, rejected: &str, canonical: &str) -> String {
    if rejected.trim().is_empty() {
        return translation.to_string();
    }
    translation.replace(rejected.trim(), canonical.trim())
}
