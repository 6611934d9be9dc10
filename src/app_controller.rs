use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app_config::Config;
use crate::file_utils::FileManager;
use crate::providers::{Provider, build_provider};
use crate::translation::document::{Document, reader_for, writer_for};
use crate::translation::events::{DEFAULT_EVENT_CAPACITY, EventBus, EventKind};
use crate::translation::report::RunStatus;
use crate::translation::{PreparationPass, RunOutcome, TranslationCache, TranslationPipeline, VerificationPass};

// @module: Application controller for ebook translation

// Bar currently on screen; the console logger prints through it
static PROGRESS_BAR: Lazy<Mutex<Option<ProgressBar>>> = Lazy::new(|| Mutex::new(None));

/// Progress bar currently on screen, if any
pub fn active_progress_bar() -> Option<ProgressBar> {
    PROGRESS_BAR.lock().clone()
}

/// One translate invocation
#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub input: PathBuf,
    /// Defaults to `<stem>.<target>.<ext>` next to the input
    pub output: Option<PathBuf>,
    /// NDJSON event log
    pub events: Option<PathBuf>,
    pub show_progress: bool,
}

impl TranslateRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: None,
            events: None,
            show_progress: false,
        }
    }
}

/// Main application controller for ebook translation
pub struct Controller {
    // @field: App configuration
    config: Arc<Config>,
}

impl Controller {
    // @method: Create a new controller with the given configuration
    pub fn with_config(config: Config) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load a JSON configuration file
    pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let bytes = FileManager::read_bytes(path)?;
        serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Write the default configuration, refusing to overwrite an existing file
    pub fn write_default_config<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        if path.exists() {
            return Err(anyhow!("Config file already exists: {:?}", path));
        }
        let config = Config::default();
        let json = serde_json::to_string_pretty(&config).context("Failed to serialize default config to JSON")?;
        FileManager::write_atomic(path, json.as_bytes())?;
        Ok(config)
    }

    /// Output path for a request
    pub fn output_path_for(&self, request: &TranslateRequest) -> Result<PathBuf> {
        if let Some(output) = &request.output {
            return Ok(output.clone());
        }
        let format = FileManager::detect_format(&request.input)?;
        let dir = match request.input.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok(FileManager::generate_output_path(
            &request.input,
            dir,
            &self.config.run.target_language,
            format.extension(),
        ))
    }

    /// Read, translate and write one book
    pub async fn run(&self, request: &TranslateRequest, cancel: CancellationToken) -> Result<RunOutcome> {
        let provider = build_provider(&self.config.provider, &self.config.fallbacks)?;
        self.run_with_provider(request, provider, cancel).await
    }

    /// Same as `run` with an already built provider
    pub async fn run_with_provider(
        &self,
        request: &TranslateRequest,
        provider: Arc<dyn Provider>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let start_time = std::time::Instant::now();

        if !FileManager::file_exists(&request.input) {
            return Err(anyhow!("Input file does not exist: {:?}", request.input));
        }
        let input_format = FileManager::detect_format(&request.input)?;
        let reader = reader_for(input_format)?;
        let output = self.output_path_for(request)?;
        // fail on an unsupported output format before paying for a run
        let writer = writer_for(FileManager::detect_format(&output)?)?;

        let bytes = FileManager::read_bytes(&request.input)?;
        let document = reader.parse(&bytes, Some(input_format.extension()))?;
        info!(
            "Read {:?}: {} chapters, {} blocks",
            request.input,
            document.chapters.len(),
            document.blocks().count()
        );
        if document.chapters.is_empty() {
            warn!("Document has no chapters, writing it unchanged");
        }

        let cache = Arc::new(TranslationCache::open(&self.config.cache)?);
        let events = EventBus::new(uuid::Uuid::new_v4().to_string(), DEFAULT_EVENT_CAPACITY);
        let sinks_done = CancellationToken::new();
        let mut sinks = Vec::new();
        if let Some(path) = &request.events {
            sinks.push(Self::spawn_event_log(&events, path.clone(), sinks_done.clone()));
        }
        if request.show_progress {
            sinks.push(Self::spawn_progress(&events, &document, sinks_done.clone()));
        }

        let preparation = PreparationPass::new(Arc::clone(&self.config), Arc::clone(&provider), Arc::clone(&cache));
        let plan = match preparation.run(&document, &cancel).await {
            Ok(plan) => plan,
            Err(e) => {
                events.publish(EventKind::RunFailed {
                    errors: vec![e.to_string()],
                });
                Self::stop_sinks(sinks_done, sinks).await;
                provider.shutdown(self.grace()).await;
                return Err(anyhow!(e).context("Preparation pass failed"));
            }
        };
        debug!(
            "Work plan: {} glossary entries, {} chapter hints, ~{} tokens",
            plan.glossary_seed.len(),
            plan.per_chapter_hints.len(),
            plan.estimated_tokens
        );

        let pipeline = TranslationPipeline::new(
            Arc::clone(&self.config),
            Arc::clone(&provider),
            Arc::clone(&cache),
            events.clone(),
            cancel.clone(),
        );
        let mut outcome = pipeline.run(&document, &plan).await;
        if let Ok(outcome) = outcome.as_mut() {
            self.verify(&document, outcome, &provider, &cancel).await;
        }
        provider.shutdown(self.grace()).await;
        Self::stop_sinks(sinks_done, sinks).await;
        let outcome = outcome?;

        let translated = writer.write(&outcome.document)?;
        FileManager::write_atomic(&output, &translated)?;
        let report_path = FileManager::report_path_for(&output);
        let report = outcome.report.to_pretty_json().context("Failed to serialize run report")?;
        FileManager::write_atomic(&report_path, report.as_bytes())?;

        match outcome.status() {
            RunStatus::Completed => info!("Success: {:?}", output),
            RunStatus::Cancelled => warn!("Run cancelled, partial output written to {:?}", output),
            RunStatus::Failed => error!("Run failed, partial output written to {:?}", output),
        }
        info!("{}", outcome.report.stats.summary(start_time.elapsed()));
        info!("Report: {:?}", report_path);
        Ok(outcome)
    }

    /// Optional verification and polish of a completed run
    async fn verify(
        &self,
        source: &Document,
        outcome: &mut RunOutcome,
        provider: &Arc<dyn Provider>,
        cancel: &CancellationToken,
    ) {
        if !self.config.verification.enabled || outcome.status() != RunStatus::Completed {
            return;
        }
        let pass = VerificationPass::new(Arc::clone(&self.config), Arc::clone(provider));
        match pass.run(source, &mut outcome.document, cancel).await {
            Ok(report) => outcome.report.verification = Some(report),
            Err(e) => {
                warn!("Verification pass stopped: {}", e);
                outcome.report.warnings.push(format!("verification pass stopped: {}", e));
            }
        }
    }

    fn grace(&self) -> Duration {
        Duration::from_secs(self.config.run.cancel_grace_seconds)
    }

    async fn stop_sinks(done: CancellationToken, sinks: Vec<JoinHandle<()>>) {
        done.cancel();
        for sink in sinks {
            if let Err(e) = sink.await {
                warn!("Event sink stopped abnormally: {}", e);
            }
        }
    }

    /// Append every event to `path` as one JSON line
    fn spawn_event_log(events: &EventBus, path: PathBuf, done: CancellationToken) -> JoinHandle<()> {
        let mut subscriber = events.subscribe();
        tokio::spawn(async move {
            let write = |line: String| {
                if let Err(e) = FileManager::append_line(&path, &line) {
                    warn!("Failed to write event log {:?}: {}", path, e);
                }
            };
            loop {
                tokio::select! {
                    event = subscriber.recv() => match event {
                        Some(event) => write(event.to_json_line()),
                        None => break,
                    },
                    _ = done.cancelled() => {
                        for event in subscriber.drain() {
                            write(event.to_json_line());
                        }
                        break;
                    }
                }
            }
            if subscriber.dropped() > 0 {
                warn!("Event log missed {} events", subscriber.dropped());
            }
        })
    }

    /// Progress bar driven by segment and chapter events
    fn spawn_progress(events: &EventBus, document: &Document, done: CancellationToken) -> JoinHandle<()> {
        let mut subscriber = events.subscribe();
        let chapters = document.chapters.len();
        let blocks = document.blocks().filter(|b| b.needs_translation()).count() as u64;
        tokio::spawn(async move {
            let bar = ProgressBar::new(blocks);
            let style = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({percent}%) {msg} {eta}")
                .or_else(|_| ProgressStyle::default_bar().template("{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}"))
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style.progress_chars("█▓▒░"));
            *PROGRESS_BAR.lock() = Some(bar.clone());
            let mut finished = 0;

            let mut handle = |kind: EventKind| match kind {
                EventKind::SegmentCompleted { .. } => {
                    // split segments report more parts than there were blocks
                    if bar.position() >= bar.length().unwrap_or(0) {
                        bar.inc_length(1);
                    }
                    bar.inc(1);
                }
                EventKind::ChapterCompleted { .. } => {
                    finished += 1;
                    bar.set_message(format!("chapter {}/{}", finished, chapters));
                }
                _ => {}
            };
            loop {
                tokio::select! {
                    event = subscriber.recv() => match event {
                        Some(event) => handle(event.kind),
                        None => break,
                    },
                    _ = done.cancelled() => {
                        for event in subscriber.drain() {
                            handle(event.kind);
                        }
                        break;
                    }
                }
            }
            PROGRESS_BAR.lock().take();
            bar.finish_and_clear();
        })
    }
}
