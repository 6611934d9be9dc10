// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{Shell, generate};
use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError, info, warn};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use litwai::app_config::{self, Config, ProviderConfig, ProviderId};
use litwai::app_controller::{Controller, TranslateRequest, active_progress_bar};
use litwai::language_utils::Script;
use litwai::translation::RunStatus;

/// CLI wrapper for ProviderId to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliProvider {
    Openai,
    Anthropic,
    Ollama,
    Local,
    Remote,
}

impl From<CliProvider> for ProviderId {
    fn from(cli_provider: CliProvider) -> Self {
        match cli_provider {
            CliProvider::Openai => ProviderId::HostedChat,
            CliProvider::Anthropic => ProviderId::HostedChatAlt1,
            CliProvider::Ollama => ProviderId::HostedChatAlt2,
            CliProvider::Local => ProviderId::LocalInference,
            CliProvider::Remote => ProviderId::RemoteInference,
        }
    }
}

/// CLI wrapper for Script
#[derive(Debug, Clone, ValueEnum)]
enum CliScript {
    Latin,
    Cyrillic,
}

impl From<CliScript> for Script {
    fn from(script: CliScript) -> Self {
        match script {
            CliScript::Latin => Script::Latin,
            CliScript::Cyrillic => Script::Cyrillic,
        }
    }
}

/// CLI wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

fn level_filter(level: &app_config::LogLevel) -> LevelFilter {
    match level {
        app_config::LogLevel::Error => LevelFilter::Error,
        app_config::LogLevel::Warn => LevelFilter::Warn,
        app_config::LogLevel::Info => LevelFilter::Info,
        app_config::LogLevel::Debug => LevelFilter::Debug,
        app_config::LogLevel::Trace => LevelFilter::Trace,
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate an ebook
    Translate(TranslateArgs),

    /// Generate shell completions for litwai
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Write a default configuration file
    InitConfig {
        /// Where to write it
        #[arg(value_name = "PATH", default_value = "conf.json")]
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
struct TranslateArgs {
    /// Input book (.txt or .json)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file; defaults to <stem>.<target>.<ext> next to the input
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, default_value = "conf.json")]
    config_path: PathBuf,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language tag, or 'auto'
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language tag (e.g., 'sr', 'de', 'pt-BR')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Script the output must be written in
    #[arg(long, value_enum)]
    target_script: Option<CliScript>,

    /// Neither read nor write the translation cache
    #[arg(long)]
    no_cache: bool,

    /// Skip the preparation pass and use the heuristic plan
    #[arg(long)]
    no_preparation: bool,

    /// Provider tried when the previous one fails; repeat for more
    #[arg(long, value_enum, value_name = "PROVIDER")]
    fallback: Vec<CliProvider>,

    /// Check the finished book and polish blocks that fail the check
    #[arg(long)]
    verify: bool,

    /// Append progress events to this file as NDJSON
    #[arg(long, value_name = "FILE")]
    events: Option<PathBuf>,

    /// Set logging level
    #[arg(short, long, value_enum)]
    log_level: Option<CliLogLevel>,
}

/// LitwAI - Literary translation with AI
///
/// Translates whole ebooks chapter by chapter while keeping names, terms and
/// style consistent across the book.
#[derive(Parser, Debug)]
#[command(name = "litwai")]
#[command(version)]
#[command(about = "AI-powered ebook translation tool")]
#[command(long_about = "LitwAI translates ebooks with AI providers, one budget-sized segment at a time.

EXAMPLES:
    litwai translate novel.txt -t sr --target-script cyrillic
    litwai translate novel.json -p anthropic -m claude-sonnet-4 -t de
    litwai translate novel.txt -t fr --events run.ndjson
    litwai translate novel.txt -t sr --fallback ollama --verify
    litwai init-config conf.json
    litwai completions bash > litwai.bash

CONFIGURATION:
    Configuration is read from conf.json by default. If the file doesn't exist,
    a default one is created. Credentials can also come from LITWAI_API_KEY.

SUPPORTED PROVIDERS:
    openai    - OpenAI-compatible chat completions (requires API key)
    anthropic - Anthropic messages API (requires API key)
    ollama    - Local Ollama server
    local     - llama.cpp style executable run as a subprocess
    remote    - HTTP inference worker")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(CustomLogger { level: LevelFilter::Trace }))?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI color for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let line = format!(
                "{}{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
            // keep the bar intact while it is drawn
            match active_progress_bar() {
                Some(bar) => bar.println(line),
                None => {
                    let _ = writeln!(std::io::stderr(), "{}", line);
                }
            }
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Info by default; the config or --log-level may change it later
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();
    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "litwai", &mut std::io::stdout());
            Ok(())
        }
        Commands::InitConfig { path } => {
            Controller::write_default_config(&path)?;
            info!("Default configuration written to {:?}", path);
            Ok(())
        }
        Commands::Translate(args) => run_translate(args).await,
    }
}

/// Config file plus command line overrides
fn load_config(options: &TranslateArgs) -> Result<Config> {
    let mut config = if options.config_path.exists() {
        Controller::load_config(&options.config_path)?
    } else {
        warn!("Config file not found at {:?}, creating default config.", options.config_path);
        Controller::write_default_config(&options.config_path)?
    };

    if let Some(provider) = &options.provider {
        let id: ProviderId = provider.clone().into();
        if id != config.provider.provider_id {
            config.provider = ProviderConfig::new(id);
        }
    }
    if let Some(model) = &options.model {
        config.provider.model = model.clone();
    }
    if let Some(source) = &options.source_language {
        config.run.source_language = source.clone();
    }
    if let Some(target) = &options.target_language {
        config.run.target_language = target.clone();
    }
    if let Some(script) = &options.target_script {
        config.run.target_script = Some(script.clone().into());
    }
    if options.no_cache {
        config.cache.enabled = false;
    }
    if options.no_preparation {
        config.preparation.enabled = false;
    }
    if !options.fallback.is_empty() {
        config.fallbacks = options
            .fallback
            .iter()
            .map(|p| ProviderConfig::new(p.clone().into()))
            .collect();
    }
    if options.verify {
        config.verification.enabled = true;
    }
    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }
    Ok(config)
}

async fn run_translate(options: TranslateArgs) -> Result<()> {
    let config = load_config(&options)?;
    log::set_max_level(level_filter(&config.log_level));

    let controller = Controller::with_config(config)?;
    let request = TranslateRequest {
        input: options.input.clone(),
        output: options.output.clone(),
        events: options.events.clone(),
        show_progress: true,
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight work and writing partial output");
            on_signal.cancel();
        }
    });

    let outcome = controller.run(&request, cancel).await?;
    match outcome.status() {
        RunStatus::Failed => Err(anyhow!("Translation failed: {}", outcome.errors.join("; "))),
        RunStatus::Completed | RunStatus::Cancelled => Ok(()),
    }
}
