/*!
 * Local inference through a llama.cpp-style command line binary.
 *
 * Each call starts the binary with the prompt as an argument and reads the
 * completion from stdout. The child is killed if the call is dropped, which
 * is how cancellation and timeouts reach it.
 */

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use crate::app_config::{ProviderConfig, ProviderId};
use crate::errors::{ProviderError, TranslationError};
use crate::providers::{Completion, GenerationParams, InFlightTracker, Prompt, Provider, ProviderCapabilities};
use crate::translation::segmenter::estimate_tokens;

#[derive(Debug)]
pub struct LocalInference {
    executable: PathBuf,
    /// Model file passed with -m
    model: String,
    threads: usize,
    gpu_layers: u32,
    extra_args: Vec<String>,
    capabilities: ProviderCapabilities,
    in_flight: InFlightTracker,
}

impl LocalInference {
    pub fn from_config(config: &ProviderConfig) -> Result<Self, TranslationError> {
        let executable = config
            .executable
            .clone()
            .ok_or_else(|| TranslationError::Configuration("localInference needs an executable".to_string()))?;
        Ok(Self {
            executable,
            model: config.model.clone(),
            threads: config.threads.max(1),
            gpu_layers: config.gpu_layers,
            extra_args: config.extra_args.clone(),
            capabilities: ProviderCapabilities::for_config(config),
            in_flight: InFlightTracker::default(),
        })
    }

    /// Command line for one call
    pub fn build_args(&self, prompt: &str, params: &GenerationParams) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.model.clone(),
            "-p".to_string(),
            prompt.to_string(),
            "-n".to_string(),
            params.max_output_tokens.to_string(),
            "-t".to_string(),
            self.threads.to_string(),
            "-c".to_string(),
            self.capabilities.max_context_tokens.to_string(),
            "--temp".to_string(),
            format!("{:.2}", params.temperature),
            "--top-p".to_string(),
            "0.9".to_string(),
            "--top-k".to_string(),
            "40".to_string(),
            "--repeat-penalty".to_string(),
            "1.1".to_string(),
            "--no-display-prompt".to_string(),
        ];
        if self.gpu_layers > 0 {
            args.push("-ngl".to_string());
            args.push(self.gpu_layers.to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Map a failed run onto the taxonomy
    fn classify_failure(status: Option<i32>, stderr: &str) -> ProviderError {
        let lower = stderr.to_lowercase();
        if ["context", "too long", "exceeds", "n_ctx"].iter().any(|p| lower.contains(p)) {
            ProviderError::ContextLengthExceeded(tail(stderr, 300))
        } else if ["failed to load model", "no such file", "unknown argument"].iter().any(|p| lower.contains(p)) {
            ProviderError::Configuration(tail(stderr, 300))
        } else {
            ProviderError::RequestFailed(format!("exit status {:?}: {}", status, tail(stderr, 300)))
        }
    }
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(max_chars)).collect::<String>().trim().to_string()
}

#[async_trait]
impl Provider for LocalInference {
    fn id(&self) -> ProviderId {
        ProviderId::LocalInference
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn translate_segment(&self, prompt: &Prompt, params: &GenerationParams) -> Result<Completion, ProviderError> {
        let _guard = self.in_flight.enter();
        let text = prompt.flattened();
        let args = self.build_args(&text, params);
        debug!("Running {:?} ({} prompt chars)", self.executable, text.len());

        let child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                    ProviderError::Configuration(format!("cannot run {:?}: {}", self.executable, e))
                }
                _ => ProviderError::RequestFailed(e.to_string()),
            })?;

        let output = tokio::time::timeout(params.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout(params.timeout))?
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(Self::classify_failure(output.status.code(), &stderr));
        }

        let mut result = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // some builds ignore --no-display-prompt
        if let Some(rest) = result.strip_prefix(text.trim()) {
            warn!("Local model echoed its prompt; stripping it");
            result = rest.trim().to_string();
        }
        Ok(Completion {
            tokens_in: estimate_tokens(&text) as u64,
            tokens_out: estimate_tokens(&result) as u64,
            text: result,
            refused: false,
        })
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.in_flight.wait_idle(grace).await {
            warn!("{} local inference processes still running at shutdown", self.in_flight.current());
        }
    }
}
