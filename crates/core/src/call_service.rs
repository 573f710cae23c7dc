//! AI call service (spec §4.4): the narrow waist every unit of AI work
//! flows through.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use thiserror::Error;

use crate::adapter::{Adapter, AICallOptions, AIResponse};
use crate::config::RetryConfig;
use crate::retry::{backoff_delay, classify, RetryClassification};
use crate::supervisor::{InvokeParams, Supervisor};
use crate::telemetry::{FileRead, TelemetryEntry, TelemetryRecorder};
use crate::trace::{TraceEventKind, TraceRecorder};

/// The error taxonomy of spec §7, as surfaced by the call service.
#[derive(Debug, Error, Clone)]
pub enum CallError {
    #[error("no AI CLI found: {0}")]
    CliNotFound(String),
    #[error("subprocess failed to spawn: {0}")]
    SubprocessSpawnError(String),
    #[error("subprocess exited non-zero: {0}")]
    SubprocessError(String),
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("rate limited after exhausting retries: {0}")]
    RateLimit(String),
    #[error("adapter extracted no text: {0}")]
    ParseError(String),
    #[error("output buffer exceeded cap")]
    BufferExceeded,
}

impl CallError {
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::CliNotFound(_) => CallErrorKind::CliNotFound,
            CallError::SubprocessSpawnError(_) => CallErrorKind::SubprocessSpawnError,
            CallError::SubprocessError(_) => CallErrorKind::SubprocessError,
            CallError::Timeout(_) => CallErrorKind::Timeout,
            CallError::RateLimit(_) => CallErrorKind::RateLimit,
            CallError::ParseError(_) => CallErrorKind::ParseError,
            CallError::BufferExceeded => CallErrorKind::BufferExceeded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallErrorKind {
    CliNotFound,
    SubprocessSpawnError,
    SubprocessError,
    Timeout,
    RateLimit,
    ParseError,
    BufferExceeded,
}

/// Per-call environment: heap ceiling, thread-pool size, background-task
/// disable (spec §6 Process environment contract). The parent environment
/// is preserved otherwise.
pub fn child_env(heap_mb: u64) -> HashMap<String, String> {
    let mut env: HashMap<String, String> = std::env::vars().collect();
    env.insert("FIELDNOTES_CHILD_HEAP_MB".to_string(), heap_mb.to_string());
    env.insert("FIELDNOTES_CHILD_WORKER_THREADS".to_string(), "1".to_string());
    env.insert("FIELDNOTES_CHILD_BACKGROUND_TASKS".to_string(), "0".to_string());
    env
}

/// Wraps an [`Adapter`], the [`Supervisor`], and the retry controller,
/// emitting telemetry and trace events for every call (spec §4.4).
pub struct AiCallService {
    supervisor: Supervisor,
    telemetry: Arc<TelemetryRecorder>,
    trace: Arc<dyn TraceRecorder>,
    retry_config: RetryConfig,
    cwd: PathBuf,
}

impl AiCallService {
    pub fn new(
        telemetry: Arc<TelemetryRecorder>,
        trace: Arc<dyn TraceRecorder>,
        retry_config: RetryConfig,
        cwd: PathBuf,
    ) -> Self {
        Self {
            supervisor: Supervisor::new(),
            telemetry,
            trace,
            retry_config,
            cwd,
        }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Execute one unit of AI work through `adapter`, under the retry
    /// controller, recording telemetry and trace events (spec §4.4's
    /// nine-step pipeline).
    pub async fn call(
        &self,
        adapter: &dyn Adapter,
        options: AICallOptions,
        timeout: Duration,
        heap_mb: u64,
    ) -> Result<AIResponse, CallError> {
        let mut attempt = 0u32;
        let start = Instant::now();

        loop {
            let argv = adapter.build_args(&options);
            let stdin_bytes = adapter.compose_stdin_input(&options);

            self.trace.emit(
                TraceEventKind::SubprocessSpawn,
                json!({"adapter": adapter.name(), "attempt": attempt}),
            );

            let params = InvokeParams {
                command: PathBuf::from(adapter.cli_command()),
                args: argv,
                stdin_bytes,
                timeout,
                cwd: self.cwd.clone(),
                env: child_env(heap_mb),
            };

            let invoke_result = match self.supervisor.invoke(params).await {
                Err(e) => {
                    let err = CallError::SubprocessSpawnError(e.to_string());
                    self.record_failure(&err, attempt, start.elapsed());
                    return Err(err);
                }
                Ok(r) => r,
            };

            self.trace.emit(
                TraceEventKind::SubprocessExit,
                json!({
                    "exit_code": invoke_result.exit_code,
                    "timed_out": invoke_result.timed_out,
                }),
            );

            let stderr_text = String::from_utf8_lossy(&invoke_result.stderr).to_string();

            if invoke_result.buffer_exceeded {
                let err = CallError::BufferExceeded;
                self.record_failure(&err, attempt, start.elapsed());
                return Err(err);
            }

            if invoke_result.timed_out {
                let err = CallError::Timeout(timeout);
                self.record_failure(&err, attempt, start.elapsed());
                return Err(err);
            }

            if classify(&stderr_text) == RetryClassification::RateLimit {
                if attempt >= self.retry_config.max_retries {
                    let err = CallError::RateLimit(stderr_text);
                    self.record_failure(&err, attempt, start.elapsed());
                    return Err(err);
                }
                self.trace.emit(
                    TraceEventKind::Retry,
                    json!({"attempt": attempt, "reason": "rate_limit"}),
                );
                let delay = backoff_delay(&self.retry_config, attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            if invoke_result.exit_code != Some(0) {
                let err = CallError::SubprocessError(stderr_text);
                self.record_failure(&err, attempt, start.elapsed());
                return Err(err);
            }

            let exit_code = invoke_result.exit_code.unwrap_or(-1);
            let wall_ms = invoke_result.wall_clock.as_millis() as u64;

            return match adapter.parse_response(&invoke_result.stdout, wall_ms, exit_code) {
                Ok(response) => {
                    self.record_success(&response, attempt, &options);
                    Ok(response)
                }
                Err(e) => {
                    let err = CallError::ParseError(e.to_string());
                    self.record_failure(&err, attempt, start.elapsed());
                    Err(err)
                }
            };
        }
    }

    /// Append a list of `{path, byteSize}` pairs to the most recent
    /// telemetry entry (spec §4.4 `amendLastEntry`).
    pub fn amend_last_entry(&self, files_read: Vec<FileRead>) {
        self.telemetry.amend_last_entry(files_read);
    }

    fn record_success(&self, response: &AIResponse, retry_count: u32, options: &AICallOptions) {
        self.telemetry.record(TelemetryEntry {
            timestamp: chrono::Utc::now(),
            input_descriptor: options.task_label.clone().unwrap_or_default(),
            response_text: response.text.clone(),
            model: response.model.clone(),
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            cache_read_tokens: response.cache_read_tokens,
            cache_creation_tokens: response.cache_creation_tokens,
            latency_ms: response.duration_ms,
            exit_code: response.exit_code,
            error_kind: None,
            error_message: None,
            retry_count,
            files_read: Vec::new(),
        });
    }

    fn record_failure(&self, error: &CallError, retry_count: u32, elapsed: Duration) {
        self.telemetry.record(TelemetryEntry {
            timestamp: chrono::Utc::now(),
            input_descriptor: String::new(),
            response_text: String::new(),
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            latency_ms: elapsed.as_millis() as u64,
            exit_code: -1,
            error_kind: Some(format!("{:?}", error.kind())),
            error_message: Some(error.to_string()),
            retry_count,
            files_read: Vec::new(),
        });
    }
}
