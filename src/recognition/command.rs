//! Offline fallback backend: local transcriber process.
//!
//! Runs a configured executable per chunk with the WAV body on stdin and
//! reads the recognized text from stdout (the contract of whisper.cpp-style
//! CLI transcribers). No network involved, which is the point: this is the
//! retry target when the primary service is unreachable.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::debug;

use super::{RecognitionBackend, RecognitionError};

#[derive(Debug, Clone)]
pub struct CommandBackendConfig {
    /// Transcriber executable. Must read a WAV file from stdin and print
    /// the transcription to stdout.
    pub program: PathBuf,
    /// Extra arguments passed on every invocation.
    pub args: Vec<String>,
}

impl CommandBackendConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

pub struct CommandBackend {
    config: CommandBackendConfig,
}

impl CommandBackend {
    pub fn new(config: CommandBackendConfig) -> Self {
        Self { config }
    }
}

impl RecognitionBackend for CommandBackend {
    fn recognize(&self, wav: &[u8], _sample_rate: u32) -> Result<String, RecognitionError> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                RecognitionError::Unreachable(format!(
                    "failed to spawn {}: {e}",
                    self.config.program.display()
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(wav)
                .map_err(|e| RecognitionError::Unreachable(format!("stdin write: {e}")))?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .map_err(|e| RecognitionError::Unreachable(format!("wait: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RecognitionError::Unreachable(format!(
                "transcriber exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        let trimmed = text.trim();
        debug!(chars = trimmed.len(), "offline transcriber finished");
        if trimmed.is_empty() {
            Err(RecognitionError::Unrecognized)
        } else {
            Ok(trimmed.to_string())
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}
