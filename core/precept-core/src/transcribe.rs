//! Speech-to-text for voice clips.

use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::TranscriptionConfig;
use crate::error::{PreceptError, Result};

pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &Path) -> Result<String>;
}

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct WhisperHttpTranscriber {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl WhisperHttpTranscriber {
    /// Returns `None` when no API key is configured.
    pub fn from_config(config: &TranscriptionConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| {
                PreceptError::Transcription(format!("failed to build HTTP client: {err}"))
            })?;
        Ok(Some(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
        }))
    }
}

impl Transcriber for WhisperHttpTranscriber {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        let form = reqwest::blocking::multipart::Form::new()
            .text("model", self.model.clone())
            .file("file", audio)
            .map_err(|err| PreceptError::io("read audio clip", err))?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|err| PreceptError::Transcription(format!("request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(PreceptError::Transcription(format!(
                "status {}: {}",
                status.as_u16(),
                body.chars().take(240).collect::<String>()
            )));
        }

        let payload = response
            .json::<serde_json::Value>()
            .map_err(|err| PreceptError::Transcription(format!("invalid response: {err}")))?;
        payload
            .get("text")
            .and_then(serde_json::Value::as_str)
            .map(|text| text.trim().to_string())
            .ok_or_else(|| PreceptError::Transcription("response missing text".to_string()))
    }
}

/// Runs one transcription as a non-cancellable span: the caller blocks until
/// it completes or fails, and no other event for the session is handled in
/// between.
pub fn transcribe_to_completion(transcriber: &dyn Transcriber, audio: &Path) -> Result<String> {
    let span = tracing::info_span!(
        "transcription",
        audio = %audio.display(),
        cancellable = false
    );
    let _entered = span.enter();
    let started = Instant::now();

    let outcome = transcriber.transcribe(audio);
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        Ok(text) => tracing::info!(elapsed_ms, chars = text.chars().count(), "Transcription finished"),
        Err(err) => tracing::error!(elapsed_ms, error = %err, "Transcription failed"),
    }
    outcome
}
