use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::http::{send_with_retry, RetryPolicy};
use crate::persona::Persona;
use crate::transcript::DialogueLine;

const SERVICE: &str = "tts";

/// A synthesized clip for one dialogue line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioArtifact {
    pub sequence_index: usize,
    pub file_path: PathBuf,
    pub speaker: Persona,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns the encoded mp3 bytes for `text` spoken by `voice_id`.
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;
}

pub struct HttpSpeechSynthesizer {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: Client, api_key: String, base_url: String, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_key,
            base_url,
            retry,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio_data: Option<String>,
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "input": text,
                "voice_id": voice_id,
                "audio_format": "mp3",
            }));
        let resp = send_with_retry(request, &self.retry, SERVICE).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("failed to read body: {e}")))?;
        decode_speech_response(&body)
    }
}

fn decode_speech_response(body: &str) -> Result<Vec<u8>> {
    let parsed: SpeechResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed(SERVICE, format!("speech response: {e}")))?;
    let encoded = parsed
        .audio_data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| PipelineError::upstream(SERVICE, None, "response carried no audio_data"))?;
    general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| PipelineError::malformed(SERVICE, format!("audio_data is not base64: {e}")))
}

pub fn artifact_file_name(speaker: Persona, sequence_index: usize) -> String {
    format!("{}-{}.mp3", speaker.id(), sequence_index)
}

/// Synthesizes one line into `out_dir`, named by speaker and index.
pub async fn synthesize_line(
    synth: &dyn SpeechSynthesizer,
    line: &DialogueLine,
    voice_id: &str,
    out_dir: &Path,
) -> Result<AudioArtifact> {
    debug!("Line {} ({}) -> voice {}: {}", line.sequence_index, line.speaker, voice_id, line.text);
    let audio = synth.synthesize(&line.text, voice_id).await?;
    let file_path = out_dir.join(artifact_file_name(line.speaker, line.sequence_index));
    tokio::fs::write(&file_path, &audio).await?;
    info!(
        "Wrote speech for line {} to {} ({} bytes)",
        line.sequence_index,
        file_path.display(),
        audio.len()
    );
    Ok(AudioArtifact {
        sequence_index: line.sequence_index,
        file_path,
        speaker: line.speaker,
    })
}
