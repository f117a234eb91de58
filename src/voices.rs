use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::http::{send_with_retry, RetryPolicy};
use crate::persona::{Persona, VoiceTable, PLACEHOLDER_PREFIX};
use crate::transcript::DialogueLine;

const SERVICE: &str = "tts";

/// Voice used when the provider catalog cannot be reached.
pub const DEFAULT_VOICE_ID: &str = "en_us_002";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VoiceInfo {
    pub voice_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VoiceListing {
    voices: Vec<VoiceInfo>,
}

#[async_trait]
pub trait VoiceCatalog: Send + Sync {
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>>;
}

pub struct HttpVoiceCatalog {
    client: Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl HttpVoiceCatalog {
    pub fn new(client: Client, api_key: String, base_url: String, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_key,
            base_url,
            retry,
        }
    }
}

#[async_trait]
impl VoiceCatalog for HttpVoiceCatalog {
    async fn list_voices(&self) -> Result<Vec<VoiceInfo>> {
        let url = format!("{}/voices", self.base_url.trim_end_matches('/'));
        debug!("Listing voices from {}", url);
        let request = self.client.get(&url).bearer_auth(&self.api_key);
        let resp = send_with_retry(request, &self.retry, SERVICE).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("failed to read body: {e}")))?;
        parse_voice_listing(&body)
    }
}

fn parse_voice_listing(body: &str) -> Result<Vec<VoiceInfo>> {
    let listing: VoiceListing = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed(SERVICE, format!("voice listing: {e}")))?;
    Ok(listing.voices)
}

/// Picks the first catalog voice as the fallback for unmapped personas.
/// Any failure is reported as `VoiceCatalogUnavailable`.
pub async fn resolve_fallback_voice(catalog: &dyn VoiceCatalog) -> Result<String> {
    let voices = catalog
        .list_voices()
        .await
        .map_err(|e| PipelineError::VoiceCatalogUnavailable(e.to_string()))?;
    let first = voices
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::VoiceCatalogUnavailable("catalog is empty".to_string()))?;
    info!("Fallback voice from catalog: {}", first.voice_id);
    Ok(first.voice_id)
}

fn is_usable(voice_id: &str) -> bool {
    let trimmed = voice_id.trim();
    !trimmed.is_empty() && !trimmed.starts_with(PLACEHOLDER_PREFIX)
}

pub fn voice_for(table: &VoiceTable, persona: Persona, fallback: &str) -> String {
    match table.get(persona) {
        Some(id) if is_usable(id) => id.trim().to_string(),
        _ => fallback.to_string(),
    }
}

/// Binds every line to exactly one concrete voice id, in line order.
pub fn bind_voices(lines: &[DialogueLine], table: &VoiceTable, fallback: &str) -> Vec<String> {
    lines
        .iter()
        .map(|line| voice_for(table, line.speaker, fallback))
        .collect()
}
