use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::http::{send_with_retry, RetryPolicy};
use crate::persona::Persona;

const SERVICE: &str = "llm";

/// One spoken line of the generated dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueLine {
    pub speaker: Persona,
    pub text: String,
    pub sequence_index: usize,
}

#[async_trait]
pub trait TranscriptSource: Send + Sync {
    async fn generate(&self, topic: &str, speaker_a: Persona, speaker_b: Persona) -> Result<Vec<DialogueLine>>;
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_lines: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.5,
            max_tokens: 1024,
            max_lines: 14,
        }
    }
}

/// Chat-completion backed transcript writer.
pub struct LlmTranscriptGenerator {
    client: Client,
    api_key: String,
    settings: LlmSettings,
    retry: RetryPolicy,
}

impl LlmTranscriptGenerator {
    pub fn new(client: Client, api_key: String, settings: LlmSettings, retry: RetryPolicy) -> Self {
        Self {
            client,
            api_key,
            settings,
            retry,
        }
    }
}

#[async_trait]
impl TranscriptSource for LlmTranscriptGenerator {
    async fn generate(&self, topic: &str, speaker_a: Persona, speaker_b: Persona) -> Result<Vec<DialogueLine>> {
        info!(
            "Requesting transcript from {} ({} vs {})",
            self.settings.model, speaker_a, speaker_b
        );
        let body = chat_request_body(&self.settings, topic, speaker_a, speaker_b);

        let request = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body);
        let resp = send_with_retry(request, &self.retry, SERVICE).await?;
        let text = resp
            .text()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("failed to read body: {e}")))?;

        let content = completion_content(&text)?;
        debug!("Transcript payload: {}", content);
        let lines = parse_transcript(&content, speaker_a, speaker_b, self.settings.max_lines)?;
        info!("Transcript ready with {} lines", lines.len());
        Ok(lines)
    }
}

pub fn system_prompt(speaker_a: Persona, speaker_b: Persona) -> String {
    format!(
        "You are writing a short, comedic, over-the-top dialogue between two personas: \
         {a_name} (agentId \"{a}\") and {b_name} (agentId \"{b}\"). \
         Exaggerate each persona's well-known mannerisms, catchphrases and opinions. \
         Keep it to at most 7 exchanges and keep every line short enough to be spoken in a few seconds. \
         Respond ONLY with a JSON object of the form \
         {{\"transcript\": [{{\"agentId\": \"{a}\", \"text\": \"...\"}}, {{\"agentId\": \"{b}\", \"text\": \"...\"}}]}}. \
         The agentId of every entry must be exactly \"{a}\" or \"{b}\".",
        a = speaker_a.id(),
        b = speaker_b.id(),
        a_name = speaker_a.display_name(),
        b_name = speaker_b.display_name(),
    )
}

pub fn chat_request_body(
    settings: &LlmSettings,
    topic: &str,
    speaker_a: Persona,
    speaker_b: Persona,
) -> serde_json::Value {
    json!({
        "model": settings.model,
        "temperature": settings.temperature,
        "max_tokens": settings.max_tokens,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": system_prompt(speaker_a, speaker_b) },
            { "role": "user", "content": format!("Topic: {topic}") },
        ],
    })
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptPayload {
    transcript: Vec<RawLine>,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    #[serde(rename = "agentId")]
    agent_id: String,
    text: String,
}

/// Extracts `choices[0].message.content` from a chat-completion body.
fn completion_content(body: &str) -> Result<String> {
    let completion: ChatCompletion = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed(SERVICE, format!("not a chat completion: {e}")))?;
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| PipelineError::malformed(SERVICE, "completion has no message content"))
}

/// Validates the model's JSON transcript and assigns sequence indices.
pub fn parse_transcript(
    content: &str,
    speaker_a: Persona,
    speaker_b: Persona,
    max_lines: usize,
) -> Result<Vec<DialogueLine>> {
    let payload: TranscriptPayload = serde_json::from_str(content)
        .map_err(|e| PipelineError::malformed(SERVICE, format!("transcript is not valid JSON: {e}")))?;

    if payload.transcript.is_empty() {
        return Err(PipelineError::malformed(SERVICE, "transcript is empty"));
    }

    let mut raw = payload.transcript;
    if raw.len() > max_lines {
        warn!("Transcript has {} lines; keeping the first {}", raw.len(), max_lines);
        raw.truncate(max_lines);
    }

    raw.into_iter()
        .enumerate()
        .map(|(i, line)| {
            let speaker = if line.agent_id == speaker_a.id() {
                speaker_a
            } else if line.agent_id == speaker_b.id() {
                speaker_b
            } else {
                return Err(PipelineError::malformed(
                    SERVICE,
                    format!("line {i} has unrecognized agentId '{}'", line.agent_id),
                ));
            };
            let text = line.text.trim();
            if text.is_empty() {
                return Err(PipelineError::malformed(SERVICE, format!("line {i} has no text")));
            }
            Ok(DialogueLine {
                speaker,
                text: text.to_string(),
                sequence_index: i,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const A: Persona = Persona::JoeRogan;
    const B: Persona = Persona::BenShapiro;

    #[test]
    fn request_body_pins_model_parameters() {
        let body = chat_request_body(&LlmSettings::default(), "pineapple on pizza", A, B);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Topic: pineapple on pizza");
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("JOE_ROGAN") && system.contains("BEN_SHAPIRO"));
        assert!(system.contains("at most 7 exchanges"));
    }

    #[test]
    fn parses_alternating_lines_in_order() {
        let content = r#"{"transcript": [
            {"agentId": "JOE_ROGAN", "text": "Pineapple? Have you tried it with elk?"},
            {"agentId": "BEN_SHAPIRO", "text": "Facts don't care about your toppings."},
            {"agentId": "JOE_ROGAN", "text": "  That's crazy, man.  "},
            {"agentId": "BEN_SHAPIRO", "text": "Let's say, hypothetically, you're wrong."}
        ]}"#;
        let lines = parse_transcript(content, A, B, 14).unwrap();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].speaker, A);
        assert_eq!(lines[1].speaker, B);
        assert_eq!(lines[2].text, "That's crazy, man.");
        let indices: Vec<_> = lines.iter().map(|l| l.sequence_index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn unknown_agent_is_malformed() {
        let content = r#"{"transcript": [{"agentId": "DONALD_TRUMP", "text": "Tremendous."}]}"#;
        let err = parse_transcript(content, A, B, 14).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }

    #[test]
    fn missing_transcript_array_is_malformed() {
        for content in [r#"{"dialogue": []}"#, "not json", r#"{"transcript": []}"#] {
            let err = parse_transcript(content, A, B, 14).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedResponse, "{content}");
        }
    }

    #[test]
    fn long_transcripts_are_truncated() {
        let lines: Vec<String> = (0..20)
            .map(|i| format!(r#"{{"agentId": "{}", "text": "line {i}"}}"#, if i % 2 == 0 { "JOE_ROGAN" } else { "BEN_SHAPIRO" }))
            .collect();
        let content = format!(r#"{{"transcript": [{}]}}"#, lines.join(","));
        let parsed = parse_transcript(&content, A, B, 14).unwrap();
        assert_eq!(parsed.len(), 14);
        assert_eq!(parsed[13].text, "line 13");
    }

    #[test]
    fn completion_content_reads_first_choice() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"transcript\": []}"}}]}"#;
        assert_eq!(completion_content(body).unwrap(), r#"{"transcript": []}"#);

        let err = completion_content(r#"{"choices": []}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedResponse);
    }
}
