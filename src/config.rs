use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::args::{GenerateArgs, ServiceArgs};
use crate::error::{PipelineError, Result};
use crate::http::RetryPolicy;
use crate::persona::VoiceTable;
use crate::pipeline::PipelineSettings;
use crate::transcript::LlmSettings;

#[derive(Clone, Default)]
pub struct Credentials {
    pub llm_api_key: Option<String>,
    pub tts_api_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = |k: &Option<String>| if k.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("llm_api_key", &shown(&self.llm_api_key))
            .field("tts_api_key", &shown(&self.tts_api_key))
            .finish()
    }
}

/// Credentials known to be present and non-blank.
#[derive(Clone)]
pub struct ValidCredentials {
    pub llm_api_key: String,
    pub tts_api_key: String,
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(PipelineError::Config(format!("{name} is not set"))),
    }
}

impl Credentials {
    pub fn validated(&self) -> Result<ValidCredentials> {
        Ok(ValidCredentials {
            llm_api_key: required(&self.llm_api_key, "LLM_API_KEY")?,
            tts_api_key: required(&self.tts_api_key, "TTS_API_KEY")?,
        })
    }

    pub fn tts_only(&self) -> Result<String> {
        required(&self.tts_api_key, "TTS_API_KEY")
    }
}

/// Everything needed to build a [`crate::pipeline::Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub credentials: Credentials,
    pub llm: LlmSettings,
    pub tts_base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub ffmpeg: PathBuf,
    pub media_timeout: Duration,
    pub voices: VoiceTable,
    pub settings: PipelineSettings,
}

impl PipelineConfig {
    pub fn from_args(service: &ServiceArgs, generate: &GenerateArgs) -> Result<Self> {
        let voices = match &generate.voices {
            Some(path) => VoiceTable::load(path)?,
            None => VoiceTable::default(),
        };

        let config = Self {
            credentials: service.credentials(),
            llm: LlmSettings {
                endpoint: service.llm_endpoint.clone(),
                model: service.llm_model.clone(),
                max_tokens: service.llm_max_tokens,
                max_lines: generate.max_lines,
                ..LlmSettings::default()
            },
            tts_base_url: service.tts_base_url.clone(),
            request_timeout: Duration::from_secs(service.request_timeout_secs),
            retry: service.retry_policy(),
            ffmpeg: generate.ffmpeg.clone(),
            media_timeout: Duration::from_secs(generate.media_timeout_secs),
            voices,
            settings: PipelineSettings {
                work_root: generate.work_dir.clone(),
                output_dir: generate.out_dir.clone(),
                default_voice: generate.default_voice.clone(),
                synthesis_concurrency: generate.concurrency,
                max_topic_chars: generate.max_topic_chars,
                ffprobe: (!generate.no_probe).then(|| generate.ffprobe.clone()),
                probe_timeout: Duration::from_secs(generate.probe_timeout_secs),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.credentials.validated()?;
        if self.request_timeout.is_zero() || self.media_timeout.is_zero() || self.settings.probe_timeout.is_zero() {
            return Err(PipelineError::Config("timeouts must be greater than zero".to_string()));
        }
        if self.settings.synthesis_concurrency == 0 {
            return Err(PipelineError::Config("concurrency must be at least 1".to_string()));
        }
        if self.llm.max_lines == 0 {
            return Err(PipelineError::Config("max lines must be at least 1".to_string()));
        }
        if self.settings.default_voice.trim().is_empty() {
            return Err(PipelineError::Config("default voice must not be empty".to_string()));
        }
        Ok(())
    }
}
