use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Credentials;
use crate::http::RetryPolicy;
use crate::persona::Persona;

#[derive(Parser, Debug)]
#[clap(name = "dialogue-shorts", version, about = "Turn a topic into a two-persona spoken dialogue")]
pub struct Args {
    #[clap(flatten)]
    pub service: ServiceArgs,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate one dialogue and assemble it into a single media file
    Generate(GenerateArgs),
    /// List the voices offered by the speech provider
    Voices,
}

#[derive(clap::Args, Debug)]
pub struct ServiceArgs {
    #[clap(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[clap(long, env = "TTS_API_KEY", hide_env_values = true)]
    pub tts_api_key: Option<String>,

    #[clap(long, default_value = "https://api.openai.com/v1/chat/completions")]
    pub llm_endpoint: String,

    #[clap(long, default_value = "gpt-4o-mini")]
    pub llm_model: String,

    #[clap(long, default_value_t = 1024)]
    pub llm_max_tokens: u32,

    #[clap(long, default_value = "https://api.sws.speechify.com/v1")]
    pub tts_base_url: String,

    #[clap(long, default_value_t = 60)]
    pub request_timeout_secs: u64,

    #[clap(long, default_value_t = 2)]
    pub max_retries: u32,

    #[clap(long, default_value_t = 500)]
    pub retry_backoff_ms: u64,
}

impl ServiceArgs {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            llm_api_key: self.llm_api_key.clone(),
            tts_api_key: self.tts_api_key.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct GenerateArgs {
    #[clap(long)]
    pub topic: String,

    #[clap(long, value_enum, default_value = "JOE_ROGAN")]
    pub speaker_a: Persona,

    #[clap(long, value_enum, default_value = "BEN_SHAPIRO")]
    pub speaker_b: Persona,

    #[clap(long)]
    pub background_music: Option<PathBuf>,

    /// Used as the output filename prefix
    #[clap(long)]
    pub title: Option<String>,

    #[clap(long, default_value = "output")]
    pub out_dir: PathBuf,

    #[clap(long, default_value = "rs_tmp")]
    pub work_dir: PathBuf,

    /// JSON object mapping persona ids to voice ids
    #[clap(long)]
    pub voices: Option<PathBuf>,

    #[clap(long, default_value = "en_us_002")]
    pub default_voice: String,

    #[clap(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[clap(long, default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    #[clap(long)]
    pub no_probe: bool,

    #[clap(long, default_value_t = 300)]
    pub media_timeout_secs: u64,

    /// Seconds before a stuck ffprobe is killed and the duration skipped
    #[clap(long, default_value_t = 30)]
    pub probe_timeout_secs: u64,

    /// Speech requests in flight at once
    #[clap(long, default_value_t = 1)]
    pub concurrency: usize,

    #[clap(long, default_value_t = 5000)]
    pub max_topic_chars: usize,

    #[clap(long, default_value_t = 14)]
    pub max_lines: usize,

    /// Print the result as JSON
    #[clap(long)]
    pub json: bool,
}
