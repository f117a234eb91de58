use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audio::{probe_duration_seconds, FfmpegAssembler, MediaAssembler};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::http::build_client;
use crate::persona::{Persona, VoiceTable};
use crate::transcript::{DialogueLine, LlmTranscriptGenerator, TranscriptSource};
use crate::tts::{synthesize_line, AudioArtifact, HttpSpeechSynthesizer, SpeechSynthesizer};
use crate::utils::output_file_name;
use crate::voices::{bind_voices, resolve_fallback_voice, HttpVoiceCatalog, VoiceCatalog, DEFAULT_VOICE_ID};

const ASSEMBLED_FILE_NAME: &str = "combined.mp3";

/// One video generation request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    topic: String,
    speaker_a: Persona,
    speaker_b: Persona,
    background_music: Option<PathBuf>,
    title: Option<String>,
}

impl GenerationRequest {
    pub fn new(topic: impl Into<String>, speaker_a: Persona, speaker_b: Persona) -> Result<Self> {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(PipelineError::InvalidRequest("topic must not be empty".to_string()));
        }
        if speaker_a == speaker_b {
            return Err(PipelineError::InvalidRequest(format!(
                "speakers must differ (both are {speaker_a})"
            )));
        }
        Ok(Self {
            topic,
            speaker_a,
            speaker_b,
            background_music: None,
            title: None,
        })
    }

    pub fn with_background_music(mut self, path: impl Into<PathBuf>) -> Self {
        self.background_music = Some(path.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn speaker_a(&self) -> Persona {
        self.speaker_a
    }

    pub fn speaker_b(&self) -> Persona {
        self.speaker_b
    }

    pub fn background_music(&self) -> Option<&Path> {
        self.background_music.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    TranscriptReady,
    AudioReady,
    Assembled,
    Done,
    Failed(ErrorKind),
}

/// Terminal outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub run_id: String,
    pub success: bool,
    pub stage: Stage,
    pub output_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub duration_seconds: Option<f64>,
    pub clip_count: Option<usize>,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
}

impl GenerationResult {
    fn failed(run_id: String, err: &PipelineError) -> Self {
        Self {
            run_id,
            success: false,
            stage: Stage::Failed(err.kind()),
            output_path: None,
            file_size: None,
            duration_seconds: None,
            clip_count: None,
            error_kind: Some(err.kind()),
            message: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent of the per-run working directories.
    pub work_root: PathBuf,
    /// Durable, append-only destination for finished files.
    pub output_dir: PathBuf,
    pub default_voice: String,
    pub synthesis_concurrency: usize,
    pub max_topic_chars: usize,
    pub ffprobe: Option<PathBuf>,
    pub probe_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("dialogue-shorts"),
            output_dir: PathBuf::from("output"),
            default_voice: DEFAULT_VOICE_ID.to_string(),
            synthesis_concurrency: 1,
            max_topic_chars: 5000,
            ffprobe: None,
            probe_timeout: Duration::from_secs(30),
        }
    }
}

struct Completed {
    output_path: PathBuf,
    file_size: u64,
    duration_seconds: Option<f64>,
    clip_count: usize,
}

struct RunState<'a> {
    run_id: &'a str,
    stage: Stage,
}

impl<'a> RunState<'a> {
    fn new(run_id: &'a str) -> Self {
        Self {
            run_id,
            stage: Stage::Created,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!("[{}] {:?} -> {:?}", self.run_id, self.stage, next);
        self.stage = next;
    }
}

/// Sequences transcript, voices, speech and assembly for each request.
pub struct Pipeline {
    transcripts: Box<dyn TranscriptSource>,
    catalog: Box<dyn VoiceCatalog>,
    speech: Box<dyn SpeechSynthesizer>,
    assembler: Box<dyn MediaAssembler>,
    voices: VoiceTable,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        transcripts: Box<dyn TranscriptSource>,
        catalog: Box<dyn VoiceCatalog>,
        speech: Box<dyn SpeechSynthesizer>,
        assembler: Box<dyn MediaAssembler>,
        voices: VoiceTable,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            transcripts,
            catalog,
            speech,
            assembler,
            voices,
            settings,
        }
    }

    /// Wires the HTTP-backed components. Fails before any network call
    /// when credentials are missing.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        let credentials = config.credentials.validated()?;
        let client = build_client(config.request_timeout)?;

        let transcripts = LlmTranscriptGenerator::new(
            client.clone(),
            credentials.llm_api_key.clone(),
            config.llm,
            config.retry,
        );
        let catalog = HttpVoiceCatalog::new(
            client.clone(),
            credentials.tts_api_key.clone(),
            config.tts_base_url.clone(),
            config.retry,
        );
        let speech = HttpSpeechSynthesizer::new(
            client,
            credentials.tts_api_key.clone(),
            config.tts_base_url,
            config.retry,
        );
        let assembler = FfmpegAssembler::new(config.ffmpeg, config.media_timeout);

        Ok(Self::new(
            Box::new(transcripts),
            Box::new(catalog),
            Box::new(speech),
            Box::new(assembler),
            config.voices,
            config.settings,
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Runs one request to completion. Never returns an error: failures are
    /// folded into the result after the run's working directory is removed.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let run_id = new_run_id();
        let started = Instant::now();
        info!(
            "[{}] Generating dialogue on {:?} ({} vs {})",
            run_id,
            request.topic(),
            request.speaker_a(),
            request.speaker_b()
        );

        let mut state = RunState::new(&run_id);
        let outcome = self.execute(request, &run_id, &mut state).await;

        match outcome {
            Ok(done) => {
                state.advance(Stage::Done);
                info!(
                    "[{}] Finished in {:.1?}: {}",
                    run_id,
                    started.elapsed(),
                    done.output_path.display()
                );
                GenerationResult {
                    run_id: run_id.clone(),
                    success: true,
                    stage: Stage::Done,
                    output_path: Some(done.output_path),
                    file_size: Some(done.file_size),
                    duration_seconds: done.duration_seconds,
                    clip_count: Some(done.clip_count),
                    error_kind: None,
                    message: None,
                }
            }
            Err(e) => {
                error!(
                    "[{}] Generation failed after {:?} with {:?}: {}",
                    run_id,
                    state.stage,
                    e.kind(),
                    e
                );
                state.advance(Stage::Failed(e.kind()));
                GenerationResult::failed(run_id.clone(), &e)
            }
        }
    }

    async fn execute(&self, request: &GenerationRequest, run_id: &str, state: &mut RunState<'_>) -> Result<Completed> {
        self.check_request(request)?;

        tokio::fs::create_dir_all(&self.settings.work_root).await?;
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        // Dropping `work` removes the directory and every artifact in it.
        let work = tempfile::Builder::new()
            .prefix(&format!("run-{run_id}-"))
            .tempdir_in(&self.settings.work_root)?;
        debug!("[{}] Working directory {}", run_id, work.path().display());

        let lines = self
            .transcripts
            .generate(request.topic(), request.speaker_a(), request.speaker_b())
            .await?;
        state.advance(Stage::TranscriptReady);

        let fallback = match resolve_fallback_voice(self.catalog.as_ref()).await {
            Ok(voice) => voice,
            Err(e) => {
                warn!(
                    "[{}] {}; using default voice {}",
                    run_id, e, self.settings.default_voice
                );
                self.settings.default_voice.clone()
            }
        };
        let bound = bind_voices(&lines, &self.voices, &fallback);

        let artifacts = self.synthesize_all(&lines, &bound, work.path()).await?;
        state.advance(Stage::AudioReady);

        let clips: Vec<PathBuf> = artifacts.iter().map(|a| a.file_path.clone()).collect();
        let assembled = work.path().join(ASSEMBLED_FILE_NAME);
        self.assembler
            .assemble(&clips, &assembled, request.background_music())
            .await?;
        if !assembled.is_file() {
            return Err(PipelineError::Assembly(
                "media tool reported success but wrote no output".to_string(),
            ));
        }
        state.advance(Stage::Assembled);

        let output_path = self.settings.output_dir.join(output_file_name(
            request.title(),
            Utc::now(),
            run_id,
            "mp3",
        ));
        let file_size = publish(&assembled, &output_path).await?;
        info!("[{}] Output written to {} ({} bytes)", run_id, output_path.display(), file_size);

        let duration_seconds = self.probe(&output_path).await;

        Ok(Completed {
            output_path,
            file_size,
            duration_seconds,
            clip_count: artifacts.len(),
        })
    }

    fn check_request(&self, request: &GenerationRequest) -> Result<()> {
        let chars = request.topic().chars().count();
        if chars > self.settings.max_topic_chars {
            return Err(PipelineError::InvalidRequest(format!(
                "topic is {} characters; maximum is {}",
                chars, self.settings.max_topic_chars
            )));
        }
        Ok(())
    }

    /// Synthesizes every line; results keep transcript order even when
    /// several requests are in flight.
    async fn synthesize_all(&self, lines: &[DialogueLine], voices: &[String], dir: &Path) -> Result<Vec<AudioArtifact>> {
        let total = lines.len();
        let concurrency = self.settings.synthesis_concurrency.max(1);
        let speech = self.speech.as_ref();

        let artifacts: Vec<AudioArtifact> = stream::iter(lines.iter().zip(voices))
            .map(|(line, voice)| {
                info!("Generating speech for line {}/{}", line.sequence_index + 1, total);
                synthesize_line(speech, line, voice, dir)
            })
            .buffered(concurrency)
            .try_collect()
            .await?;

        debug_assert!(artifacts
            .iter()
            .enumerate()
            .all(|(i, a)| a.sequence_index == lines[i].sequence_index));
        Ok(artifacts)
    }

    async fn probe(&self, media: &Path) -> Option<f64> {
        let ffprobe = self.settings.ffprobe.as_deref()?;
        match probe_duration_seconds(ffprobe, media, self.settings.probe_timeout).await {
            Ok(secs) => Some(secs),
            Err(e) => {
                warn!("Could not read duration of {}: {}", media.display(), e);
                None
            }
        }
    }
}

/// Copies `src` to `dest` through a sibling `.part` file, so `dest` never
/// exists half-written.
async fn publish(src: &Path, dest: &Path) -> Result<u64> {
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let copied = async {
        let size = tokio::fs::copy(src, &partial).await?;
        tokio::fs::rename(&partial, dest).await?;
        Ok::<_, std::io::Error>(size)
    }
    .await;

    if copied.is_err() {
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Could not remove partial output {}: {}", partial.display(), e);
            }
        }
    }
    Ok(copied?)
}

fn new_run_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_reject_blank_topic_and_duplicate_speakers() {
        let err = GenerationRequest::new("   ", Persona::JoeRogan, Persona::BenShapiro).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let err = GenerationRequest::new("pizza", Persona::JoeRogan, Persona::JoeRogan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        let req = GenerationRequest::new("  pizza ", Persona::JoeRogan, Persona::BenShapiro).unwrap();
        assert_eq!(req.topic(), "pizza");
    }

    #[test]
    fn request_accessors_reflect_builder() {
        let req = GenerationRequest::new("pizza", Persona::ElonMusk, Persona::BarackObama)
            .unwrap()
            .with_background_music("/music/lofi.mp3")
            .with_title("Pizza Debate");
        assert_eq!(req.topic(), "pizza");
        assert_eq!(req.speaker_a(), Persona::ElonMusk);
        assert_eq!(req.speaker_b(), Persona::BarackObama);
        assert_eq!(req.background_music(), Some(Path::new("/music/lofi.mp3")));
        assert_eq!(req.title(), Some("Pizza Debate"));

        let bare = GenerationRequest::new("pizza", Persona::ElonMusk, Persona::BarackObama).unwrap();
        assert_eq!(bare.background_music(), None);
        assert_eq!(bare.title(), None);
    }

    fn part_files(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "part"))
            .collect()
    }

    #[tokio::test]
    async fn publish_moves_complete_file_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("combined.mp3");
        std::fs::write(&src, b"speech").unwrap();
        let dest = dir.path().join("dialogue_20260101_000000_abc.mp3");

        let size = publish(&src, &dest).await.unwrap();
        assert_eq!(size, 6);
        assert_eq!(std::fs::read(&dest).unwrap(), b"speech");
        assert!(part_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn failed_publish_leaves_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("combined.mp3");
        std::fs::write(&src, b"speech").unwrap();
        // A non-empty directory at the destination makes the final rename fail.
        let dest = dir.path().join("taken.mp3");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("keep"), b"x").unwrap();

        let err = publish(&src, &dest).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(part_files(dir.path()).is_empty());
        assert!(dest.is_dir());

        let missing = publish(&dir.path().join("absent.mp3"), &dir.path().join("out.mp3")).await;
        assert!(missing.is_err());
        assert!(!dir.path().join("out.mp3").exists());
        assert!(part_files(dir.path()).is_empty());
    }

    #[test]
    fn run_ids_are_short_and_distinct() {
        let a = new_run_id();
        let b = new_run_id();
        assert_eq!(a.len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn failed_stage_serializes_with_kind() {
        let json = serde_json::to_value(Stage::Failed(ErrorKind::UpstreamError)).unwrap();
        assert_eq!(json, serde_json::json!({"failed": "upstream_error"}));
    }
}
