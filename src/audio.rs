use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, Result};

const LIST_FILE_PREFIX: &str = "concat-";
pub const SPEECH_WEIGHT: f32 = 1.0;
pub const MUSIC_WEIGHT: f32 = 0.3;

#[async_trait]
pub trait MediaAssembler: Send + Sync {
    /// Joins `clips` in order into `output`, mixing `music` underneath when given.
    async fn assemble(&self, clips: &[PathBuf], output: &Path, music: Option<&Path>) -> Result<()>;
}

/// Drives the `ffmpeg` command-line tool.
#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl FfmpegAssembler {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

pub fn concat_list_contents(clips: &[PathBuf]) -> String {
    clips
        .iter()
        .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', r"'\''")))
        .collect()
}

pub fn concat_args(list: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.display().to_string(),
        "-c".into(),
        "copy".into(),
        "-shortest".into(),
        output.display().to_string(),
    ]
}

pub fn mix_args(list: &Path, music: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.display().to_string(),
        "-i".into(),
        music.display().to_string(),
        "-filter_complex".into(),
        format!(
            "[0:a][1:a]amix=inputs=2:duration=first:weights={} {}[aout]",
            SPEECH_WEIGHT, MUSIC_WEIGHT
        ),
        "-map".into(),
        "[aout]".into(),
        output.display().to_string(),
    ]
}

#[async_trait]
impl MediaAssembler for FfmpegAssembler {
    async fn assemble(&self, clips: &[PathBuf], output: &Path, music: Option<&Path>) -> Result<()> {
        if clips.is_empty() {
            return Err(PipelineError::Assembly("no audio clips to assemble".to_string()));
        }

        // The concat demuxer resolves relative entries against the list's own directory.
        let mut absolute = Vec::with_capacity(clips.len());
        for clip in clips {
            let resolved = tokio::fs::canonicalize(clip)
                .await
                .map_err(|e| PipelineError::Assembly(format!("missing clip {}: {e}", clip.display())))?;
            absolute.push(resolved);
        }

        let list_dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        // Uniquely named per call; removed when `list` drops, however assembly ends.
        let list = tempfile::Builder::new()
            .prefix(LIST_FILE_PREFIX)
            .suffix(".txt")
            .tempfile_in(list_dir)?;
        let list_path = list.path().to_path_buf();
        tokio::fs::write(&list_path, concat_list_contents(&absolute)).await?;
        info!("Created concat list file {} ({} clips)", list_path.display(), clips.len());

        let music = match music {
            Some(m) if m.exists() => Some(m),
            Some(m) => {
                warn!("Background music {} not found; concatenating speech only", m.display());
                None
            }
            None => None,
        };

        let args = match music {
            Some(m) => {
                info!("Mixing speech with background music {}", m.display());
                mix_args(&list_path, m, output)
            }
            None => {
                info!("Concatenating speech clips into {}", output.display());
                concat_args(&list_path, output)
            }
        };
        self.run(&args).await
    }
}

impl FfmpegAssembler {
    async fn run(&self, args: &[String]) -> Result<()> {
        debug!("Running {} {}", self.program.display(), args.join(" "));
        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::Assembly(format!("failed to start {}: {e}", self.program.display())))?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(res) => res.map_err(|e| PipelineError::Assembly(format!("failed waiting for media tool: {e}")))?,
            Err(_) => {
                error!("Media tool exceeded {:?}; killed", self.timeout);
                return Err(PipelineError::Assembly(format!(
                    "media tool timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            let diagnostic = String::from_utf8_lossy(&output.stderr);
            let tail = last_lines(&diagnostic, 20);
            error!("Media tool failed ({}): {}", output.status, tail);
            return Err(PipelineError::Assembly(format!("{}: {}", output.status, tail)));
        }
        Ok(())
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Reads a media file's duration in seconds with `ffprobe`, giving up after `limit`.
pub async fn probe_duration_seconds(ffprobe: &Path, media: &Path, limit: Duration) -> Result<f64> {
    let child = Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(media)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PipelineError::Assembly(format!("failed to start {}: {e}", ffprobe.display())))?;

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(res) => res?,
        Err(_) => {
            return Err(PipelineError::Assembly(format!("ffprobe timed out after {:?}", limit)));
        }
    };
    if !output.status.success() {
        return Err(PipelineError::Assembly(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse::<f64>()
        .map_err(|e| PipelineError::Assembly(format!("unreadable duration '{}': {e}", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_preserves_clip_order() {
        let clips = vec![PathBuf::from("/w/JOE_ROGAN-0.mp3"), PathBuf::from("/w/BEN_SHAPIRO-1.mp3")];
        assert_eq!(
            concat_list_contents(&clips),
            "file '/w/JOE_ROGAN-0.mp3'\nfile '/w/BEN_SHAPIRO-1.mp3'\n"
        );
    }

    #[test]
    fn list_escapes_single_quotes() {
        let clips = vec![PathBuf::from("/w/it's.mp3")];
        assert_eq!(concat_list_contents(&clips), "file '/w/it'\\''s.mp3'\n");
    }

    #[test]
    fn concat_mode_stream_copies() {
        let args = concat_args(Path::new("/w/files.txt"), Path::new("/w/out.mp3"));
        let joined = args.join(" ");
        assert_eq!(joined, "-y -f concat -safe 0 -i /w/files.txt -c copy -shortest /w/out.mp3");
    }

    #[test]
    fn mix_mode_weights_music_under_speech() {
        let args = mix_args(Path::new("/w/files.txt"), Path::new("/m/bg.mp3"), Path::new("/w/out.mp3"));
        assert!(args.contains(&"/m/bg.mp3".to_string()));
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        assert_eq!(filter, "[0:a][1:a]amix=inputs=2:duration=first:weights=1 0.3[aout]");
        assert_eq!(args.last().unwrap(), "/w/out.mp3");
    }

    #[test]
    fn keeps_tail_of_diagnostics() {
        let text = (0..30).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = last_lines(&text, 3);
        assert_eq!(tail, "line 27\nline 28\nline 29");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;

        fn stub_tool(dir: &Path, script: &str) -> PathBuf {
            named_stub(dir, "fake-ffmpeg", script)
        }

        fn named_stub(dir: &Path, name: &str, script: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn clip(dir: &Path) -> PathBuf {
            named_clip(dir, "JOE_ROGAN-0.mp3")
        }

        fn named_clip(dir: &Path, name: &str) -> PathBuf {
            let p = dir.join(name);
            std::fs::write(&p, b"clip").unwrap();
            p
        }

        fn leftover_lists(dir: &Path) -> Vec<String> {
            std::fs::read_dir(dir)
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with(LIST_FILE_PREFIX))
                .collect()
        }

        #[tokio::test]
        async fn failure_surfaces_diagnostic_and_removes_list() {
            let dir = tempfile::tempdir().unwrap();
            let tool = stub_tool(dir.path(), "echo 'Invalid data found when processing input' >&2\nexit 1");
            let assembler = FfmpegAssembler::new(tool, Duration::from_secs(10));
            let output = dir.path().join("out.mp3");

            let err = assembler.assemble(&[clip(dir.path())], &output, None).await.unwrap_err();
            match err {
                PipelineError::Assembly(msg) => assert!(msg.contains("Invalid data found"), "{msg}"),
                other => panic!("unexpected error {other:?}"),
            }
            assert!(leftover_lists(dir.path()).is_empty());
        }

        #[tokio::test]
        async fn missing_music_falls_back_to_concat() {
            let dir = tempfile::tempdir().unwrap();
            let args_log = dir.path().join("args.log");
            let tool = stub_tool(dir.path(), &format!("echo \"$@\" > '{}'", args_log.display()));
            let assembler = FfmpegAssembler::new(tool, Duration::from_secs(10));
            let output = dir.path().join("out.mp3");

            assembler
                .assemble(&[clip(dir.path())], &output, Some(Path::new("/definitely/not/here.mp3")))
                .await
                .unwrap();
            let logged = std::fs::read_to_string(&args_log).unwrap();
            assert!(logged.contains("-c copy"), "{logged}");
            assert!(!logged.contains("amix"));
            assert!(leftover_lists(dir.path()).is_empty());
        }

        #[tokio::test]
        async fn slow_tool_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let tool = stub_tool(dir.path(), "sleep 5");
            let assembler = FfmpegAssembler::new(tool, Duration::from_millis(200));
            let err = assembler
                .assemble(&[clip(dir.path())], &dir.path().join("out.mp3"), None)
                .await
                .unwrap_err();
            assert!(err.to_string().contains("timed out"));
        }

        #[tokio::test]
        async fn concurrent_assemblies_in_one_directory_keep_their_own_lists() {
            let dir = tempfile::tempdir().unwrap();
            // Concat mode passes the list as $7 and the output as $11.
            let tool = stub_tool(dir.path(), "sleep 0.2\ncat \"$7\" > \"${11}\"");
            let assembler = FfmpegAssembler::new(tool, Duration::from_secs(10));
            let first_clip = named_clip(dir.path(), "JOE_ROGAN-0.mp3");
            let second_clip = named_clip(dir.path(), "BEN_SHAPIRO-0.mp3");
            let first_out = dir.path().join("first.mp3");
            let second_out = dir.path().join("second.mp3");

            let first_clips = [first_clip];
            let second_clips = [second_clip];
            let (a, b) = tokio::join!(
                assembler.assemble(&first_clips, &first_out, None),
                assembler.assemble(&second_clips, &second_out, None),
            );
            a.unwrap();
            b.unwrap();

            let first = std::fs::read_to_string(&first_out).unwrap();
            let second = std::fs::read_to_string(&second_out).unwrap();
            assert!(first.contains("JOE_ROGAN-0.mp3") && !first.contains("BEN_SHAPIRO"), "{first}");
            assert!(second.contains("BEN_SHAPIRO-0.mp3") && !second.contains("JOE_ROGAN"), "{second}");
            assert!(leftover_lists(dir.path()).is_empty());
        }

        #[tokio::test]
        async fn duration_is_read_from_tool_output() {
            let dir = tempfile::tempdir().unwrap();
            let tool = named_stub(dir.path(), "fake-ffprobe", "echo 12.5");
            let secs = probe_duration_seconds(&tool, &clip(dir.path()), Duration::from_secs(10))
                .await
                .unwrap();
            assert_eq!(secs, 12.5);
        }

        #[tokio::test]
        async fn failing_duration_tool_is_an_error() {
            let dir = tempfile::tempdir().unwrap();
            let tool = named_stub(dir.path(), "fake-ffprobe", "echo 'moov atom not found' >&2\nexit 1");
            let err = probe_duration_seconds(&tool, &clip(dir.path()), Duration::from_secs(10))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("moov atom not found"), "{err}");
        }

        #[tokio::test]
        async fn hanging_duration_tool_times_out() {
            let dir = tempfile::tempdir().unwrap();
            let tool = named_stub(dir.path(), "fake-ffprobe", "sleep 30");
            let started = std::time::Instant::now();
            let err = probe_duration_seconds(&tool, &clip(dir.path()), Duration::from_millis(200))
                .await
                .unwrap_err();
            assert!(err.to_string().contains("timed out"), "{err}");
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }
}
