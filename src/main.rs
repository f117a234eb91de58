use std::time::Duration;

use clap::Parser;
use dialogue_shorts::args::{Args, Command, GenerateArgs, ServiceArgs};
use dialogue_shorts::http::build_client;
use dialogue_shorts::utils::{format_duration, format_file_size};
use dialogue_shorts::voices::{HttpVoiceCatalog, VoiceCatalog};
use dialogue_shorts::{GenerationRequest, Pipeline, PipelineConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match args.command {
        Command::Generate(generate) => run_generate(&args.service, &generate).await,
        Command::Voices => list_voices(&args.service).await,
    }
}

async fn run_generate(service: &ServiceArgs, generate: &GenerateArgs) -> anyhow::Result<()> {
    let config = PipelineConfig::from_args(service, generate)?;
    let pipeline = Pipeline::from_config(config)?;

    let mut request = GenerationRequest::new(&generate.topic, generate.speaker_a, generate.speaker_b)?;
    if let Some(music) = &generate.background_music {
        request = request.with_background_music(music);
    }
    if let Some(title) = &generate.title {
        request = request.with_title(title);
    }

    let result = pipeline.generate(&request).await;

    if generate.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    if !result.success {
        error!("Run {} failed: {:?}", result.run_id, result.error_kind);
        if !generate.json {
            println!("Video generation failed");
        }
        std::process::exit(1);
    }

    if !generate.json {
        if let Some(path) = &result.output_path {
            println!("Output:   {}", path.display());
        }
        if let Some(size) = result.file_size {
            println!("Size:     {}", format_file_size(size));
        }
        if let Some(secs) = result.duration_seconds {
            println!("Duration: {}", format_duration(secs));
        }
    }
    info!("Process complete.");
    Ok(())
}

async fn list_voices(service: &ServiceArgs) -> anyhow::Result<()> {
    let api_key = service.credentials().tts_only()?;
    let client = build_client(Duration::from_secs(service.request_timeout_secs))?;
    let catalog = HttpVoiceCatalog::new(client, api_key, service.tts_base_url.clone(), service.retry_policy());

    let voices = catalog.list_voices().await?;
    info!("Provider offers {} voices", voices.len());
    for voice in voices {
        match voice.display_name {
            Some(name) => println!("{}\t{}", voice.voice_id, name),
            None => println!("{}", voice.voice_id),
        }
    }
    Ok(())
}
