mod collaborators;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use narracut_core::config::EngineConfig;
use narracut_core::script::ScriptDocument;
use narracut_core::timeline::{
    compute_narration_timeline, resolve_timeline, validate_narration_timeline,
};
use narracut_core::types::{SegmentEdit, TimeUs};
use narracut_render::collab::AudioLocation;
use narracut_render::deadzone::trim_dead_zones;
use narracut_render::pipeline::DOCUMENT_FILE;
use narracut_render::{
    add_background, AssemblyProgress, CancelToken, Ffmpeg, GuideBuilder, GuideTarget,
    LocalStorage, MediaBackend, NarrationPipeline, SurgicalRebuilder,
};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use collaborators::{CommandSynthesizer, FileScriptGenerator};

#[derive(Parser, Debug)]
#[command(name = "narracut", version, about = "Narrate, trim and re-time screen recordings")]
struct Cli {
    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cut frozen, silent stretches out of a recording
    Trim {
        input: PathBuf,
        output: PathBuf,
    },

    /// Synthesize narration for a recording and assemble the narrated video
    Narrate {
        #[arg(long)]
        video: PathBuf,

        /// Generated script (or a saved script document) to narrate
        #[arg(long)]
        script: PathBuf,

        #[arg(long, default_value = "output")]
        output: PathBuf,

        /// Speech command; text on stdin, output path appended
        #[arg(long)]
        tts_command: String,

        /// Publish into a local object store rooted here instead of `output`
        #[arg(long)]
        storage_root: Option<PathBuf>,
    },

    /// Apply text edits to a saved script, reusing unedited audio
    Rebuild {
        #[arg(long)]
        document: PathBuf,

        /// JSON array of {"id", "voiceoverText"}
        #[arg(long)]
        edits: PathBuf,

        /// Previous master narration to slice unedited segments from
        #[arg(long)]
        master: Option<PathBuf>,

        #[arg(long, default_value = "output")]
        output: PathBuf,

        #[arg(long)]
        tts_command: String,
    },

    /// Probe each segment's audio and print the resolved timeline
    Resolve {
        #[arg(long)]
        document: PathBuf,
    },

    /// Screenshot each narrated step of a finished video into a guide
    Guide {
        /// Narrated video produced by `narrate`
        #[arg(long)]
        video: PathBuf,

        #[arg(long)]
        document: PathBuf,

        #[arg(long, default_value = "output")]
        output: PathBuf,
    },

    /// Center a video on a background image
    Background {
        input: PathBuf,

        #[arg(long)]
        image: PathBuf,

        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping before the next segment");
            let _ = cancel_tx.send(true);
        }
    });
    let cancel = CancelToken::new(cancel_rx);

    // ffmpeg calls and blocking HTTP stay off the async workers
    tokio::task::spawn_blocking(move || run(cli.command, &config, cancel))
        .await
        .context("worker task panicked")?
}

const GUIDE_FILE: &str = "guide.json";

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn synthesizer(command: &str) -> Result<CommandSynthesizer> {
    CommandSynthesizer::parse(command).context("--tts-command is empty")
}

fn run(command: Commands, config: &EngineConfig, cancel: CancelToken) -> Result<()> {
    let backend = Ffmpeg::from_config(config);

    match command {
        Commands::Trim { input, output } => {
            let report = trim_dead_zones(&backend, &input, &output, config)?;
            println!(
                "kept {} ranges, removed {} of {}",
                report.kept.len(),
                report.removed,
                report.input_duration
            );
        }

        Commands::Narrate {
            video,
            script,
            output,
            tts_command,
            storage_root,
        } => {
            let generator = FileScriptGenerator::new(script);
            let synth = synthesizer(&tts_command)?;
            let storage = storage_root.map(LocalStorage::new);

            let (progress_tx, mut progress_rx) = watch::channel(AssemblyProgress::default());
            tokio::runtime::Handle::current().spawn(async move {
                while progress_rx.changed().await.is_ok() {
                    let p = *progress_rx.borrow_and_update();
                    info!(segment = p.segment, total = p.total, "Assembly progress");
                }
            });

            let mut pipeline = NarrationPipeline::new(&backend, &generator, &synth, config)
                .with_cancel(cancel)
                .with_progress(progress_tx);
            if let Some(storage) = &storage {
                pipeline = pipeline.with_storage(storage);
            }
            let result = pipeline.run(&video, &output)?;

            let summary = json!({
                "document": result.document_path,
                "video": result.video_url,
                "master": result.master_url,
                "metadata": result.metadata,
                "collisions": result.collisions.len(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Rebuild {
            document,
            edits,
            master,
            output,
            tts_command,
        } => {
            let mut doc = ScriptDocument::load_from_file(&document)
                .with_context(|| format!("loading {}", document.display()))?;
            let edits: Vec<SegmentEdit> = serde_json::from_str(
                &std::fs::read_to_string(&edits)
                    .with_context(|| format!("reading {}", edits.display()))?,
            )?;
            let synth = synthesizer(&tts_command)?;

            let outcome = SurgicalRebuilder::new(&backend, &synth, config)
                .with_cancel(cancel)
                .rebuild(&doc.script, &edits, master.as_deref(), &output)?;

            doc.script = outcome.script;
            let saved = output.join(DOCUMENT_FILE);
            doc.save_to_file(&saved)?;

            let summary = json!({
                "document": saved,
                "master": outcome.master,
                "total": outcome.total.as_seconds_ms(),
                "changes": outcome.changes,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Resolve { document } => {
            let doc = ScriptDocument::load_from_file(&document)
                .with_context(|| format!("loading {}", document.display()))?;
            let durations = measure_local_audio(&backend, &doc);
            let resolved = resolve_timeline(&doc.script, &durations, config.timeline.collision_gap())?;
            let segments = compute_narration_timeline(&resolved.segments);
            let check =
                validate_narration_timeline(&segments, config.timeline.narration_tolerance());

            let summary = json!({
                "script": segments,
                "collisions": resolved.collisions,
                "narrationDuration": check.computed.as_seconds_ms(),
                "consistent": check.consistent,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Commands::Guide {
            video,
            document,
            output,
        } => {
            let doc = ScriptDocument::load_from_file(&document)
                .with_context(|| format!("loading {}", document.display()))?;
            let guide = GuideBuilder::new(&backend, config)
                .with_cancel(cancel)
                .build(&video, &doc.script, GuideTarget::Local(&output))?;

            let saved = output.join(GUIDE_FILE);
            std::fs::write(&saved, serde_json::to_string_pretty(&guide)?)
                .with_context(|| format!("writing {}", saved.display()))?;
            println!("{} steps, saved {}", guide.steps.len(), saved.display());
        }

        Commands::Background {
            input,
            image,
            output,
        } => {
            let fitted = add_background(&backend, &input, &image, &config.layout, &output)?;
            println!(
                "placed {}x{} on {}x{}",
                fitted.width, fitted.height, config.layout.canvas_width, config.layout.canvas_height
            );
        }
    }
    Ok(())
}

/// Probe each kept segment's local audio; fall back to the recorded duration
/// when the file is remote or unreadable.
fn measure_local_audio(backend: &dyn MediaBackend, doc: &ScriptDocument) -> HashMap<String, TimeUs> {
    let mut durations = HashMap::new();
    for segment in doc.script.iter().filter(|s| s.is_kept()) {
        let probed = match segment.audio_url.as_deref().and_then(AudioLocation::parse) {
            Some(AudioLocation::Local(path)) => match backend.probe_duration(&path) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(segment = %segment.id, error = %e, "Could not probe voiceover");
                    None
                }
            },
            _ => None,
        };
        if let Some(duration) = probed.or(segment.audio_duration) {
            durations.insert(segment.id.clone(), duration);
        }
    }
    durations
}
