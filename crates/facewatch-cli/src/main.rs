use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use facewatch_core::{
    localize, CosineMatcher, EmbeddingExtractor, EnrollReport, FaceLocalizer, Gallery,
    GalleryBuilder, Localization, Matcher, Normalizer, OnnxExtractor, ScrfdLocalizer,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

mod config;
mod controller;
mod sink;

use config::Config;
use controller::StreamController;
use sink::{load_caption_font, DisplaySink, JsonLinesSink, LogSink, SnapshotSink};

#[derive(Parser)]
#[command(name = "facewatch", about = "Identify enrolled faces in a live video stream")]
struct Cli {
    /// TOML config file (default: $FACEWATCH_CONFIG, else built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recognize faces in a video source until it ends or Ctrl-C
    Run {
        /// Camera index, /dev/video* path, image directory or video file
        #[arg(short, long)]
        source: Option<String>,
        /// Gallery store to load
        #[arg(short, long)]
        gallery: Option<PathBuf>,
        /// Enroll this label from --enroll-dir before starting
        #[arg(long, requires = "enroll_dir")]
        enroll_label: Option<String>,
        /// Directory of sample images for --enroll-label
        #[arg(long, requires = "enroll_label")]
        enroll_dir: Option<PathBuf>,
        /// Process one frame out of every N
        #[arg(long)]
        sample_every: Option<u64>,
        /// Where results go
        #[arg(long, value_enum, default_value_t = Output::Log)]
        output: Output,
        /// Directory for --output snapshots
        #[arg(long, default_value = "facewatch-snapshots")]
        snapshot_dir: PathBuf,
    },
    /// Enroll an identity from a directory of images and save the gallery
    Enroll {
        /// Identity label (entries are stored as <label>_<n>)
        #[arg(short, long)]
        label: String,
        /// Directory of sample images
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        gallery: Option<PathBuf>,
    },
    /// List gallery entries
    List {
        #[arg(short, long)]
        gallery: Option<PathBuf>,
    },
    /// Identify the face in a single image
    Identify {
        #[arg(short, long)]
        image: PathBuf,
        #[arg(short, long)]
        gallery: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Output {
    /// tracing events
    Log,
    /// JSON lines on stdout
    Jsonl,
    /// Annotated PNG per sample
    Snapshots,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Commands::Run {
            source,
            gallery,
            enroll_label,
            enroll_dir,
            sample_every,
            output,
            snapshot_dir,
        } => {
            if let Some(source) = source {
                config.source = source;
            }
            if let Some(gallery) = gallery {
                config.gallery_path = gallery;
            }
            if let Some(n) = sample_every {
                config.sample_every = n;
            }
            let enrollment = enroll_label.zip(enroll_dir);
            run(config, enrollment, output, snapshot_dir).await?;
        }
        Commands::Enroll {
            label,
            dir,
            gallery,
        } => {
            if let Some(gallery) = gallery {
                config.gallery_path = gallery;
            }
            enroll(&config, &label, &dir)?;
        }
        Commands::List { gallery } => {
            let path = gallery.unwrap_or(config.gallery_path);
            let gallery = Gallery::load(&path)?;
            if gallery.is_empty() {
                println!("No identities enrolled in {}", path.display());
            }
            for entry in gallery.iter() {
                println!("{}\t{} dims", entry.key, entry.embedding.dim());
            }
        }
        Commands::Identify { image, gallery } => {
            if let Some(gallery) = gallery {
                config.gallery_path = gallery;
            }
            identify(&config, &image)?;
        }
        Commands::Devices => {
            let devices = facewatch_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}\t{} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn load_models(config: &Config) -> Result<(ScrfdLocalizer, OnnxExtractor)> {
    let det_path = config.detector_model_path();
    let localizer = ScrfdLocalizer::load(&det_path, config.detector_confidence)
        .with_context(|| format!("loading face detector {}", det_path.display()))?;
    tracing::info!(path = %det_path.display(), "face detector loaded");

    let emb_path = config.embedder_model_path();
    let extractor = OnnxExtractor::load(&emb_path, config.embedding_dim)
        .with_context(|| format!("loading embedding model {}", emb_path.display()))?;
    tracing::info!(path = %emb_path.display(), "embedding model loaded");

    Ok((localizer, extractor))
}

/// Build the gallery, then run the recognition loop on one blocking thread
/// while the async side waits for Ctrl-C.
async fn run(
    config: Config,
    enrollment: Option<(String, PathBuf)>,
    output: Output,
    snapshot_dir: PathBuf,
) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; stopping after the current frame");
                stop.store(true, Ordering::Relaxed);
            }
        });
    }

    let summary = tokio::task::spawn_blocking(move || -> Result<_> {
        let normalizer = Normalizer::new(config.min_face_height);
        let (localizer, extractor) = load_models(&config)?;

        let mut builder =
            GalleryBuilder::new(localizer, extractor, normalizer).with_store(&config.gallery_path)?;
        if let Some((label, dir)) = &enrollment {
            if let Err(e) = builder.enroll(label, dir) {
                tracing::error!(error = %e, label = %label, "enrollment failed; continuing with the stored gallery");
            }
        }
        let (gallery, localizer, extractor) = builder.build();

        let mut controller = StreamController::new(
            localizer,
            extractor,
            normalizer,
            CosineMatcher::new(config.unknown_threshold),
            Arc::new(gallery),
            config.sample_every,
        )?;

        let source = facewatch_hw::open_source(&config.source)
            .with_context(|| format!("opening video source {}", config.source))?;
        let mut sink = make_sink(output, snapshot_dir, config.caption_font.as_deref())?;

        Ok(controller.run(source, &mut sink, &stop)?)
    })
    .await
    .context("recognition thread panicked")??;

    println!(
        "{} frames read, {} sampled: {} identified, {} unknown, {} skipped ({:?})",
        summary.frames_read,
        summary.samples,
        summary.matched,
        summary.unknown,
        summary.skipped,
        summary.end
    );
    Ok(())
}

fn make_sink(
    output: Output,
    snapshot_dir: PathBuf,
    caption_font: Option<&Path>,
) -> Result<Box<dyn DisplaySink>> {
    Ok(match output {
        Output::Log => Box::new(LogSink::default()),
        Output::Jsonl => Box::new(JsonLinesSink::new(std::io::stdout())),
        Output::Snapshots => Box::new(
            SnapshotSink::new(snapshot_dir.clone(), load_caption_font(caption_font))
                .with_context(|| format!("creating snapshot dir {}", snapshot_dir.display()))?,
        ),
    })
}

fn enroll(config: &Config, label: &str, dir: &Path) -> Result<()> {
    let (localizer, extractor) = load_models(config)?;
    let normalizer = Normalizer::new(config.min_face_height);

    let builder =
        GalleryBuilder::new(localizer, extractor, normalizer).with_store(&config.gallery_path)?;
    enroll_into_store(builder, label, dir, &config.gallery_path)?;
    Ok(())
}

/// Enroll `dir` and persist the result. An unreadable directory or a run
/// that enrolls nothing is reported and leaves `store` as it was.
fn enroll_into_store<L: FaceLocalizer, E: EmbeddingExtractor>(
    mut builder: GalleryBuilder<L, E>,
    label: &str,
    dir: &Path,
    store: &Path,
) -> Result<EnrollReport> {
    let report = match builder.enroll(label, dir) {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, label, "enrollment failed; gallery store left unchanged");
            return Ok(EnrollReport::default());
        }
    };
    for (path, reason) in &report.skipped {
        println!("  skipped {}: {reason}", path.display());
    }

    if report.enrolled > 0 {
        builder.gallery().save(store)?;
    }
    println!(
        "Enrolled {} of {} images as {label}; gallery {} now holds {} entries",
        report.enrolled,
        report.attempted,
        store.display(),
        builder.gallery().len()
    );
    Ok(report)
}

fn identify(config: &Config, image_path: &Path) -> Result<()> {
    let gallery = Gallery::load(&config.gallery_path)?;
    if gallery.is_empty() {
        bail!("gallery {} is empty; run `facewatch enroll` first", config.gallery_path.display());
    }
    let (mut localizer, mut extractor) = load_models(config)?;
    let frame = image::open(image_path)
        .with_context(|| format!("reading {}", image_path.display()))?
        .to_rgb8();

    let boxes = match localize(&mut localizer, &frame) {
        Localization::Found(boxes) => boxes,
        Localization::Missed(reason) => {
            println!("{reason}");
            return Ok(());
        }
    };
    let face = Normalizer::new(config.min_face_height).normalize(&frame, &boxes)?;
    let embedding = extractor.extract(face.crop.image())?;
    let result = CosineMatcher::new(config.unknown_threshold).identify(&embedding, &gallery)?;

    println!("{result}");
    Ok(())
}
