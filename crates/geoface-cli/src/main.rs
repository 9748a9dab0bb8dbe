use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use geoface_core::gallery::Gallery;
use geoface_core::{ArcFaceSearch, EmbeddingCache, Identifier, SpoofDetector, DEFAULT_MAX_DISTANCE};
use geoface_sync::{
    FirestoreSource, HttpFetcher, JsonFileSource, RecordSource, Synchronizer, DEFAULT_COLLECTION,
    DEFAULT_FETCH_TIMEOUT,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "geoface", about = "GeoFace identification CLI")]
struct Cli {
    /// Gallery root (default: $XDG_DATA_HOME/geoface/employee_face_db)
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the spoof heuristics on an image and print the analysis
    Analyze {
        image: PathBuf,
    },
    /// Identify the person in an image against the local gallery
    Identify {
        image: PathBuf,
        /// Directory holding det_10g.onnx and w600k_r50.onnx
        #[arg(long)]
        models: Option<PathBuf>,
        /// Largest cosine distance accepted as a match
        #[arg(long, default_value_t = DEFAULT_MAX_DISTANCE)]
        max_distance: f32,
    },
    /// Rebuild the gallery from enrollment records
    Sync {
        /// JSON export of the enrollment collection
        #[arg(long, conflicts_with = "firestore_project")]
        records: Option<PathBuf>,
        /// Firestore project id
        #[arg(long)]
        firestore_project: Option<String>,
        #[arg(long, default_value = DEFAULT_COLLECTION)]
        collection: String,
        /// Bearer token for the Firestore REST API
        #[arg(long)]
        token: Option<String>,
        /// Per-image download timeout in seconds
        #[arg(long, default_value_t = DEFAULT_FETCH_TIMEOUT.as_secs())]
        timeout: u64,
    },
    /// Show gallery partitions, image counts and cache state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let gallery_dir = cli.gallery.unwrap_or_else(geoface_core::default_gallery_dir);

    match cli.command {
        Commands::Analyze { image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let analysis = SpoofDetector::default().analyze_bytes(&bytes);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Identify { image, models, max_distance } => {
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let gallery = Gallery::new(&gallery_dir);
            let models = models.unwrap_or_else(geoface_core::default_model_dir);

            let search = ArcFaceSearch::load(&models, Arc::new(EmbeddingCache::new()), max_distance);
            let mut identifier = Identifier::new(SpoofDetector::default(), search);
            let outcome = identifier.identify(&bytes, &gallery);
            tracing::info!(image = %image.display(), outcome = outcome.code(), "identification finished");

            println!("{}", serde_json::to_string_pretty(&outcome)?);
            eprintln!("{outcome}");
        }
        Commands::Sync { records, firestore_project, collection, token, timeout } => {
            let timeout = std::time::Duration::from_secs(timeout);
            let source: Box<dyn RecordSource> = match (records, firestore_project) {
                (Some(path), _) => Box::new(JsonFileSource::new(path)),
                (None, Some(project)) => Box::new(FirestoreSource::new(project, collection, token, timeout)?),
                (None, None) => bail!("pass --records <file> or --firestore-project <id>"),
            };

            tracing::info!(source = %source.describe(), gallery = %gallery_dir.display(), "syncing gallery");
            let synchronizer = Synchronizer::new(Gallery::new(&gallery_dir), HttpFetcher::new(timeout)?);
            let report = synchronizer.sync(source.as_ref(), None).await?;
            tracing::info!(
                images = report.images_downloaded,
                employees = report.employees_updated,
                skipped = report.records_skipped,
                fetch_failures = report.fetch_failures,
                "sync finished"
            );
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let gallery = Gallery::new(&gallery_dir);
            let partitions = gallery.partitions()?;
            let images = gallery.reference_images()?;

            println!("gallery:    {}", gallery.root().display());
            println!("employees:  {}", partitions.len());
            println!("images:     {}", images.len());
            println!(
                "cache:      {}",
                if gallery.cache_path().exists() { "present" } else { "absent" }
            );
            if !partitions.is_empty() {
                println!("version:    {}", gallery.fingerprint()?);
            }
            for partition in &partitions {
                let count = images.iter().filter(|r| &r.employee_id == partition).count();
                println!("  {partition}: {count}");
            }
        }
    }

    Ok(())
}
