use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::normalizer::{self, NormalizeOutcome};
use facematch_core::probe::ProbeImage;
use facematch_core::{
    CanonicalSize, EmbeddingVerifier, FaceEmbedder, GalleryScanner, MatchRequest,
    VerificationCapability,
};
use facematchd::{build_pipeline, mailer, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facematch", about = "Match a portrait against an event photo gallery")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a gallery folder for photos of the person in a portrait
    Scan {
        /// Portrait to look for (left untouched; a temporary copy is used)
        #[arg(short, long)]
        probe: PathBuf,
        /// Gallery folder (its images are normalized in place)
        #[arg(short, long)]
        gallery: PathBuf,
        /// Email the matches to this address (needs SMTP settings)
        #[arg(short, long)]
        email: Option<String>,
        /// Print per-candidate results
        #[arg(long)]
        details: bool,
    },
    /// Compare two images and print the verdict
    Verify { first: PathBuf, second: PathBuf },
    /// Bring every image in a folder to the canonical size
    Normalize { folder: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Scan {
            probe,
            gallery,
            email,
            details,
        } => scan(&config, &probe, &gallery, email, details),
        Commands::Verify { first, second } => {
            let verifier = load_verifier(&config)?;
            let result = verifier.verify(&first, &second)?;
            println!(
                "{}",
                serde_json::json!({ "verified": result.verified, "distance": result.distance })
            );
            Ok(())
        }
        Commands::Normalize { folder } => normalize_folder(&folder, canonical(&config)),
    }
}

fn canonical(config: &Config) -> CanonicalSize {
    CanonicalSize::square(config.canonical_size)
}

fn load_verifier(config: &Config) -> Result<EmbeddingVerifier<FaceEmbedder>> {
    let embedder = FaceEmbedder::load(&config.model_path_str())?;
    Ok(EmbeddingVerifier::new(embedder, config.distance_threshold))
}

fn scan(
    config: &Config,
    probe: &Path,
    gallery: &Path,
    email: Option<String>,
    details: bool,
) -> Result<()> {
    let bytes = std::fs::read(probe).with_context(|| format!("reading {}", probe.display()))?;
    let verifier: Arc<dyn VerificationCapability> = Arc::new(load_verifier(config)?);

    if let Some(email) = email {
        // Route through the full pipeline, rooted at the gallery's parent.
        let (Some(root), Some(name)) = (gallery.parent(), gallery.file_name()) else {
            bail!("gallery must be a named folder: {}", gallery.display());
        };
        let mut config = config.clone();
        config.gallery_root = root.to_path_buf();
        let pipeline = build_pipeline(&config, verifier, mailer::dispatcher_from_config(&config));
        let outcome = pipeline.run(MatchRequest {
            probe: Some(bytes),
            gallery: Some(name.to_string_lossy().into_owned()),
            destination: Some(email),
        })?;
        println!(
            "{}",
            serde_json::json!({ "matches": outcome.matches, "notification": outcome.notification })
        );
        return Ok(());
    }

    let scanner = GalleryScanner::new(verifier, canonical(config));
    let probe = ProbeImage::store(&config.temp_dir, &bytes)?;
    if let Err(e) = normalizer::normalize(probe.path(), scanner.canonical_size()) {
        tracing::warn!(error = %e, "probe normalize failed; using it unmodified");
    }
    let report = scanner.scan(probe.path(), gallery)?;

    let output = if details {
        serde_json::to_value(&report)?
    } else {
        serde_json::json!({ "matches": report.matches })
    };
    println!("{output}");
    Ok(())
}

fn normalize_folder(folder: &Path, size: CanonicalSize) -> Result<()> {
    let (mut resized, mut unchanged, mut failed) = (0usize, 0usize, 0usize);

    let mut entries: Vec<PathBuf> = std::fs::read_dir(folder)
        .with_context(|| format!("listing {}", folder.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for path in &entries {
        match normalizer::normalize(path, size) {
            Ok(NormalizeOutcome::Resized { from }) => {
                resized += 1;
                println!("resized {} from {}x{}", path.display(), from.0, from.1);
            }
            Ok(NormalizeOutcome::AlreadyCanonical) => unchanged += 1,
            Err(e) => {
                failed += 1;
                eprintln!("skipped: {e}");
            }
        }
    }

    println!("{resized} resized, {unchanged} already canonical, {failed} failed");
    Ok(())
}
