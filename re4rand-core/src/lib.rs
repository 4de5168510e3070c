use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub mod assign;
pub mod catalog;
pub mod config;
pub mod drops;
pub mod duplicate;
pub mod economy;
pub mod entity;
pub mod health;
pub mod loadout;
pub mod orchestrator;
pub mod pool;
pub mod rng;
pub mod sampling;
pub mod shop;
pub mod trace;

pub use catalog::{Catalogs, ClassKey, ItemId};
pub use config::RandomizerConfig;
pub use entity::{AreaRecord, Decision, EntityStore, EntityView, Guid, MemoryStore, Value};
pub use orchestrator::{RunOrchestrator, RunOutput};
pub use rng::RandomStream;
pub use sampling::{ResamplingBag, WeightedTable};
pub use trace::{AuditTrace, TraceRecord};

#[derive(Debug, Error)]
pub enum RandomiserError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("catalog entry {entry}: {reason}")]
    Catalog { entry: String, reason: String },
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),
    #[error("all weights for {category} are zero")]
    ConfigurationGap { category: String },
    #[error("unknown entity {0}")]
    UnknownEntity(Guid),
}

pub type Result<T> = std::result::Result<T, RandomiserError>;

/// Everything the CLI needs to perform one run against files on disk.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub config_path: Option<PathBuf>,
    pub catalog_path: PathBuf,
    pub entities_path: PathBuf,
    pub output_path: PathBuf,
    pub seed: Option<u64>,
    pub compress_trace: bool,
}

pub fn run(settings: RunSettings) -> Result<PathBuf> {
    for path in [&settings.catalog_path, &settings.entities_path] {
        if !path.exists() {
            return Err(RandomiserError::Config(format!(
                "Input path does not exist: {}",
                path.display()
            )));
        }
    }

    let mut config = match settings.config_path.as_deref() {
        Some(path) => RandomizerConfig::load(path)?,
        None => RandomizerConfig::default(),
    };
    if let Some(seed) = settings.seed {
        config.seed = seed;
    }

    let catalog = Arc::new(Catalogs::load_dir(&settings.catalog_path)?);
    let mut store = MemoryStore::load(&settings.entities_path)?;

    let orchestrator = RunOrchestrator::new(&config, Arc::clone(&catalog));
    let output = orchestrator.randomize(store.areas())?;

    for decision in &output.decisions {
        store.apply(decision)?;
    }

    // Each seed gets its own folder so repeated runs never collide.
    let out_root = settings
        .output_path
        .join(format!("Re4Rand_{}", config.seed));
    fs::create_dir_all(&out_root)?;

    write_json(&out_root.join("mutations.json"), &output.decisions)?;
    write_json(&out_root.join("entities.json"), &store)?;
    let trace_path = if settings.compress_trace {
        out_root.join("trace.json.gz")
    } else {
        out_root.join("trace.json")
    };
    output.trace.write(&trace_path, settings.compress_trace)?;

    let fingerprint = output.trace.fingerprint()?;
    info!(
        seed = config.seed,
        decisions = output.decisions.len(),
        trace_records = output.trace.records.len(),
        %fingerprint,
        "run complete"
    );

    Ok(out_root)
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text)?;
    Ok(())
}
