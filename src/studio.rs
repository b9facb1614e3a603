use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::engine::{Engine, EngineConfig, EngineError};
use crate::limits;
use crate::notify::NotifyHub;
use crate::tasks::{JobQueue, run_compactor, run_dispatcher};

/// WAL appends before the background compactor rewrites a studio's log.
const DEFAULT_COMPACT_THRESHOLD: u64 = 10_000;

/// Lazily creates and caches one engine per studio. Each engine gets its
/// own WAL file under `data_dir` plus its own dispatcher and compactor
/// tasks.
pub struct StudioManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    config: EngineConfig,
    pub notify: Arc<NotifyHub>,
}

impl StudioManager {
    pub fn new(data_dir: impl Into<PathBuf>, config: EngineConfig) -> io::Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            config,
            notify: Arc::new(NotifyHub::new()),
        })
    }

    pub fn with_compact_threshold(mut self, threshold: u64) -> Self {
        self.compact_threshold = threshold;
        self
    }

    /// The engine for `name`, created (and its WAL replayed) on first use.
    pub fn get_or_create(&self, name: &str) -> Result<Arc<Engine>, EngineError> {
        let name = sanitize_name(name)?;
        match self.engines.entry(name.clone()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(v) => {
                if self.engines.len() >= limits::MAX_STUDIOS {
                    return Err(EngineError::LimitExceeded("too many studios"));
                }
                let wal_path = self.data_dir.join(format!("{name}.wal"));
                let jobs = Arc::new(JobQueue::new());
                let engine = Arc::new(
                    Engine::new(
                        name.clone(),
                        wal_path,
                        self.config.clone(),
                        self.notify.clone(),
                        jobs.clone(),
                    )
                    .map_err(|e| EngineError::WalError(e.to_string()))?,
                );
                tokio::spawn(run_dispatcher(jobs));
                tokio::spawn(run_compactor(engine.clone(), self.compact_threshold));
                v.insert(engine.clone());
                metrics::gauge!(crate::observability::STUDIOS_ACTIVE)
                    .set(self.engines.len() as f64);
                info!(studio = %name, "studio engine created");
                Ok(engine)
            }
        }
    }

    /// An already-loaded engine, without creating one.
    pub fn get(&self, name: &str) -> Option<Arc<Engine>> {
        let name = sanitize_name(name).ok()?;
        self.engines.get(&name).map(|e| e.value().clone())
    }

    pub fn studio_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.engines.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn studio_count(&self) -> usize {
        self.engines.len()
    }
}

/// Lowercase and restrict to `[a-z0-9_-]` so the name is safe as a WAL
/// file name.
fn sanitize_name(name: &str) -> Result<String, EngineError> {
    if name.is_empty() || name.len() > limits::MAX_STUDIO_NAME_LEN {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    let sanitized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.chars().all(|c| c == '_') {
        return Err(EngineError::InvalidName(name.to_string()));
    }
    Ok(sanitized)
}
