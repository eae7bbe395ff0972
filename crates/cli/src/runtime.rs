//! Builds the store, LLM client, queue, memory service, and dispatcher
//! from configuration.

use kenning_config::{AppConfig, LoggingConfig};
use kenning_core::event::EventBus;
use kenning_core::store::Store;
use kenning_memory::MemoryService;
use kenning_observers::{Dispatcher, default_registry};
use kenning_pipeline::{Pipeline, TaskQueue};
use kenning_store::InMemoryStore;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct Runtime {
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub events: Arc<EventBus>,
    pub queue: TaskQueue,
    pub memory: Arc<MemoryService>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Load configuration from `path`, or the default location.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(p) => AppConfig::load_from(p).map(|mut config| {
            config.apply_env();
            config
        }),
        None => AppConfig::load(),
    }
    .map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(config)
}

/// `RUST_LOG` wins; otherwise `--verbose` or the configured level.
pub fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(config: &AppConfig) -> CliResult<Arc<dyn Store>> {
    match config.store.backend.as_str() {
        "memory" => {
            info!("Using in-memory store; nothing will persist");
            Ok(Arc::new(InMemoryStore::new()))
        }
        "sqlite" => {
            let path = config.store.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            debug!(path = %path.display(), "Opening SQLite store");
            let store = kenning_store::SqliteStore::new(&path.to_string_lossy()).await?;
            Ok(Arc::new(store))
        }
        other => Err(format!("Unknown store backend: {other}").into()),
    }
}

impl Runtime {
    pub async fn build(config: AppConfig) -> CliResult<Self> {
        let store = open_store(&config).await?;
        let llm = kenning_providers::from_config(&config.llm)?;
        let events = Arc::new(EventBus::default());

        let pipeline = Pipeline::new(
            store.clone(),
            llm.clone(),
            config.pipeline.clone(),
            config.resolver.clone(),
            events.clone(),
        );
        let queue = TaskQueue::new(pipeline);

        let memory = Arc::new(MemoryService::new(store.clone(), config.memory.clone(), events.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            default_registry(&config.observers, memory.clone()),
            store.clone(),
            llm,
            &config.observers,
            events.clone(),
        ));

        Ok(Self {
            config,
            store,
            events,
            queue,
            memory,
            dispatcher,
        })
    }
}
