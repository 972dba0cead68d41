pub mod cluster;
pub mod plugins;
pub mod release;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use gatesync_core::GatesyncConfig;
use gatesync_core::config::RegistryBackend;
use gatesync_registry::{
    MemoryKeyValueStore, RedbKeyValueStore, RegistryProvider, SharedStoreProvider,
};
use gatesync_release::Publisher;
use gatesync_state::{GatewayId, Stage, StateStore};
use tracing::info;

/// Stores and publisher shared by every command.
pub struct Context {
    pub config: Arc<GatesyncConfig>,
    pub store: StateStore,
    pub publisher: Publisher,
}

impl Context {
    pub fn open(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => GatesyncConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => GatesyncConfig::default(),
        };

        ensure_parent(&config.store.path)?;
        let store = StateStore::open(&config.store.path)
            .with_context(|| format!("opening state store {}", config.store.path.display()))?;
        info!(path = ?config.store.path, "state store opened");

        let registries: Arc<dyn RegistryProvider> = match config.registry.backend {
            RegistryBackend::Redb => {
                let path = config
                    .registry
                    .path
                    .as_deref()
                    .context("registry.path is required for the redb backend")?;
                ensure_parent(path)?;
                let kv = RedbKeyValueStore::open(path)
                    .with_context(|| format!("opening registry {}", path.display()))?;
                info!(?path, "redb registry opened");
                Arc::new(SharedStoreProvider::new(kv))
            }
            RegistryBackend::Memory => {
                info!("in-memory registry, data-plane state is not persisted");
                Arc::new(SharedStoreProvider::new(Arc::new(MemoryKeyValueStore::new())))
            }
        };

        Ok(Self::from_parts(config, store, registries))
    }

    pub fn from_parts(
        config: GatesyncConfig,
        store: StateStore,
        registries: Arc<dyn RegistryProvider>,
    ) -> Self {
        let config = Arc::new(config);
        let publisher = Publisher::new(store.clone(), config.clone(), registries);
        Self {
            config,
            store,
            publisher,
        }
    }

    pub fn stage_by_name(&self, gateway_id: GatewayId, name: &str) -> anyhow::Result<Stage> {
        self.store
            .get_stage_by_name(gateway_id, name)?
            .with_context(|| format!("stage '{name}' not found in gateway {gateway_id}"))
    }
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    Ok(())
}
