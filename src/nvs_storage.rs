//! Persistence for configuration, pump statistics and the halt latch.
//!
//! Values are stored as JSON blobs. A missing or unreadable blob is never
//! fatal: the default is used and a warning logged.

use crate::system::config::SystemConfig;
use crate::types::{PumpState, PumpStatistics};
use anyhow::{anyhow, Result};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

pub const NVS_NAMESPACE: &str = "wellpump";

const CONFIG_KEY: &str = "config";
const STATISTICS_KEY: &str = "statistics";
const PUMP_STATE_KEY: &str = "pump_state";

// Large enough for a SystemConfig with full-length credentials
const BLOB_BUFFER_SIZE: usize = 1024;

/// Key/value blob backend.
pub trait BlobStore {
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<()>;
}

/// Volatile store for the host build and tests. Clones share contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<std::sync::Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(blobs.get(key).cloned())
    }

    fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<()> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        blobs.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
pub use esp::EspNvsStore;

#[cfg(target_os = "espidf")]
mod esp {
    use super::{BlobStore, BLOB_BUFFER_SIZE, NVS_NAMESPACE};
    use anyhow::Result;
    use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};
    use log::info;

    pub struct EspNvsStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl EspNvsStore {
        pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
            let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
            info!("NVS namespace '{}' opened", NVS_NAMESPACE);
            Ok(Self { nvs })
        }
    }

    impl BlobStore for EspNvsStore {
        fn get_blob(&self, key: &str) -> Result<Option<Vec<u8>>> {
            let mut buffer = vec![0u8; BLOB_BUFFER_SIZE];
            Ok(self.nvs.get_blob(key, &mut buffer)?.map(|data| data.to_vec()))
        }

        fn set_blob(&mut self, key: &str, data: &[u8]) -> Result<()> {
            self.nvs.set_blob(key, data)?;
            Ok(())
        }
    }
}

/// Cached view over a [`BlobStore`].
pub struct Storage<B: BlobStore> {
    store: Mutex<CriticalSectionRawMutex, B>,
    cached_config: Mutex<CriticalSectionRawMutex, SystemConfig>,
    cached_stats: Mutex<CriticalSectionRawMutex, PumpStatistics>,
    cached_pump_state: Mutex<CriticalSectionRawMutex, Option<PumpState>>,
}

impl<B: BlobStore> Storage<B> {
    pub fn new(store: B) -> Self {
        info!("Loading persisted settings");

        let config = load_or_default::<SystemConfig, _>(&store, CONFIG_KEY);
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!("Stored config rejected ({}), using defaults", e);
                SystemConfig::default()
            }
        };
        let stats = load_or_default::<PumpStatistics, _>(&store, STATISTICS_KEY);
        let pump_state = load::<PumpState, _>(&store, PUMP_STATE_KEY);

        info!(
            "Storage ready: {} cycles recorded, last pump state {}",
            stats.cycles_completed,
            pump_state.map(|s| s.name()).unwrap_or("none")
        );

        Self {
            store: Mutex::new(store),
            cached_config: Mutex::new(config),
            cached_stats: Mutex::new(stats),
            cached_pump_state: Mutex::new(pump_state),
        }
    }

    pub async fn get_config(&self) -> SystemConfig {
        self.cached_config.lock().await.clone()
    }

    pub async fn save_config(&self, config: &SystemConfig) -> Result<()> {
        *self.cached_config.lock().await = config.clone();
        let data = serde_json::to_vec(config)?;
        self.store.lock().await.set_blob(CONFIG_KEY, &data)?;
        debug!("Saved config ({} bytes)", data.len());
        Ok(())
    }

    pub async fn get_statistics(&self) -> PumpStatistics {
        self.cached_stats.lock().await.clone()
    }

    pub async fn save_statistics(&self, stats: &PumpStatistics) -> Result<()> {
        {
            let mut cached = self.cached_stats.lock().await;
            if *cached == *stats {
                return Ok(());
            }
            *cached = stats.clone();
        }
        let data = serde_json::to_vec(stats)?;
        self.store.lock().await.set_blob(STATISTICS_KEY, &data)?;
        debug!(
            "Saved statistics: {} cycles, {} faults",
            stats.cycles_completed,
            stats.total_faults()
        );
        Ok(())
    }

    pub async fn save_pump_state(&self, state: PumpState) -> Result<()> {
        {
            let mut cached = self.cached_pump_state.lock().await;
            if *cached == Some(state) {
                return Ok(());
            }
            *cached = Some(state);
        }
        let data = serde_json::to_vec(&state)?;
        self.store.lock().await.set_blob(PUMP_STATE_KEY, &data)?;
        debug!("Saved pump state {}", state.name());
        Ok(())
    }

    /// The halt latch and error states survive a reboot; every other state
    /// restarts in recovery. The caller decides what a restored error
    /// state resumes as.
    pub async fn restore_pump_state(&self) -> Option<PumpState> {
        match *self.cached_pump_state.lock().await {
            Some(state) if state == PumpState::HaltedPump || state.is_error() => Some(state),
            _ => None,
        }
    }
}

fn load<T, B>(store: &B, key: &str) -> Option<T>
where
    T: DeserializeOwned,
    B: BlobStore,
{
    match store.get_blob(key) {
        Ok(Some(data)) => match serde_json::from_slice::<T>(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Stored '{}' is corrupt ({}), ignoring it", key, e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("Failed to read '{}': {:?}", key, e);
            None
        }
    }
}

fn load_or_default<T, B>(store: &B, key: &str) -> T
where
    T: DeserializeOwned + Default,
    B: BlobStore,
{
    load(store, key).unwrap_or_default()
}
