//! Persistence for the PID gains.
//! Files on the host and on SPIFFS, an NVS blob on the device.

use crate::types::PidGains;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted gain record. Absent fields leave the in-memory gain unchanged
/// on load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GainRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<f32>,
}

impl GainRecord {
    pub fn apply_to(&self, gains: PidGains) -> PidGains {
        PidGains {
            kp: self.p.unwrap_or(gains.kp),
            ki: self.i.unwrap_or(gains.ki),
            kd: self.d.unwrap_or(gains.kd),
        }
    }
}

impl From<PidGains> for GainRecord {
    fn from(gains: PidGains) -> Self {
        Self {
            p: Some(gains.kp),
            i: Some(gains.ki),
            d: Some(gains.kd),
        }
    }
}

#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Encoding(serde_json::Error),
    Backend(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Io(e) => write!(f, "I/O error: {}", e),
            StorageError::Encoding(e) => write!(f, "encoding error: {}", e),
            StorageError::Backend(msg) => write!(f, "storage backend error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Encoding(e)
    }
}

pub trait GainStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&mut self) -> Result<Option<GainRecord>, StorageError>;
    fn save(&mut self, record: &GainRecord) -> Result<(), StorageError>;
}

impl<G: GainStore + ?Sized> GainStore for Box<G> {
    fn load(&mut self) -> Result<Option<GainRecord>, StorageError> {
        (**self).load()
    }

    fn save(&mut self, record: &GainRecord) -> Result<(), StorageError> {
        (**self).save(record)
    }
}

pub struct FileGainStore {
    path: PathBuf,
}

impl FileGainStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl GainStore for FileGainStore {
    fn load(&mut self) -> Result<Option<GainRecord>, StorageError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No saved gains at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let record = serde_json::from_slice(&bytes)?;
        info!("Loaded gains from {}", self.path.display());
        Ok(Some(record))
    }

    fn save(&mut self, record: &GainRecord) -> Result<(), StorageError> {
        let data = serde_json::to_vec(record)?;
        std::fs::write(&self.path, data)?;
        info!("Saved gains to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the record in memory only. Used when no backend could be opened.
#[derive(Debug, Default)]
pub struct MemoryGainStore {
    record: Option<GainRecord>,
}

impl GainStore for MemoryGainStore {
    fn load(&mut self) -> Result<Option<GainRecord>, StorageError> {
        Ok(self.record)
    }

    fn save(&mut self, record: &GainRecord) -> Result<(), StorageError> {
        debug!("[MOCK] Would persist gains: {:?}", record);
        self.record = Some(*record);
        Ok(())
    }
}

/// Resolve the gains to use after a load attempt. Missing or unreadable
/// records fall back to `current`.
pub fn restore_gains<G: GainStore + ?Sized>(store: &mut G, current: PidGains) -> PidGains {
    match store.load() {
        Ok(Some(record)) => record.apply_to(current),
        Ok(None) => current,
        Err(e) => {
            warn!("Failed to load gains: {} - keeping current values", e);
            current
        }
    }
}

#[cfg(target_os = "espidf")]
pub use nvs::NvsGainStore;

#[cfg(target_os = "espidf")]
mod nvs {
    use super::{GainRecord, GainStore, StorageError};
    use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
    use log::info;

    const NVS_NAMESPACE: &str = "roaster";
    const GAINS_KEY: &str = "gains";

    pub struct NvsGainStore {
        nvs: EspNvs<NvsDefault>,
    }

    impl NvsGainStore {
        pub fn new(partition: EspNvsPartition<NvsDefault>) -> Result<Self, StorageError> {
            let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)
                .map_err(|e| StorageError::Backend(format!("{:?}", e)))?;
            info!("NVS gain store opened in namespace '{}'", NVS_NAMESPACE);
            Ok(Self { nvs })
        }
    }

    impl GainStore for NvsGainStore {
        fn load(&mut self) -> Result<Option<GainRecord>, StorageError> {
            let mut buffer = [0u8; 128];
            let data = self
                .nvs
                .get_blob(GAINS_KEY, &mut buffer)
                .map_err(|e| StorageError::Backend(format!("{:?}", e)))?;
            match data {
                Some(data) => Ok(Some(serde_json::from_slice(data)?)),
                None => Ok(None),
            }
        }

        fn save(&mut self, record: &GainRecord) -> Result<(), StorageError> {
            let data = serde_json::to_vec(record)?;
            self.nvs
                .set_blob(GAINS_KEY, &data)
                .map_err(|e| StorageError::Backend(format!("{:?}", e)))?;
            Ok(())
        }
    }
}
