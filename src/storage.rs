//! Key-value persistence for calibrations and user settings

use crate::{
    calibration::CalibrationData,
    config::{CalibrationMode, EyeSelection, SmoothingMode},
    utils::safe_cast::i64_to_u32,
    Error, Result,
};
use log::{debug, info, warn};
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

/// String key-value store with typed accessors layered on top
pub trait KeyValueStore: Send {
    /// Raw value for `key`
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a raw value
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove a key, returning whether it existed
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn remove(&mut self, key: &str) -> Result<bool>;

    /// Value for `key` parsed as a float
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a number
    fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        self.get_string(key)?.map(|v| parse_value(key, &v)).transpose()
    }

    /// Store a float
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn set_f64(&mut self, key: &str, value: f64) -> Result<()> {
        self.set_string(key, &value.to_string())
    }

    /// Value for `key` parsed as a boolean
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not `true` or `false`
    fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_string(key)?.map(|v| parse_value(key, &v)).transpose()
    }

    /// Store a boolean
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn set_bool(&mut self, key: &str, value: bool) -> Result<()> {
        self.set_string(key, if value { "true" } else { "false" })
    }

    /// Value for `key` parsed as an integer
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not an integer
    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_string(key)?.map(|v| parse_value(key, &v)).transpose()
    }

    /// Store an integer
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn set_i64(&mut self, key: &str, value: i64) -> Result<()> {
        self.set_string(key, &value.to_string())
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::StorageError(format!("Invalid value for {key}: {value:?} ({e})")))
}

/// In-memory store, contents are lost on drop
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        Ok(self.values.remove(key).is_some())
    }
}

/// Store backed by a flat YAML map, rewritten on every change
#[derive(Debug)]
pub struct YamlFileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl YamlFileStore {
    /// Open a store, starting empty if the file does not exist yet
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&content)
                    .map_err(|e| Error::StorageError(format!("Invalid store file {}: {e}", path.display())))?
            }
        } else {
            BTreeMap::new()
        };
        debug!("Opened store {} with {} keys", path.display(), values.len());
        Ok(Self { path, values })
    }

    /// Location of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_yaml::to_string(&self.values)?)?;
        Ok(())
    }
}

impl KeyValueStore for YamlFileStore {
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn remove(&mut self, key: &str) -> Result<bool> {
        if self.values.remove(key).is_none() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }
}

const CALIBRATION_FIELDS: [&str; 6] = ["transform_x", "transform_y", "screen_width", "screen_height", "error", "mode"];

fn calibration_key(mode: CalibrationMode, field: &str) -> String {
    format!("calibration.{}.{field}", mode.as_str())
}

fn join_coefficients(coefficients: &[f64]) -> String {
    coefficients.iter().map(f64::to_string).collect::<Vec<_>>().join(",")
}

fn split_coefficients(key: &str, value: &str) -> Result<Vec<f64>> {
    value.split(',').map(|v| parse_value(key, v)).collect()
}

/// Calibration persistence, one slot per calibration mode
pub struct CalibrationStore<'a> {
    store: &'a mut dyn KeyValueStore,
}

impl<'a> CalibrationStore<'a> {
    /// Wrap a key-value store
    pub fn new(store: &'a mut dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Save a calibration under `mode`.
    ///
    /// Returns `Ok(false)` without writing when the coefficients do not
    /// match the mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written
    pub fn save_calibration_data(&mut self, data: &CalibrationData, mode: CalibrationMode) -> Result<bool> {
        let expected = mode.coefficient_count();
        if data.mode != mode || data.transform_x.len() != expected || data.transform_y.len() != expected {
            warn!("Refusing to save {} calibration into the {mode} slot", data.mode);
            return Ok(false);
        }

        self.store
            .set_string(&calibration_key(mode, "transform_x"), &join_coefficients(&data.transform_x))?;
        self.store
            .set_string(&calibration_key(mode, "transform_y"), &join_coefficients(&data.transform_y))?;
        self.store
            .set_i64(&calibration_key(mode, "screen_width"), i64::from(data.screen_width))?;
        self.store
            .set_i64(&calibration_key(mode, "screen_height"), i64::from(data.screen_height))?;
        self.store.set_f64(&calibration_key(mode, "error"), data.calibration_error)?;
        self.store.set_string(&calibration_key(mode, "mode"), mode.as_str())?;

        info!("Saved {mode} calibration ({}x{})", data.screen_width, data.screen_height);
        Ok(true)
    }

    /// Load the calibration saved under `mode`, `None` if there is none
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds malformed data
    pub fn load_calibration_data(&self, mode: CalibrationMode) -> Result<Option<CalibrationData>> {
        let x_key = calibration_key(mode, "transform_x");
        let Some(transform_x) = self.store.get_string(&x_key)? else {
            debug!("No stored {mode} calibration");
            return Ok(None);
        };
        let y_key = calibration_key(mode, "transform_y");
        let transform_y = self
            .store
            .get_string(&y_key)?
            .ok_or_else(|| Error::StorageError(format!("Missing {y_key}")))?;

        let stored_mode: CalibrationMode = self
            .store
            .get_string(&calibration_key(mode, "mode"))?
            .map_or(Ok(mode), |m| m.parse())?;
        if stored_mode != mode {
            return Err(Error::CalibrationError(format!(
                "Calibration slot {mode} holds a {stored_mode} calibration"
            )));
        }

        let dimension = |field: &str| -> Result<u32> {
            let key = calibration_key(mode, field);
            let value = self
                .store
                .get_i64(&key)?
                .ok_or_else(|| Error::StorageError(format!("Missing {key}")))?;
            i64_to_u32(value).map_err(|e| Error::StorageError(format!("Invalid value for {key}: {e}")))
        };

        Ok(Some(CalibrationData {
            transform_x: split_coefficients(&x_key, &transform_x)?,
            transform_y: split_coefficients(&y_key, &transform_y)?,
            screen_width: dimension("screen_width")?,
            screen_height: dimension("screen_height")?,
            calibration_error: self.store.get_f64(&calibration_key(mode, "error"))?.unwrap_or(0.0),
            mode,
        }))
    }

    /// Delete the calibration saved under `mode`, returning whether one existed
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written
    pub fn delete_calibration_data(&mut self, mode: CalibrationMode) -> Result<bool> {
        let mut existed = false;
        for field in CALIBRATION_FIELDS {
            existed |= self.store.remove(&calibration_key(mode, field))?;
        }
        if existed {
            info!("Deleted {mode} calibration");
        }
        Ok(existed)
    }
}

/// User adjustments persisted between sessions
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    /// Horizontal sensitivity
    pub sensitivity_x: f64,
    /// Vertical sensitivity
    pub sensitivity_y: f64,
    /// Horizontal offset
    pub offset_x: f64,
    /// Vertical offset
    pub offset_y: f64,
    /// Smoothing filter
    pub smoothing_mode: SmoothingMode,
    /// Eyes feeding the estimate
    pub eye_selection: EyeSelection,
    /// Calibration mode last used
    pub calibration_mode: CalibrationMode,
}

impl Settings {
    /// Write every setting under `settings.`
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written
    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        store.set_f64("settings.sensitivity_x", self.sensitivity_x)?;
        store.set_f64("settings.sensitivity_y", self.sensitivity_y)?;
        store.set_f64("settings.offset_x", self.offset_x)?;
        store.set_f64("settings.offset_y", self.offset_y)?;
        store.set_string("settings.smoothing_mode", self.smoothing_mode.as_str())?;
        store.set_string("settings.eye_selection", self.eye_selection.as_str())?;
        store.set_string("settings.calibration_mode", self.calibration_mode.as_str())?;
        Ok(())
    }

    /// Read settings, keeping `fallback` values for missing keys
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or holds malformed values
    pub fn load(store: &dyn KeyValueStore, fallback: Self) -> Result<Self> {
        Ok(Self {
            sensitivity_x: store.get_f64("settings.sensitivity_x")?.unwrap_or(fallback.sensitivity_x),
            sensitivity_y: store.get_f64("settings.sensitivity_y")?.unwrap_or(fallback.sensitivity_y),
            offset_x: store.get_f64("settings.offset_x")?.unwrap_or(fallback.offset_x),
            offset_y: store.get_f64("settings.offset_y")?.unwrap_or(fallback.offset_y),
            smoothing_mode: store
                .get_string("settings.smoothing_mode")?
                .map_or(Ok(fallback.smoothing_mode), |v| v.parse())?,
            eye_selection: store
                .get_string("settings.eye_selection")?
                .map_or(Ok(fallback.eye_selection), |v| v.parse())?,
            calibration_mode: store
                .get_string("settings.calibration_mode")?
                .map_or(Ok(fallback.calibration_mode), |v| v.parse())?,
        })
    }
}
