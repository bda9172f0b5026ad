//! Saving and restoring the editable trip as one named record.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde_json::Value;

use crate::{
    animation::timing::{DEFAULT_LEG_SECONDS, LegTiming, MAX_LEG_SECONDS, MIN_LEG_SECONDS},
    foundation::error::{TripError, TripResult},
    model::{LocationPoint, Trip},
};

/// Key of the single saved project.
pub const PROJECT_KEY: &str = "tripreel-project";

/// The persisted part of a session.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Project {
    pub locations: Vec<LocationPoint>,
    /// Per-leg duration in seconds, used when `seconds_per_km` is absent.
    pub duration_secs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_per_km: Option<f64>,
}

impl Project {
    pub fn from_trip(trip: &Trip, timing: LegTiming) -> Self {
        let (duration_secs, seconds_per_km) = match timing {
            LegTiming::FixedSeconds(secs) => (secs, None),
            LegTiming::SecondsPerKm(rate) => (DEFAULT_LEG_SECONDS, Some(rate)),
        };
        Self {
            locations: trip.points().to_vec(),
            duration_secs,
            seconds_per_km,
        }
    }

    /// Rebuild the trip, checking the start/end/waypoint shape.
    pub fn trip(&self) -> TripResult<Trip> {
        Trip::from_points(self.locations.clone())
    }

    pub fn timing(&self) -> TripResult<LegTiming> {
        match self.seconds_per_km {
            Some(rate) => LegTiming::seconds_per_km(rate),
            None => LegTiming::fixed(self.duration_secs),
        }
    }

    /// Parse a saved project leniently.
    ///
    /// `duration_secs` is clamped into the valid range; a missing or non-numeric value becomes
    /// the default. Anything else malformed is an input error.
    pub fn from_json(text: &str) -> TripResult<Self> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| TripError::input(format!("saved project is not valid JSON: {e}")))?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| TripError::input("saved project must be a JSON object"))?;

        let duration = obj
            .get("duration_secs")
            .and_then(|v| {
                v.as_f64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            })
            .filter(|d| d.is_finite())
            .map(|d| d.round().clamp(f64::from(MIN_LEG_SECONDS), f64::from(MAX_LEG_SECONDS)) as u32)
            .unwrap_or(DEFAULT_LEG_SECONDS);
        obj.insert("duration_secs".to_string(), Value::from(duration));

        let project: Project = serde_json::from_value(value)
            .map_err(|e| TripError::input(format!("saved project is malformed: {e}")))?;
        if let Err(e) = project.trip() {
            return Err(match e {
                TripError::Input(_) => e,
                other => TripError::input(format!("saved project is malformed: {other}")),
            });
        }
        Ok(project)
    }

    pub fn to_json(&self) -> TripResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Synchronous string storage addressed by key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> TripResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> TripResult<()>;
    fn remove(&self, key: &str) -> TripResult<()>;
}

/// One `<key>.json` file per key inside a directory.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> TripResult<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(TripError::input(format!("invalid storage key '{key}'")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> TripResult<Option<String>> {
        let path = self.path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TripError::resource(format!(
                "failed to read '{}': {e}",
                path.display()
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> TripResult<()> {
        let path = self.path(key)?;
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            TripError::resource(format!(
                "failed to create storage directory '{}': {e}",
                self.dir.display()
            ))
        })?;
        std::fs::write(&path, value).map_err(|e| {
            TripError::resource(format!("failed to write '{}': {e}", path.display()))
        })
    }

    fn remove(&self, key: &str) -> TripResult<()> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TripError::resource(format!(
                "failed to remove '{}': {e}",
                path.display()
            ))),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> TripResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| TripError::resource("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> TripResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TripError::resource("memory store poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> TripResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TripError::resource("memory store poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

/// Reads and writes the [`PROJECT_KEY`] record.
pub struct ProjectStore<S> {
    store: S,
}

impl<S: KeyValueStore> ProjectStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn save(&self, project: &Project) -> TripResult<()> {
        self.store.set(PROJECT_KEY, &project.to_json()?)?;
        tracing::debug!(locations = project.locations.len(), "project saved");
        Ok(())
    }

    /// `Ok(None)` when nothing was saved yet.
    pub fn load(&self) -> TripResult<Option<Project>> {
        self.store
            .get(PROJECT_KEY)?
            .map(|text| Project::from_json(&text))
            .transpose()
    }

    pub fn clear(&self) -> TripResult<()> {
        self.store.remove(PROJECT_KEY)
    }
}

/// Load a project file from disk.
pub fn load_project_file(path: &Path) -> TripResult<Project> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TripError::input(format!("failed to read project '{}': {e}", path.display()))
    })?;
    Project::from_json(&text)
}

#[cfg(test)]
#[path = "../tests/unit/project/project.rs"]
mod tests;
