use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::filter::{PredicateSet, Tag};

/// A filter the user saved, applied while `active`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SavedFilter {
    pub name: String,
    pub tag: Tag,
    pub expression: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Builds compute a row's full event list at `row duration / full_event_buckets`.
    pub full_event_buckets: i64,
    /// After filters become active, rescan every row at full resolution once, so events hidden
    /// in aggregated states can still match.
    pub full_scan: bool,
    pub saved_filters: Vec<SavedFilter>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            full_event_buckets: 2000,
            full_scan: true,
            saved_filters: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn has_active_filters(&self) -> bool {
        self.saved_filters.iter().any(|filter| filter.active)
    }

    /// Predicates of the active saved filters. For the same tag, later filters win.
    pub fn predicate_set(&self) -> PredicateSet {
        PredicateSet::from_expressions(
            self.saved_filters
                .iter()
                .filter(|filter| filter.active)
                .map(|filter| (filter.tag, filter.expression.as_str())),
        )
    }
}

/// On-disk format of the config. If the structure changes, add a new version so that files
/// written by older versions can still be read.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum ConfigData {
    V1(EngineConfig),
}

impl Default for ConfigData {
    fn default() -> Self {
        ConfigData::V1(EngineConfig::default())
    }
}

impl From<ConfigData> for EngineConfig {
    fn from(data: ConfigData) -> Self {
        match data {
            ConfigData::V1(config) => config,
        }
    }
}

pub fn load_config() -> Result<EngineConfig> {
    load_config_from(&config_file_path()?)
}

pub fn save_config(config: &EngineConfig) -> Result<()> {
    save_config_to(config, &config_file_path()?)
}

pub fn load_config_from(path: &Path) -> Result<EngineConfig> {
    tracing::debug!(path = %path.display(), "reading config");
    if !path.try_exists()? {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        return Ok(EngineConfig::default());
    }
    let file = std::fs::File::open(path)?;
    let data: ConfigData = serde_json::from_reader(file)?;
    Ok(data.into())
}

pub fn save_config_to(config: &EngineConfig, path: &Path) -> Result<()> {
    tracing::debug!(path = %path.display(), "writing config");
    let folder = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path {} has no parent", path.display()))?;
    std::fs::create_dir_all(folder)?;

    // First write the data to a temporary file, then move it to the final location.
    // A crash halfway through leaves the old file intact.
    let random_number: u64 = rand::random();
    let write_file_path = folder.join(format!("temporary_config{}.json", random_number));
    let mut file = std::fs::File::create(&write_file_path)?;
    serde_json::to_writer_pretty(&mut file, &ConfigData::V1(config.clone()))?;
    file.sync_all()?;
    std::fs::rename(&write_file_path, path)?;

    Ok(())
}

fn config_file_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("org", "timegraph", "timegraph")
        .ok_or_else(|| anyhow::anyhow!("no home directory to store the config in"))?;
    Ok(dirs.config_dir().join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert_eq!(load_config_from(&path).unwrap(), EngineConfig::default());

        let config = EngineConfig {
            full_event_buckets: 500,
            full_scan: false,
            saved_filters: vec![SavedFilter {
                name: "only running".to_string(),
                tag: Tag::Excluded,
                expression: "name == RUNNING".to_string(),
                active: true,
            }],
        };
        save_config_to(&config, &path).unwrap();
        assert_eq!(load_config_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let data: ConfigData =
            serde_json::from_str(r#"{"V1": {"full_scan": false}}"#).unwrap();
        let config = EngineConfig::from(data);
        assert!(!config.full_scan);
        assert_eq!(config.full_event_buckets, 2000);
    }

    #[test]
    fn only_active_filters_become_predicates() {
        let config = EngineConfig {
            saved_filters: vec![
                SavedFilter {
                    name: "a".to_string(),
                    tag: Tag::Excluded,
                    expression: "name == A".to_string(),
                    active: false,
                },
                SavedFilter {
                    name: "b".to_string(),
                    tag: Tag::Highlighted,
                    expression: "name == B".to_string(),
                    active: true,
                },
            ],
            ..Default::default()
        };
        assert!(config.has_active_filters());
        let set = config.predicate_set();
        assert_eq!(set.len(), 1);
        assert!(set.get(Tag::Highlighted).is_some());
    }
}
