use std::path::PathBuf;

use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};

pub const SETTINGS_DIRECTORY_NAME: &str = "palaver";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 100;
pub const DEFAULT_SEARCH_PAGE_STEP: usize = 5;
pub const DEFAULT_DATABASE_FILE_NAME: &str = "palaver.sqlite3";

/// Tunables the engine reads once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Settle time on the search input before the directory is queried.
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    /// Initial result page size, and the increment applied by "show more".
    #[serde(default = "default_search_page_step")]
    pub search_page_step: usize,
    /// Location handed to the SQLite-backed document store.
    #[serde(default = "default_database_location")]
    pub database_location: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            search_debounce_ms: default_search_debounce_ms(),
            search_page_step: default_search_page_step(),
            database_location: default_database_location(),
        }
    }
}

impl SessionSettings {
    /// Defaults merged with the optional JSON settings file in the user's
    /// config directory. A missing or malformed file falls back to the
    /// defaults rather than failing session construction.
    pub fn load() -> Self {
        Self::load_from(default_settings_path())
    }

    pub fn load_from(path: Option<PathBuf>) -> Self {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }

        match figment.extract::<Self>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!("falling back to default settings: {error}");
                Self::default()
            }
        }
    }

    fn normalized(mut self) -> Self {
        if self.search_page_step == 0 {
            self.search_page_step = default_search_page_step();
        }
        if self.database_location.trim().is_empty() {
            self.database_location = default_database_location();
        }
        self
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|directory| {
        directory
            .join(SETTINGS_DIRECTORY_NAME)
            .join(SETTINGS_FILE_NAME)
    })
}

fn default_search_debounce_ms() -> u64 {
    DEFAULT_SEARCH_DEBOUNCE_MS
}

fn default_search_page_step() -> usize {
    DEFAULT_SEARCH_PAGE_STEP
}

fn default_database_location() -> String {
    dirs::data_dir().map_or_else(
        || DEFAULT_DATABASE_FILE_NAME.to_string(),
        |directory| {
            directory
                .join(SETTINGS_DIRECTORY_NAME)
                .join(DEFAULT_DATABASE_FILE_NAME)
                .display()
                .to_string()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("palaver-settings-test-{name}.json"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn a_missing_file_yields_defaults() {
        let settings =
            SessionSettings::load_from(Some(PathBuf::from("/nonexistent/settings.json")));
        assert_eq!(settings, SessionSettings::default());
    }

    #[test]
    fn file_values_override_defaults_field_by_field() {
        let path = temp_settings_file("override", r#"{ "search_debounce_ms": 250 }"#);

        let settings = SessionSettings::load_from(Some(path.clone()));
        assert_eq!(settings.search_debounce_ms, 250);
        assert_eq!(settings.search_page_step, DEFAULT_SEARCH_PAGE_STEP);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn a_malformed_file_falls_back_to_defaults() {
        let path = temp_settings_file("malformed", "{ not json");

        let settings = SessionSettings::load_from(Some(path.clone()));
        assert_eq!(settings, SessionSettings::default());

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn a_zero_page_step_is_normalized() {
        let path = temp_settings_file("zero-step", r#"{ "search_page_step": 0 }"#);

        let settings = SessionSettings::load_from(Some(path.clone()));
        assert_eq!(settings.search_page_step, DEFAULT_SEARCH_PAGE_STEP);

        std::fs::remove_file(path).ok();
    }
}
