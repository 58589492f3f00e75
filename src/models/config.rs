use crate::services::tools::{ArmaTools, DEFAULT_CONVERT_TIMEOUT, DEFAULT_EXTRACT_TIMEOUT};
use crate::services::worker_pool::DEFAULT_WORKER_THREADS;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder in `addons.yaml` paths that resolves to the project directory.
pub const PROJECT_DIR_MACRO: &str = "$PROJECT_DIR$";

/// Which addons to index and where to keep the reference cache (`addons.yaml`).
///
/// ```yaml
/// roots:
///   - $PROJECT_DIR$/addons
/// reference-dir: D:/Arma 3/addon-reference
/// blacklist:
///   - "@Broken"
/// whitelist: []
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonsConfig {
    /// Directories whose `@`-prefixed children are addons
    #[serde(default)]
    pub roots: Vec<String>,

    #[serde(rename = "reference-dir")]
    pub reference_dir: String,

    #[serde(default)]
    pub blacklist: Vec<String>,

    /// Empty means every addon not on the blacklist
    #[serde(default)]
    pub whitelist: Vec<String>,
}

impl AddonsConfig {
    pub fn new(reference_dir: impl Into<String>) -> Self {
        Self {
            roots: Vec::new(),
            reference_dir: reference_dir.into(),
            blacklist: Vec::new(),
            whitelist: Vec::new(),
        }
    }

    /// Replace [`PROJECT_DIR_MACRO`] in the roots and the reference directory. `None`
    /// resolves to `.`.
    pub fn resolve_macros(mut self, project_dir: Option<&str>) -> Self {
        let project_dir = project_dir.unwrap_or(".");
        for root in &mut self.roots {
            *root = root.replace(PROJECT_DIR_MACRO, project_dir);
        }
        self.reference_dir = self.reference_dir.replace(PROJECT_DIR_MACRO, project_dir);
        self
    }

    pub fn reference_root(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.reference_dir)
    }

    /// Deny-list first, then the allow-list (empty allow-list allows everything).
    pub fn is_blacklisted(&self, addon_name: &str) -> bool {
        self.blacklist.iter().any(|b| b == addon_name)
    }

    pub fn is_whitelisted(&self, addon_name: &str) -> bool {
        self.whitelist.is_empty() || self.whitelist.iter().any(|w| w == addon_name)
    }
}

/// Indexer settings from `settings.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexerSettings {
    /// Arma 3 Tools installation directory
    #[serde(default)]
    pub tools_directory: Option<Utf8PathBuf>,

    /// Archive extractor, relative to the tools directory
    #[serde(default = "default_extractor")]
    pub extractor: Utf8PathBuf,

    /// Binary config converter, relative to the tools directory
    #[serde(default = "default_converter")]
    pub converter: Utf8PathBuf,

    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,

    #[serde(default = "default_convert_timeout_secs")]
    pub convert_timeout_secs: u64,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_log_directory")]
    pub log_directory: Utf8PathBuf,

    #[serde(default)]
    pub debug_mode: bool,
}

impl IndexerSettings {
    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    pub fn convert_timeout(&self) -> Duration {
        Duration::from_secs(self.convert_timeout_secs)
    }
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            tools_directory: None,
            extractor: default_extractor(),
            converter: default_converter(),
            extract_timeout_secs: default_extract_timeout_secs(),
            convert_timeout_secs: default_convert_timeout_secs(),
            worker_threads: default_worker_threads(),
            log_directory: default_log_directory(),
            debug_mode: false,
        }
    }
}

fn default_extractor() -> Utf8PathBuf {
    Utf8PathBuf::from(ArmaTools::DEFAULT_EXTRACTOR)
}

fn default_converter() -> Utf8PathBuf {
    Utf8PathBuf::from(ArmaTools::DEFAULT_CONVERTER)
}

fn default_extract_timeout_secs() -> u64 {
    DEFAULT_EXTRACT_TIMEOUT.as_secs()
}

fn default_convert_timeout_secs() -> u64 {
    DEFAULT_CONVERT_TIMEOUT.as_secs()
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_log_directory() -> Utf8PathBuf {
    Utf8PathBuf::from("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexer_settings_defaults() {
        let settings = IndexerSettings::default();
        assert_eq!(settings.extract_timeout(), Duration::from_secs(600));
        assert_eq!(settings.convert_timeout(), Duration::from_secs(10));
        assert_eq!(settings.worker_threads, 2);
        assert!(settings.tools_directory.is_none());
        assert!(!settings.debug_mode);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: IndexerSettings =
            serde_yaml_ng::from_str("tools-directory: C:/Arma 3 Tools\nworker-threads: 4\n").unwrap();
        assert_eq!(settings.tools_directory.as_deref(), Some(camino::Utf8Path::new("C:/Arma 3 Tools")));
        assert_eq!(settings.worker_threads, 4);
        assert_eq!(settings.extractor, Utf8PathBuf::from("BankRev/BankRev.exe"));
    }

    #[test]
    fn test_project_dir_macro_resolution() {
        let mut config = AddonsConfig::new("$PROJECT_DIR$/reference");
        config.roots.push("$PROJECT_DIR$/addons".to_string());

        let resolved = config.clone().resolve_macros(Some("/work/mission"));
        assert_eq!(resolved.roots, vec!["/work/mission/addons".to_string()]);
        assert_eq!(resolved.reference_dir, "/work/mission/reference");

        let fallback = config.resolve_macros(None);
        assert_eq!(fallback.reference_dir, "./reference");
    }

    #[test]
    fn test_blacklist_then_whitelist() {
        let mut config = AddonsConfig::new("ref");
        assert!(config.is_whitelisted("@Anything"));

        config.blacklist.push("@Bad".to_string());
        config.whitelist.push("@Good".to_string());
        assert!(config.is_blacklisted("@Bad"));
        assert!(config.is_whitelisted("@Good"));
        assert!(!config.is_whitelisted("@Other"));
    }

    #[test]
    fn test_reference_dir_is_required() {
        let result: Result<AddonsConfig, _> = serde_yaml_ng::from_str("roots: [a]\n");
        assert!(result.is_err());
    }
}
