use crate::models::{AddonsConfig, IndexerSettings};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Loads and saves the YAML configuration files.
///
/// - `addons.yaml`: addon roots, reference directory, black/white lists
/// - `settings.yaml`: tools location, timeouts, worker count
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    addons_config_path: Utf8PathBuf,
    settings_path: Utf8PathBuf,
}

impl ConfigManager {
    pub const ADDONS_CONFIG_FILE: &'static str = "addons.yaml";
    pub const SETTINGS_FILE: &'static str = "settings.yaml";

    /// Create a ConfigManager for `config_dir`, creating the directory if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            addons_config_path: config_dir.join(Self::ADDONS_CONFIG_FILE),
            settings_path: config_dir.join(Self::SETTINGS_FILE),
            config_dir,
        })
    }

    /// Load `addons.yaml` with `$PROJECT_DIR$` resolved against `project_dir`.
    ///
    /// Returns `None` when the file does not exist; there is no sensible default
    /// reference directory.
    pub fn load_addons_config(&self, project_dir: Option<&Utf8Path>) -> Result<Option<AddonsConfig>> {
        if !self.addons_config_path.exists() {
            tracing::warn!("Addons config file not found at {}", self.addons_config_path);
            return Ok(None);
        }

        let file_contents = fs::read_to_string(&self.addons_config_path).with_context(|| {
            format!("Failed to read addons config: {}", self.addons_config_path)
        })?;

        let config: AddonsConfig = serde_yaml_ng::from_str(&file_contents).with_context(|| {
            format!("Failed to parse addons config: {}", self.addons_config_path)
        })?;

        tracing::info!("Loaded addons config from {}", self.addons_config_path);
        Ok(Some(config.resolve_macros(project_dir.map(Utf8Path::as_str))))
    }

    /// Save `addons.yaml` as given (macros are not re-inserted).
    pub fn save_addons_config(&self, config: &AddonsConfig) -> Result<()> {
        let yaml_string = serde_yaml_ng::to_string(config)
            .context("Failed to serialize addons config to YAML")?;

        fs::write(&self.addons_config_path, yaml_string).with_context(|| {
            format!("Failed to write addons config: {}", self.addons_config_path)
        })?;

        tracing::info!("Saved addons config to {}", self.addons_config_path);
        Ok(())
    }

    /// Load `settings.yaml`, or defaults if it does not exist.
    pub fn load_settings(&self) -> Result<IndexerSettings> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
            return Ok(IndexerSettings::default());
        }

        let file_contents = fs::read_to_string(&self.settings_path)
            .with_context(|| format!("Failed to read settings: {}", self.settings_path))?;

        let settings: IndexerSettings = serde_yaml_ng::from_str(&file_contents)
            .with_context(|| format!("Failed to parse settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(settings)
    }

    pub fn save_settings(&self, settings: &IndexerSettings) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(settings).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}
