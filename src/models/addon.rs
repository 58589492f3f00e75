use super::AddonIndexingHandle;
use crate::header::HeaderFile;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;

/// An indexed addon, as published to the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Addon {
    name: String,
    addon_directory: Utf8PathBuf,
    reference_directory: Option<Utf8PathBuf>,
    config_files: Vec<HeaderFile>,
    define_macros: HashMap<String, String>,
}

impl Addon {
    /// Build the final addon from a finished handle, draining its parse results.
    ///
    /// Macros from all config files are merged; a later definition of the same name
    /// replaces an earlier one.
    pub fn from_handle(handle: &AddonIndexingHandle) -> Self {
        let mut config_files = Vec::new();
        let mut define_macros = HashMap::new();
        for result in handle.take_parse_results() {
            define_macros.extend(result.define_macros);
            config_files.push(result.file);
        }

        Self {
            name: handle.addon_name().to_string(),
            addon_directory: handle.addon_directory().to_path_buf(),
            reference_directory: handle.reference_directory().map(Utf8Path::to_path_buf),
            config_files,
            define_macros,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addon_directory(&self) -> &Utf8Path {
        &self.addon_directory
    }

    /// Reference cache entry the configs were read from or saved to
    pub fn reference_directory(&self) -> Option<&Utf8Path> {
        self.reference_directory.as_deref()
    }

    pub fn config_files(&self) -> &[HeaderFile] {
        &self.config_files
    }

    pub fn define_macros(&self) -> &HashMap<String, String> {
        &self.define_macros
    }
}
