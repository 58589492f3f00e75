//! On-disk reference cache.
//!
//! Layout under the reference root:
//!
//! ```text
//! <root>/<addonDirName>/.cacheproperties        valid=true|false
//! <root>/<addonDirName>/<extractDirName>/...    copied scripts and headers
//! ```
//!
//! An entry without a marker, or with `valid=true`, is trusted. `valid=false` means a
//! save was interrupted and the addon must be indexed again.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io;
use walkdir::WalkDir;

pub const CACHE_MARKER_FILE: &str = ".cacheproperties";

/// Extensions (case-insensitive) copied from extracted archives into the cache
pub const REFERENCE_EXTENSIONS: [&str; 5] = ["sqf", "cpp", "h", "hh", "hpp"];

const TEXT_CONFIG_NAME: &str = "config.cpp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Missing,
    Valid,
    Invalid,
}

/// A file to copy into a cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceFile {
    pub source: Utf8PathBuf,
    /// Path relative to the extraction directory
    pub relative: Utf8PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReferenceCache {
    root: Utf8PathBuf,
}

impl ReferenceCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn entry_dir(&self, addon_name: &str) -> Utf8PathBuf {
        self.root.join(addon_name)
    }

    pub fn entry_state(&self, addon_name: &str) -> EntryState {
        let entry = self.entry_dir(addon_name);
        if !entry.is_dir() {
            return EntryState::Missing;
        }

        let marker = entry.join(CACHE_MARKER_FILE);
        if !marker.exists() {
            return EntryState::Valid;
        }
        match fs::read_to_string(&marker) {
            Ok(contents) => match parse_valid_flag(&contents) {
                Some(false) => EntryState::Invalid,
                _ => EntryState::Valid,
            },
            Err(e) => {
                tracing::debug!("Unreadable cache marker {}: {}", marker, e);
                EntryState::Valid
            }
        }
    }

    /// Every `config.cpp` (any case) under a cache entry, in path order.
    pub fn config_files(&self, entry: &Utf8Path) -> Vec<Utf8PathBuf> {
        find_files(entry, |name| name.eq_ignore_ascii_case(TEXT_CONFIG_NAME))
    }

    /// Remove any previous entry for `addon_name`, create a fresh one and mark it invalid
    /// until [`mark_valid`](Self::mark_valid) is called.
    pub fn prepare_entry(&self, addon_name: &str) -> io::Result<Utf8PathBuf> {
        let entry = self.entry_dir(addon_name);
        if entry.exists() {
            fs::remove_dir_all(&entry)?;
        }
        fs::create_dir_all(&entry)?;
        write_marker(&entry, false)?;
        Ok(entry)
    }

    pub fn mark_valid(&self, entry: &Utf8Path) -> io::Result<()> {
        write_marker(entry, true)
    }

    /// Files under `extract_dir` worth keeping in the cache.
    pub fn reference_files(&self, extract_dir: &Utf8Path) -> Vec<ReferenceFile> {
        find_files(extract_dir, |name| has_reference_extension(Utf8Path::new(name)))
            .into_iter()
            .filter_map(|source| {
                let relative = source.strip_prefix(extract_dir).ok()?.to_path_buf();
                Some(ReferenceFile { source, relative })
            })
            .collect()
    }

    /// Copy one file to `<entry>/<extractDirName>/<relative>`, creating directories as
    /// needed. Returns the target path.
    pub fn copy_reference_file(
        &self,
        entry: &Utf8Path,
        extract_dir_name: &str,
        file: &ReferenceFile,
    ) -> io::Result<Utf8PathBuf> {
        let target = entry.join(extract_dir_name).join(&file.relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&file.source, &target)?;
        Ok(target)
    }
}

pub fn has_reference_extension(path: &Utf8Path) -> bool {
    path.extension().is_some_and(|ext| {
        REFERENCE_EXTENSIONS
            .iter()
            .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    })
}

fn write_marker(entry: &Utf8Path, valid: bool) -> io::Result<()> {
    fs::write(entry.join(CACHE_MARKER_FILE), format!("valid={}\n", valid))
}

/// Read the `valid` property from a properties-style document.
///
/// Lines starting with `#` or `!` are comments; keys and values are separated by `=`,
/// `:` or whitespace. Returns `None` if there is no `valid` key.
pub fn parse_valid_flag(contents: &str) -> Option<bool> {
    let mut flag = None;
    for line in contents.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        let split = line
            .find(|c: char| c == '=' || c == ':' || c.is_whitespace())
            .unwrap_or(line.len());
        let (key, rest) = line.split_at(split);
        if key != "valid" {
            continue;
        }
        let value = rest
            .trim_start()
            .trim_start_matches(['=', ':'])
            .trim();
        flag = Some(value != "false");
    }
    flag
}

fn find_files(dir: &Utf8Path, matches: impl Fn(&str) -> bool) -> Vec<Utf8PathBuf> {
    let mut found: Vec<Utf8PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| match Utf8PathBuf::from_path_buf(e.into_path()) {
            Ok(path) => Some(path),
            Err(path) => {
                tracing::debug!("Skipping non-UTF-8 path {}", path.display());
                None
            }
        })
        .filter(|path| path.file_name().is_some_and(&matches))
        .collect();
    found.sort();
    found
}
