//! Settings file handling.
//!
//! - Writes go to a sibling temp file that is renamed over the target
//! - `update_section` rewrites one table and leaves the rest of the file alone
//! - Files with unknown tables or missing keys are normalized on load

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item};

use super::settings::{ConfigSection, Settings};

/// Errors from reading or writing the settings file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not edit settings document: {0}")]
    Edit(#[from] toml_edit::TomlError),

    #[error("No settings file at {}", .0.display())]
    NotFound(PathBuf),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Owns the settings file path and the settings loaded from it.
pub struct ConfigManager {
    path: PathBuf,
    settings: Settings,
}

impl ConfigManager {
    /// Create a manager holding defaults. Nothing is read until `load*`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: Settings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable settings. Nothing is persisted until `save` or `update_section`.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Read the settings file; it must exist.
    pub fn load(&mut self) -> ConfigResult<()> {
        let (settings, _) = self.read()?;
        self.settings = settings;
        Ok(())
    }

    /// Read the settings file, writing defaults first when it is absent.
    ///
    /// A file with unknown tables or missing keys is rewritten in full.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        match self.read() {
            Ok((settings, needs_rewrite)) => {
                self.settings = settings;
                if needs_rewrite {
                    tracing::debug!("Normalizing settings file {}", self.path.display());
                    self.save()?;
                }
            }
            Err(ConfigError::NotFound(_)) => {
                self.settings = Settings::default();
                self.save()?;
                tracing::info!("Wrote default settings to {}", self.path.display());
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Create the logs folder and the output folder (if one is configured).
    pub fn ensure_dirs_exist(&self) -> ConfigResult<()> {
        fs::create_dir_all(self.logs_folder())?;
        if let Some(output) = self.output_folder() {
            fs::create_dir_all(output)?;
        }
        Ok(())
    }

    pub fn logs_folder(&self) -> PathBuf {
        PathBuf::from(&self.settings.paths.logs_folder)
    }

    /// Configured output folder; `None` means next to each source.
    pub fn output_folder(&self) -> Option<PathBuf> {
        let folder = self.settings.paths.output_folder.trim();
        (!folder.is_empty()).then(|| PathBuf::from(folder))
    }

    /// Write every section, with a comment header per table.
    pub fn save(&self) -> ConfigResult<()> {
        let mut text = String::from("# Noise Reducer Batch settings\n\n");
        for section in ConfigSection::ALL {
            text.push_str(&format!(
                "# {}\n[{}]\n{}\n",
                section_comment(section),
                section.table_name(),
                self.section_toml(section)?
            ));
        }
        write_atomic(&self.path, &text)?;
        Ok(())
    }

    /// Persist one section, keeping the other tables as they are on disk.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        let mut doc = match fs::read_to_string(&self.path) {
            Ok(text) => text.parse::<DocumentMut>()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => DocumentMut::new(),
            Err(e) => return Err(e.into()),
        };

        let table: DocumentMut = self.section_toml(section)?.parse()?;
        doc[section.table_name()] = Item::Table(table.as_table().clone());

        write_atomic(&self.path, &doc.to_string())?;
        Ok(())
    }

    fn read(&self) -> ConfigResult<(Settings, bool)> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        parse_and_clean(&text)
    }

    fn section_toml(&self, section: ConfigSection) -> ConfigResult<String> {
        let text = match section {
            ConfigSection::Paths => toml::to_string_pretty(&self.settings.paths)?,
            ConfigSection::Processing => toml::to_string_pretty(&self.settings.processing)?,
            ConfigSection::Logging => toml::to_string_pretty(&self.settings.logging)?,
        };
        Ok(text)
    }
}

fn section_comment(section: ConfigSection) -> &'static str {
    match section {
        ConfigSection::Paths => "Output and log directories",
        ConfigSection::Processing => "Noise reduction and output naming",
        ConfigSection::Logging => "Application and per-job logging",
    }
}

/// Write `content` to `<path>.tmp`, fsync, then rename over `path`.
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp, path)
}

/// Parse settings and report whether the file needs rewriting.
fn parse_and_clean(text: &str) -> ConfigResult<(Settings, bool)> {
    let settings: Settings = toml::from_str(text)?;
    let doc: DocumentMut = text.parse()?;

    let known = |key: &str| ConfigSection::ALL.iter().any(|s| s.table_name() == key);
    if doc.iter().any(|(key, _)| !known(key)) {
        return Ok((settings, true));
    }

    // Any key present in the serialized defaults but absent on disk.
    for section in ConfigSection::ALL {
        let expected: DocumentMut = match section {
            ConfigSection::Paths => toml::to_string(&settings.paths)?,
            ConfigSection::Processing => toml::to_string(&settings.processing)?,
            ConfigSection::Logging => toml::to_string(&settings.logging)?,
        }
        .parse()?;
        let Some(table) = doc.get(section.table_name()).and_then(Item::as_table_like) else {
            return Ok((settings, true));
        };
        if expected.iter().any(|(key, _)| !table.contains_key(key)) {
            return Ok((settings, true));
        }
    }

    Ok((settings, false))
}
