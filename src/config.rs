//! Command-line interface configuration
//!
//! Configuration is read from a `relflash.toml` file in the current directory,
//! its parent, or the user's configuration directory, in that order. The
//! [Config] type handles the loading and saving of this file.

use std::{
    fs::{create_dir_all, read_to_string, write},
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::debug;
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::{Deserialize, Serialize};

use crate::{devices::UsbDevice, error::Error, firmware::ReleaseSource};

const CONFIG_FILE: &str = "relflash.toml";

/// A configured, known serial connection
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Name of the serial port used for communication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

/// Application configuration
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Project whose releases carry the firmware
    #[serde(default)]
    pub release: ReleaseSource,
    /// Preferred serial port connection information
    #[serde(default)]
    pub connection: Connection,
    /// USB devices accepted in addition to the built-in bridges
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
    /// Path of the file to save the configuration to
    #[serde(skip)]
    save_path: PathBuf,
}

impl Config {
    /// Load configuration from the configuration file
    pub fn load() -> Result<Self> {
        let file = Self::config_path()?;
        let raw_data = read_to_string(&file).unwrap_or_default();

        let mut config = Self::parse(&raw_data)
            .wrap_err_with(|| format!("Failed to parse {}", file.display()))?;
        config.save_path = file;
        debug!("Config: {:#?}", &config);

        Ok(config)
    }

    /// Parse configuration from TOML
    pub fn parse(raw_data: &str) -> Result<Self> {
        let toml_value = toml::from_str::<toml::Value>(raw_data).into_diagnostic()?;
        if let toml::Value::Table(top_level) = &toml_value {
            Self::validate_keys(top_level)?;
        }

        toml::from_str(raw_data).into_diagnostic()
    }

    fn validate_keys(top_level: &toml::map::Map<String, toml::Value>) -> Result<()> {
        let release_keys = ["api_url", "owner", "repo", "asset"];

        let mut misplaced_keys = Vec::new();
        for key in release_keys {
            if top_level.contains_key(key) {
                misplaced_keys.push(key);
            }
            for (section_name, value) in top_level {
                if let toml::Value::Table(table) = value {
                    if section_name != "release" && table.contains_key(key) {
                        misplaced_keys.push(key);
                    }
                }
            }
        }

        if misplaced_keys.is_empty() {
            Ok(())
        } else {
            let msg = misplaced_keys
                .into_iter()
                .map(|key| format!("'{key}' should be under [release]!"))
                .collect::<Vec<_>>()
                .join(", ");
            Err(Error::MisplacedKey(msg).into())
        }
    }

    fn write_config(&self, path: &Path) -> Result<()> {
        let serialized = toml::to_string(self)
            .into_diagnostic()
            .wrap_err("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            create_dir_all(parent)
                .into_diagnostic()
                .wrap_err("Failed to create config directory")?;
        }

        write(path, serialized)
            .into_diagnostic()
            .wrap_err_with(|| format!("Failed to write config to {}", path.display()))
    }

    /// Save a modified copy of the configuration to the configuration file
    pub fn save_with<F: Fn(&mut Self)>(&self, modify_fn: F) -> Result<()> {
        let mut copy = self.clone();
        modify_fn(&mut copy);

        copy.write_config(&self.save_path)
    }

    fn config_path() -> Result<PathBuf, Error> {
        let local_config = std::env::current_dir()?.join(CONFIG_FILE);
        if local_config.exists() {
            return Ok(local_config);
        }
        if let Some(parent_folder) = std::env::current_dir()?.parent() {
            let workspace_config = parent_folder.join(CONFIG_FILE);
            if workspace_config.exists() {
                return Ok(workspace_config);
            }
        }

        let global_config = match ProjectDirs::from("rs", "relflash", "relflash") {
            Some(project_dirs) => project_dirs.config_dir().join(CONFIG_FILE),
            None => local_config,
        };

        Ok(global_config)
    }
}
