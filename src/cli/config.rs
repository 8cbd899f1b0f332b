use anyhow::{Result, anyhow};
use home::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::cli::BinsightCli;
use crate::config::{Config, KEYS};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ConfigData {
    pub settings: BTreeMap<String, String>,
}

/// Persistent CLI settings in `~/.binsight/config.json`.
pub struct ConfigStore {
    store_path: PathBuf,
}

impl ConfigStore {
    pub fn new() -> Result<Self> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Self::at(home.join(".binsight").join("config.json"))
    }

    pub fn at(store_path: PathBuf) -> Result<Self> {
        if let Some(dir) = store_path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(Self { store_path })
    }

    pub fn load_config(&self) -> Result<ConfigData> {
        if !self.store_path.exists() {
            return Ok(ConfigData::default());
        }

        let content = fs::read_to_string(&self.store_path)?;
        let config: ConfigData = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_config(&self, config: &ConfigData) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&self.store_path, json)?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let config = self.load_config()?;
        Ok(config.settings.get(&key.to_uppercase()).cloned())
    }

    /// Rejects keys and values that [`Config::apply`] would reject.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        Config::default().apply(key, value)?;

        let mut config = self.load_config()?;
        config.settings.insert(key.to_uppercase(), value.trim().to_string());
        self.save_config(&config)
    }
}

#[derive(clap::Subcommand)]
pub enum ConfigCommands {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

impl BinsightCli {
    pub fn handle_config_command(&mut self, command: ConfigCommands) -> Result<()> {
        match command {
            ConfigCommands::Get { key } => {
                let effective = self.resolve_config()?;
                match effective.get(&key) {
                    Some(value) => println!("{}: {}", key.to_uppercase(), value),
                    None => println!("Configuration key '{}' not found", key),
                }
            }
            ConfigCommands::Set { key, value } => {
                self.config_store.set_setting(&key, &value)?;
                println!("✅ Set {} to: {}", key.to_uppercase(), value.trim());
            }
            ConfigCommands::List => {
                let effective = self.resolve_config()?;
                let stored = self.config_store.load_config()?;
                println!("📋 Configuration:");
                for key in KEYS {
                    let value = effective.get(key).unwrap_or_default();
                    let origin = if stored.settings.contains_key(key) { " (stored)" } else { "" };
                    println!("  {}: {}{}", key, value, origin);
                }
            }
        }
        Ok(())
    }
}
