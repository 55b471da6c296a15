use crate::config::AppConfig;
use crate::events::{emit, BatchEvent, EventSender};
use crate::services::{Service, ServiceResult};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to save config: {0}")]
    SaveFailed(String),
    #[error("Invalid config path: {path}")]
    InvalidPath { path: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Clone)]
pub struct ConfigService {
    config: Arc<RwLock<AppConfig>>,
    event_sender: EventSender,
    config_path: Option<PathBuf>,
}

impl ConfigService {
    pub fn new(event_sender: EventSender) -> Self {
        Self::with_path(event_sender, AppConfig::default_path())
    }

    pub fn with_path(event_sender: EventSender, config_path: Option<PathBuf>) -> Self {
        Self {
            config: Arc::new(RwLock::new(AppConfig::default())),
            event_sender,
            config_path,
        }
    }

    pub fn config_path(&self) -> Option<&PathBuf> {
        self.config_path.as_ref()
    }

    /// Never fails on a missing or broken file; defaults are used instead.
    pub async fn load_config(&self) -> AppConfig {
        let config = if let Some(config_path) = &self.config_path {
            match tokio::fs::read_to_string(config_path).await {
                Ok(config_data) => match serde_json::from_str(&config_data) {
                    Ok(loaded_config) => {
                        tracing::info!("Config loaded from: {:?}", config_path);
                        loaded_config
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file, using defaults: {}", e);
                        AppConfig::default()
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::info!("Config file doesn't exist, using defaults");
                    AppConfig::default()
                }
                Err(e) => {
                    tracing::warn!("Failed to read config file, using defaults: {}", e);
                    AppConfig::default()
                }
            }
        } else {
            tracing::warn!("Could not determine config directory, using defaults");
            AppConfig::default()
        };

        *self.config.write().await = config.clone();
        emit(&self.event_sender, BatchEvent::ConfigLoaded);
        config
    }

    pub async fn save_config(&self) -> Result<(), ConfigError> {
        let config = self.get_config().await;

        let config_path = self.config_path.as_ref().ok_or_else(|| ConfigError::InvalidPath {
            path: "Could not determine config path".to_string(),
        })?;

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ConfigError::SaveFailed(format!("Failed to create config directory: {}", e))
            })?;
        }

        let config_data = serde_json::to_string_pretty(&config)?;
        tokio::fs::write(config_path, config_data)
            .await
            .map_err(|e| ConfigError::SaveFailed(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Config saved to: {:?}", config_path);
        emit(&self.event_sender, BatchEvent::ConfigSaved);
        Ok(())
    }

    pub async fn get_config(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    pub async fn update_config<F>(&self, updater: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config_guard = self.config.write().await;
        updater(&mut config_guard);
    }
}

#[async_trait::async_trait]
impl Service for ConfigService {
    async fn initialize(&self) -> ServiceResult {
        self.load_config().await;
        tracing::info!("Config service initialized");
        Ok(())
    }

    async fn shutdown(&self) -> ServiceResult {
        tracing::info!("Config service shutdown");
        Ok(())
    }
}
