use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::config::{
    ConnectionConfig, DeviceProfile, GlobalConfig, HubConfig, ProtocolKind, QualityOfService,
};
use crate::domain::error::{HubError, HubResult};

const APP_DIR: &str = "hublink";
const PROJECT_DIR: &str = ".hublink";
const CONFIG_FILE: &str = "config.toml";

/// Configuration manager
pub struct ConfigManager {
    global_config_path: PathBuf,
    project_config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Create new configuration manager
    pub fn new() -> HubResult<Self> {
        Ok(Self::with_paths(
            Self::default_global_config_path()?,
            Self::find_project_config_path(),
        ))
    }

    /// Manager over explicit file locations
    pub fn with_paths(global_config_path: PathBuf, project_config_path: Option<PathBuf>) -> Self {
        Self {
            global_config_path,
            project_config_path,
        }
    }

    /// Load global settings plus project device profiles
    pub fn load_config(&self) -> HubResult<HubConfig> {
        let mut config = HubConfig::default();

        if self.global_config_path.exists() {
            let global_config = Self::load_config_from_path(&self.global_config_path)?;
            config.global = global_config.global;
            config.devices.extend(global_config.devices);
        }

        if let Some(project_path) = &self.project_config_path {
            if project_path.exists() {
                let project_config = Self::load_config_from_path(project_path)?;
                // Project profiles shadow global ones of the same name
                config
                    .devices
                    .retain(|device| project_config.find_device(&device.name).is_none());
                config.devices.extend(project_config.devices);
            }
        }

        Ok(config)
    }

    /// Save global settings globally and device profiles to the project file
    pub fn save_config(&self, config: &HubConfig) -> HubResult<()> {
        let global_config = HubConfig {
            global: config.global.clone(),
            devices: Vec::new(),
        };
        Self::save_config_to_path(&self.global_config_path, &global_config)?;

        if let Some(project_path) = &self.project_config_path {
            let project_config = HubConfig {
                global: GlobalConfig::default(),
                devices: config.devices.clone(),
            };
            Self::save_config_to_path(project_path, &project_config)?;
        }

        Ok(())
    }

    fn default_global_config_path() -> HubResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| HubError::Config {
            message: "Could not determine home directory".to_string(),
        })?;

        Ok(home.join(".config").join(APP_DIR).join(CONFIG_FILE))
    }

    /// Find project configuration path by walking up directory tree
    fn find_project_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut path = current_dir.as_path();

        loop {
            let config_path = path.join(PROJECT_DIR).join(CONFIG_FILE);
            if config_path.exists() {
                return Some(config_path);
            }

            path = path.parent()?;
        }
    }

    pub fn load_config_from_path(path: &Path) -> HubResult<HubConfig> {
        let content = fs::read_to_string(path).map_err(|e| HubError::Config {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;

        toml::from_str(&content).map_err(|e| HubError::Config {
            message: format!("Failed to parse config file {}: {}", path.display(), e),
        })
    }

    pub fn save_config_to_path(path: &Path, config: &HubConfig) -> HubResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| HubError::Config {
                message: format!("Failed to create config directory {}: {}", parent.display(), e),
            })?;
        }

        let content = toml::to_string_pretty(config).map_err(|e| HubError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| HubError::Config {
            message: format!("Failed to write config file {}: {}", path.display(), e),
        })
    }

    /// Write `.hublink/config.toml` with example profiles under `path`
    pub fn init_project_config(path: &Path) -> HubResult<PathBuf> {
        let config_file = path.join(PROJECT_DIR).join(CONFIG_FILE);

        if config_file.exists() {
            return Err(HubError::Config {
                message: format!(
                    "Project configuration already exists at {}",
                    config_file.display()
                ),
            });
        }

        let example_config = HubConfig {
            global: GlobalConfig::default(),
            devices: vec![
                DeviceProfile {
                    name: "example_http".to_string(),
                    description: "Telemetry over HTTPS polling".to_string(),
                    protocol: ProtocolKind::Http,
                    connection: ConnectionConfig::new(
                        "myhub.azure-devices.net",
                        "thermostat-01",
                        "SharedAccessSignature sr=...&sig=...&se=...",
                    ),
                    qos: QualityOfService::AtMostOnce,
                    keep_alive_secs: 60,
                },
                DeviceProfile {
                    name: "example_mqtt".to_string(),
                    description: "Telemetry and commands over a persistent MQTT link".to_string(),
                    protocol: ProtocolKind::Mqtt,
                    connection: ConnectionConfig::new(
                        "myhub.azure-devices.net",
                        "thermostat-01",
                        "SharedAccessSignature sr=...&sig=...&se=...",
                    )
                    .with_gateway_host("mqtts://myhub.azure-devices.net:8883"),
                    qos: QualityOfService::AtLeastOnce,
                    keep_alive_secs: 60,
                },
            ],
        };

        Self::save_config_to_path(&config_file, &example_config)?;
        Ok(config_file)
    }

    pub fn project_config_path(&self) -> Option<&PathBuf> {
        self.project_config_path.as_ref()
    }

    pub fn global_config_path(&self) -> &PathBuf {
        &self.global_config_path
    }
}
