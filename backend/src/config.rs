use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use tch::Device;

const DEFAULT_CONFIG_PATH: &str = "config/lungscan.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upload_dir: PathBuf,
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub cnn: PathBuf,
    pub dbn: PathBuf,
    pub sdae: PathBuf,
    pub device: DeviceChoice,
    /// Refuse to start when an artifact has no manifest.
    pub strict_manifests: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DeviceChoice {
    pub fn resolve(&self) -> Device {
        match self {
            DeviceChoice::Auto => Device::cuda_if_available(),
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Some(DeviceChoice::Auto),
            "cpu" => Some(DeviceChoice::Cpu),
            "cuda" | "gpu" => Some(DeviceChoice::Cuda),
            _ => None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upload_dir: PathBuf::from("uploads"),
            models: ModelsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            cnn: PathBuf::from("cnn_model.ot"),
            dbn: PathBuf::from("dbn_pipeline_model.ot"),
            sdae: PathBuf::from("sdae_classifier.ot"),
            device: DeviceChoice::Auto,
            strict_manifests: false,
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file (`LUNGSCAN_CONFIG` or
    /// `config/lungscan.yaml`, if present), then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let explicit = env::var("LUNGSCAN_CONFIG").ok();
        let path = explicit.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
        let mut config = if explicit.is_some() || std::path::Path::new(&path).exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };

        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::Env {
                key: "PORT",
                value: port.clone(),
            })?;
        }
        if let Some(dir) = lookup("UPLOAD_DIR") {
            self.upload_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("CNN_MODEL_PATH") {
            self.models.cnn = PathBuf::from(path);
        }
        if let Some(path) = lookup("DBN_MODEL_PATH") {
            self.models.dbn = PathBuf::from(path);
        }
        if let Some(path) = lookup("SDAE_MODEL_PATH") {
            self.models.sdae = PathBuf::from(path);
        }
        if let Some(device) = lookup("MODEL_DEVICE") {
            self.models.device = DeviceChoice::parse(&device).ok_or(ConfigError::Env {
                key: "MODEL_DEVICE",
                value: device.clone(),
            })?;
        }
        if let Some(strict) = lookup("STRICT_MANIFESTS") {
            self.models.strict_manifests = matches!(strict.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }
}
