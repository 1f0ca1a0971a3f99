//! Service configuration, layered from defaults, an optional TOML file and
//! `FUNDUS_*` environment variables

use anyhow::{anyhow, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Config file looked up in the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "fundus-seg.toml";

/// Default log filter, overridden by `RUST_LOG`
pub const DEFAULT_LOG: &str = "info,actix_web=info";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub overlay: OverlaySettings,
    pub log: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,

    /// Number of actix workers. Uses actix's default (one per core) if unset
    pub workers: Option<usize>,

    /// Largest accepted upload, in bytes
    pub max_upload_bytes: usize,

    /// Allowed CORS origins. Empty means any origin. From the environment,
    /// a comma separated list
    pub cors_origins: Vec<String>,

    /// Timeout for downloading images submitted by URL
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Path to the TorchScript export of the segmentation model
    pub path: String,
    pub device: DeviceChoice,

    /// Side of the square the model expects its input resized to
    pub input_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Weight of the color mask in the blend. The photo keeps `1 - alpha`
    pub alpha: f64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceChoice {
    /// CUDA when available, else CPU
    Auto,
    Cpu,
    Cuda,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            server: ServerSettings::default(),
            model: ModelSettings::default(),
            overlay: OverlaySettings::default(),
            log: DEFAULT_LOG.into(),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            host: "0.0.0.0".into(),
            port: 5001,
            workers: None,
            max_upload_bytes: 16 * 1024 * 1024,
            cors_origins: vec![],
            fetch_timeout_secs: 30,
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        ModelSettings {
            path: "models/segformer_optic_disc_cup.pt".into(),
            device: DeviceChoice::Auto,
            input_size: 512,
        }
    }
}

impl Default for OverlaySettings {
    fn default() -> Self {
        OverlaySettings {
            alpha: 0.4,
            jpeg_quality: 75,
        }
    }
}

impl Settings {
    /// Load settings. An explicitly given file must exist; the default file
    /// is optional.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("server.port must be non-zero"));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(anyhow!("server.max_upload_bytes must be non-zero"));
        }
        if self.server.fetch_timeout_secs == 0 {
            return Err(anyhow!("server.fetch_timeout_secs must be non-zero"));
        }
        if self.model.input_size == 0 {
            return Err(anyhow!("model.input_size must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.overlay.alpha) {
            return Err(anyhow!(
                "overlay.alpha must be within [0, 1], got {}",
                self.overlay.alpha
            ));
        }
        if !(1..=100).contains(&self.overlay.jpeg_quality) {
            return Err(anyhow!(
                "overlay.jpeg_quality must be within 1..=100, got {}",
                self.overlay.jpeg_quality
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// `FUNDUS_SERVER__PORT=8080` style overrides
fn environment() -> Environment {
    Environment::with_prefix("FUNDUS")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("server.cors_origins")
}
