use crate::{
    call::CallManagerOptions,
    device::{DeviceBackend, DeviceKind, MemoryBackend},
};
use anyhow::Error;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc, time::Duration};

#[derive(Parser, Debug)]
#[command(version)]
pub struct Cli {
    #[clap(long, default_value = "capiline.toml")]
    pub conf: Option<String>,
    /// Number to dial right after startup
    #[clap(long)]
    pub dial: Option<String>,
    /// Dial a fax connection instead of a voice call
    #[clap(long, default_value_t = false)]
    pub fax: bool,
    /// Print build details and exit
    #[clap(long, default_value_t = false)]
    pub version_info: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub recorder_path: String,
    pub international_prefix: String,
    pub hangup_timeout_ms: u64,
    pub line: LineConfig,
    pub backends: Vec<BackendConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LineConfig {
    pub phone_number: String,
    pub fax_number: String,
    pub controller: u32,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum BackendConfig {
    Memory {
        name: String,
        kind: DeviceKind,
        #[serde(default)]
        numbers: Vec<String>,
        channels: Option<usize>,
        auto_answer: Option<bool>,
        requires_network: Option<bool>,
    },
}

impl BackendConfig {
    pub fn build(&self) -> Result<Arc<dyn DeviceBackend>, Error> {
        match self {
            BackendConfig::Memory {
                name,
                kind,
                numbers,
                channels,
                auto_answer,
                requires_network,
            } => {
                let mut backend = MemoryBackend::with_patterns(name, *kind, numbers.as_slice())?
                    .with_auto_answer(auto_answer.unwrap_or(false))
                    .with_requires_network(requires_network.unwrap_or(false));
                if let Some(channels) = channels {
                    backend = backend.with_channels(*channels);
                }
                Ok(Arc::new(backend))
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            log_file: None,
            #[cfg(target_os = "windows")]
            recorder_path: "./recorder".to_string(),
            #[cfg(not(target_os = "windows"))]
            recorder_path: "/tmp/recorder".to_string(),
            international_prefix: "00".to_string(),
            hangup_timeout_ms: 3000,
            line: LineConfig::default(),
            backends: Vec::new(),
        }
    }
}

impl Config {
    /// Reads a TOML config; a file that does not exist yields the defaults.
    pub fn load(path: &str) -> Result<Self, Error> {
        if !std::path::Path::new(path).exists() {
            return Ok(Self::default());
        }
        let config = toml::from_str(
            &std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("{}: {}", e, path))?,
        )?;
        Ok(config)
    }

    pub fn manager_options(&self) -> CallManagerOptions {
        CallManagerOptions {
            international_prefix: self.international_prefix.clone(),
            phone_number: self.line.phone_number.clone(),
            fax_number: self.line.fax_number.clone(),
            recorder_path: PathBuf::from(&self.recorder_path),
            hangup_timeout: Duration::from_millis(self.hangup_timeout_ms),
            ..Default::default()
        }
    }
}
