//! Configuration management.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration structure that matches the TOML file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    policy: PolicyConfig,
    #[serde(default)]
    hal: HalConfig,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    keytone: KeytoneConfig,
    #[serde(default)]
    samples: SamplesConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

/// Policy engine behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Re-route streams when a Bluetooth or USB sink appears
    pub on_hotplug: bool,
    /// Move streams of a removed sink to the default sink instead of killing them
    pub on_rescue: bool,
    /// Capture fragment size for loaded sources (0 = 8192)
    pub fragment_size: u32,
    /// Timer-scheduling buffer size for loaded sinks (0 = 16384)
    pub tsched_buffer_size: u32,
    /// Delay between muting and re-routing on a device switch
    pub ucm_sleep_ms: u64,
    /// Route >= 96 kHz streams to the high-quality sink variants
    pub uhqa: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_hotplug: true,
            on_rescue: true,
            fragment_size: 0,
            tsched_buffer_size: 0,
            ucm_sleep_ms: 0,
            uhqa: true,
        }
    }
}

/// Hardware backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    pub backend: String,
    pub volume_level_max: u32,
    /// Make the software backend answer "use hardware control" for volume and mute
    pub use_hw_control: bool,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            backend: "soft".to_string(),
            volume_level_max: audio_policy_types::volume::VOLUME_LEVEL_MAX,
            use_hw_control: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(audio_policy_types::DEFAULT_SOCKET_PATH),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeytoneConfig {
    pub enabled: bool,
    pub pipe_path: PathBuf,
    /// Group that owns the FIFO
    pub group_id: u32,
}

impl Default for KeytoneConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pipe_path: PathBuf::from(audio_policy_types::KEYTONE_PIPE_PATH),
            group_id: 6526,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplesConfig {
    pub booting_sound_path: PathBuf,
    /// Every `*.wav` in this directory is registered as a lazy sample
    pub directory: Option<PathBuf>,
}

impl Default for SamplesConfig {
    fn default() -> Self {
        Self {
            booting_sound_path: PathBuf::from("/usr/share/keysound/poweron.wav"),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Path to log file (if set, logs will be written to file in addition to stdout)
    pub log_file: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error)
    /// If not set, uses RUST_LOG environment variable or defaults to "info"
    pub log_level: Option<String>,
}

/// Application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub policy: PolicyConfig,
    pub hal: HalConfig,
    pub server: ServerConfig,
    pub keytone: KeytoneConfig,
    pub samples: SamplesConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with full priority chain: CLI args > env vars > config files > defaults.
    ///
    /// Config files are searched in this order:
    /// 1. `.audio-policy.toml` in current directory
    /// 2. `config.toml` in user config directory (~/.config/audio-policy/ on Linux)
    pub fn from_figment(
        socket_path: Option<PathBuf>,
        hal_backend: Option<String>,
        keytone_pipe: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        // Find config file paths
        let local_config = std::env::current_dir()
            .ok()
            .map(|d| d.join(".audio-policy.toml"));
        let user_config = directories::ProjectDirs::from("", "", "audio-policy")
            .map(|dirs| dirs.config_dir().join("config.toml"));

        // Build figment with priority: defaults < user config < local config < env vars < CLI args
        let mut figment = Figment::new();

        // 1. Start with defaults
        figment = figment.merge(Serialized::defaults(ConfigFile::default()));

        // 2. Merge user config file if it exists
        if let Some(ref path) = user_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 3. Merge local config file if it exists
        if let Some(ref path) = local_config {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        // 4. Merge environment variables (AUDIO_POLICY_SECTION__KEY)
        figment = figment.merge(
            Env::prefixed("AUDIO_POLICY_").map(|key| key.as_str().replace("__", ".").into()),
        );

        // 5. Merge CLI arguments (highest priority)
        if let Some(ref path) = socket_path {
            figment = figment.merge(Serialized::default("server.socket_path", path));
        }
        if let Some(ref backend) = hal_backend {
            figment = figment.merge(Serialized::default("hal.backend", backend));
        }
        if let Some(ref pipe) = keytone_pipe {
            figment = figment.merge(Serialized::default("keytone.pipe_path", pipe));
        }

        // Extract the configuration
        let file: ConfigFile = figment.extract()?;

        Ok(Self {
            policy: file.policy,
            hal: file.hal,
            server: file.server,
            keytone: file.keytone,
            samples: file.samples,
            logging: file.logging,
        })
    }
}

impl PolicyConfig {
    pub fn fragment_size_or_default(&self) -> u32 {
        if self.fragment_size == 0 {
            8192
        } else {
            self.fragment_size
        }
    }

    pub fn tsched_buffer_size_or_default(&self) -> u32 {
        if self.tsched_buffer_size == 0 {
            16384
        } else {
            self.tsched_buffer_size
        }
    }
}
