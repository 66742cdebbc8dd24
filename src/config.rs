use anyhow::Context;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::Button;
use crate::binding::ResetMode;
use crate::buffers::{ActionSpace, BufferSpec, ObservationLayout};
use crate::error::{EnvError, Result};

// =============================================================================
// Stream Palette
// =============================================================================

pub const STREAM_COLOR_BLUE: &str = "#0000FF";
pub const STREAM_COLOR_GREEN: &str = "#00A36C";
pub const STREAM_COLOR_RED: &str = "#FF0000";
pub const STREAM_COLOR_PURPLE: &str = "#800080";
pub const STREAM_COLOR_PINK: &str = "#FF00FF";
pub const STREAM_COLOR_YELLOW: &str = "#DAEE01";

pub const DEFAULT_COLLECTOR_URL: &str = "wss://transdimensional.xyz/broadcast";

// =============================================================================
// Telemetry Stream Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    pub user: String,
    pub color: String,
    pub extra: String,
    /// Ticks between flushes.
    pub interval: u64,
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    pub io_timeout_ms: u64,
    /// Flush from a dedicated thread instead of the tick thread.
    pub background: bool,
    pub queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            user: "User".to_string(),
            color: STREAM_COLOR_PURPLE.to_string(),
            extra: String::new(),
            interval: 500,
            endpoint: DEFAULT_COLLECTOR_URL.to_string(),
            connect_timeout_ms: 5_000,
            io_timeout_ms: 2_000,
            background: false,
            queue_capacity: 8,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

// =============================================================================
// Environment Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub num_envs: usize,
    pub rom_path: PathBuf,
    pub state_path: Option<PathBuf>,
    pub frame_skip: u32,
    pub max_episode_length: u32,
    pub headless: bool,
    pub full_reset: bool,
    pub continuous: bool,
    /// Components per instance when `continuous` is set.
    pub action_dim: usize,
    pub log_interval: u64,
    pub layout: ObservationLayout,
    pub stream: StreamConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            num_envs: 1,
            rom_path: PathBuf::from("./pokemon_red.gb"),
            state_path: None,
            frame_skip: 4,
            max_episode_length: 20_480,
            headless: false,
            full_reset: true,
            continuous: false,
            action_dim: 1,
            log_interval: 128,
            layout: ObservationLayout::GAME_BOY,
            stream: StreamConfig::default(),
        }
    }
}

impl EnvConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open env config: {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse env config: {}", path.display()))?;
        Ok(config)
    }

    pub fn action_space(&self) -> ActionSpace {
        if self.continuous {
            ActionSpace::Continuous(self.action_dim)
        } else {
            ActionSpace::Discrete(Button::COUNT)
        }
    }

    pub fn buffer_spec(&self) -> BufferSpec {
        BufferSpec {
            num_agents: self.num_envs,
            obs_dim: self.layout.obs_dim(),
            action_space: self.action_space(),
        }
    }

    pub fn reset_mode(&self) -> ResetMode {
        ResetMode::from_full_reset(self.full_reset)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_envs == 0 {
            return Err(config_err("num_envs must be at least 1"));
        }
        if self.frame_skip == 0 {
            return Err(config_err("frame_skip must be at least 1"));
        }
        if self.max_episode_length == 0 {
            return Err(config_err("max_episode_length must be at least 1"));
        }
        if self.log_interval == 0 {
            return Err(config_err("log_interval must be at least 1"));
        }
        if self.continuous && self.action_dim == 0 {
            return Err(config_err("action_dim must be at least 1 for continuous control"));
        }
        if self.layout.obs_dim() == 0 {
            return Err(config_err("observation layout is empty"));
        }
        require_readable(&self.rom_path, "ROM")?;
        if let Some(state_path) = &self.state_path {
            require_readable(state_path, "state")?;
        }
        if self.stream.enabled {
            if self.stream.interval == 0 {
                return Err(config_err("stream interval must be at least 1"));
            }
            if !is_hex_color(&self.stream.color) {
                return Err(config_err(format!(
                    "stream color must look like #RRGGBB, got {:?}",
                    self.stream.color
                )));
            }
            if self.stream.background && self.stream.queue_capacity == 0 {
                return Err(config_err("stream queue_capacity must be at least 1"));
            }
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> EnvError {
    EnvError::Config(msg.into())
}

fn require_readable(path: &Path, what: &str) -> Result<()> {
    File::open(path)
        .map(|_| ())
        .map_err(|e| config_err(format!("{what} file {}: {e}", path.display())))
}

pub fn is_hex_color(s: &str) -> bool {
    s.len() == 7
        && s.starts_with('#')
        && s[1..].chars().all(|c| c.is_ascii_hexdigit())
}

// =============================================================================
// Command Line
// =============================================================================

/// Environment flags for trainers to `#[command(flatten)]` into their CLI.
#[derive(Args, Debug, Clone)]
pub struct EnvArgs {
    #[arg(long, default_value = "1")]
    pub num_envs: usize,
    #[arg(long, default_value = "./pokemon_red.gb")]
    pub rom: PathBuf,
    #[arg(long)]
    pub state: Option<PathBuf>,
    #[arg(long, default_value = "4")]
    pub frame_skip: u32,
    #[arg(long, default_value = "20480")]
    pub max_episode_length: u32,
    #[arg(long, default_value_t = false)]
    pub headless: bool,
    /// Reload from the checkpoint state instead of a fresh load on reset.
    #[arg(long, default_value_t = false)]
    pub soft_reset: bool,
    #[arg(long, default_value_t = false)]
    pub continuous: bool,
    #[arg(long, default_value = "128")]
    pub log_interval: u64,
    #[arg(long, default_value_t = false)]
    pub stream: bool,
    #[arg(long, default_value = "User")]
    pub stream_user: String,
    #[arg(long, default_value = STREAM_COLOR_PURPLE)]
    pub stream_color: String,
    #[arg(long, default_value = "")]
    pub stream_extra: String,
    #[arg(long, default_value = "500")]
    pub stream_interval: u64,
    #[arg(long, default_value = DEFAULT_COLLECTOR_URL)]
    pub stream_endpoint: String,
    #[arg(long, default_value_t = false)]
    pub stream_background: bool,
}

impl From<EnvArgs> for EnvConfig {
    fn from(args: EnvArgs) -> Self {
        EnvConfig {
            num_envs: args.num_envs,
            rom_path: args.rom,
            state_path: args.state,
            frame_skip: args.frame_skip,
            max_episode_length: args.max_episode_length,
            headless: args.headless,
            full_reset: !args.soft_reset,
            continuous: args.continuous,
            log_interval: args.log_interval,
            stream: StreamConfig {
                enabled: args.stream,
                user: args.stream_user,
                color: args.stream_color,
                extra: args.stream_extra,
                interval: args.stream_interval,
                endpoint: args.stream_endpoint,
                background: args.stream_background,
                ..StreamConfig::default()
            },
            ..EnvConfig::default()
        }
    }
}
