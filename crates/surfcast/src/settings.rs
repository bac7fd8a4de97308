//! Layered settings for surfcast
//!
//! Settings are stored as `surfcast.toml`. Every field is optional so that a
//! file only needs to name what it changes. Layers are merged in order, later
//! ones winning field by field:
//!
//! 1. the user file `$HOME/.surfcast/surfcast.toml`
//! 2. `./surfcast.toml` in the working directory
//! 3. a file passed with `--config`
//! 4. command line flags

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use surfcast_net::protocol::{
    DEFAULT_DATA_HOST, DEFAULT_DATA_PORT, DEFAULT_HEARTBEAT_TTL, DEFAULT_SERVER_HOST,
    DEFAULT_SERVER_PORT,
};
use surfcast_net::{ClientConfig, ParticleType, ReceiverConfig, SenderConfig};
use tracing::{debug, info, warn};

/// Filename used for settings files
pub const SETTINGS_FILENAME: &str = "surfcast.toml";

/// Directory under `$HOME` holding the user settings file
pub const USER_SETTINGS_DIR: &str = ".surfcast";

/// Network endpoints and socket tuning
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// Simulation server host (heartbeat target)
    pub host: Option<String>,
    /// Simulation server port
    pub port: Option<u16>,
    /// Local bind host for incoming data
    pub in_host: Option<String>,
    /// Local bind port for incoming data
    pub in_port: Option<u16>,
    /// `SO_RCVBUF` request in bytes
    pub udp_size: Option<usize>,
    /// Seconds between heartbeats
    pub heartbeat_ttl: Option<f64>,
    /// Grow the receive buffer to fit each new model
    pub apply_recommended_buffer: Option<bool>,
}

impl NetworkSettings {
    fn merge(self, over: Self) -> Self {
        Self {
            host: over.host.or(self.host),
            port: over.port.or(self.port),
            in_host: over.in_host.or(self.in_host),
            in_port: over.in_port.or(self.in_port),
            udp_size: over.udp_size.or(self.udp_size),
            heartbeat_ttl: over.heartbeat_ttl.or(self.heartbeat_ttl),
            apply_recommended_buffer: over
                .apply_recommended_buffer
                .or(self.apply_recommended_buffer),
        }
    }
}

/// Per-type particle colours as RGB in `0.0..=1.0`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColorSettings {
    pub fluid: Option<[f32; 3]>,
    pub boundary: Option<[f32; 3]>,
    pub piston: Option<[f32; 3]>,
    pub paddle: Option<[f32; 3]>,
    pub gate: Option<[f32; 3]>,
    pub object: Option<[f32; 3]>,
    pub testpoint: Option<[f32; 3]>,
    pub surface: Option<[f32; 3]>,
}

impl ColorSettings {
    fn merge(self, over: Self) -> Self {
        Self {
            fluid: over.fluid.or(self.fluid),
            boundary: over.boundary.or(self.boundary),
            piston: over.piston.or(self.piston),
            paddle: over.paddle.or(self.paddle),
            gate: over.gate.or(self.gate),
            object: over.object.or(self.object),
            testpoint: over.testpoint.or(self.testpoint),
            surface: over.surface.or(self.surface),
        }
    }

    fn defaults() -> Self {
        Self {
            fluid: Some([0.0, 0.0, 1.0]),
            boundary: Some([0.0, 0.0, 0.0]),
            piston: Some([1.0, 0.0, 0.0]),
            paddle: Some([0.2, 0.2, 0.2]),
            gate: Some([1.0, 1.0, 0.0]),
            object: Some([0.0, 0.0, 0.0]),
            testpoint: Some([1.0, 0.0, 0.0]),
            surface: Some([1.0, 0.0, 0.0]),
        }
    }

    /// Colour for a particle type; unknown types are drawn white
    pub fn color_for(&self, kind: ParticleType) -> [f32; 3] {
        let configured = match kind {
            ParticleType::Fluid => self.fluid,
            ParticleType::Boundary => self.boundary,
            ParticleType::Piston => self.piston,
            ParticleType::Paddle => self.paddle,
            ParticleType::Gate => self.gate,
            ParticleType::Object => self.object,
            ParticleType::TestPoint => self.testpoint,
            ParticleType::Surface => self.surface,
            ParticleType::Unknown(_) => None,
        };
        configured.unwrap_or([1.0, 1.0, 1.0])
    }
}

/// Window and camera preferences for a renderer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    pub title: Option<String>,
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub eye_position: Option<[f32; 3]>,
    pub eye_up: Option<[f32; 3]>,
    pub eye_target: Option<[f32; 3]>,
    pub znear: Option<f32>,
    pub zfar: Option<f32>,
    pub colors: Option<ColorSettings>,
}

impl ViewerSettings {
    fn merge(self, over: Self) -> Self {
        Self {
            title: over.title.or(self.title),
            x: over.x.or(self.x),
            y: over.y.or(self.y),
            width: over.width.or(self.width),
            height: over.height.or(self.height),
            eye_position: over.eye_position.or(self.eye_position),
            eye_up: over.eye_up.or(self.eye_up),
            eye_target: over.eye_target.or(self.eye_target),
            znear: over.znear.or(self.znear),
            zfar: over.zfar.or(self.zfar),
            colors: merge_table(self.colors, over.colors, ColorSettings::merge),
        }
    }

    pub fn eye(&self) -> [f32; 3] {
        self.eye_position.unwrap_or([1.0, 1.0, 1.0])
    }

    pub fn target(&self) -> [f32; 3] {
        self.eye_target.unwrap_or([0.0, 0.0, 0.0])
    }

    pub fn colors(&self) -> ColorSettings {
        ColorSettings::defaults().merge(self.colors.clone().unwrap_or_default())
    }
}

/// Top-level settings struct, serialized as surfcast.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub network: Option<NetworkSettings>,
    pub viewer: Option<ViewerSettings>,
}

fn merge_table<T>(base: Option<T>, over: Option<T>, merge: fn(T, T) -> T) -> Option<T> {
    match (base, over) {
        (Some(base), Some(over)) => Some(merge(base, over)),
        (base, over) => over.or(base),
    }
}

impl Settings {
    /// Every field set to its built-in default, as written by `--write-config`
    pub fn defaults() -> Self {
        Self {
            network: Some(NetworkSettings {
                host: Some(DEFAULT_SERVER_HOST.to_string()),
                port: Some(DEFAULT_SERVER_PORT),
                in_host: Some(DEFAULT_DATA_HOST.to_string()),
                in_port: Some(DEFAULT_DATA_PORT),
                udp_size: None,
                heartbeat_ttl: Some(DEFAULT_HEARTBEAT_TTL.as_secs_f64()),
                apply_recommended_buffer: Some(false),
            }),
            viewer: Some(ViewerSettings {
                title: Some("Surfcast".to_string()),
                x: Some(100),
                y: Some(100),
                width: Some(800),
                height: Some(600),
                eye_position: Some([1.0, 1.0, 1.0]),
                eye_up: Some([0.0, 0.0, 1.0]),
                eye_target: Some([0.0, 0.0, 0.0]),
                znear: Some(0.1),
                zfar: Some(10000.0),
                colors: Some(ColorSettings::defaults()),
            }),
        }
    }

    /// Overlay `over` on top of `self`; fields set in `over` win
    pub fn merge(self, over: Settings) -> Settings {
        Settings {
            network: merge_table(self.network, over.network, NetworkSettings::merge),
            viewer: merge_table(self.viewer, over.viewer, ViewerSettings::merge),
        }
    }

    /// Load settings from a file.
    /// Returns Ok(None) if the file doesn't exist.
    pub fn load_file(path: &Path) -> Result<Option<Self>, SettingsError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings =
            toml::from_str(&contents).map_err(|e| SettingsError::ParseToml {
                path: path.to_path_buf(),
                source: e,
            })?;
        info!("Loaded settings from {:?}", path);
        Ok(Some(settings))
    }

    /// Load settings from a surfcast.toml in the given directory
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, SettingsError> {
        Self::load_file(&dir.join(SETTINGS_FILENAME))
    }

    /// Merge the user file, the working directory file and an optional
    /// explicit file. An explicit file that does not exist is an error.
    pub fn load_layered(
        user_dir: Option<&Path>,
        local_dir: &Path,
        explicit: Option<&Path>,
    ) -> Result<Self, SettingsError> {
        let mut settings = Settings::default();

        match user_dir {
            Some(dir) => {
                if let Some(user) = Self::load_from_dir(dir)? {
                    settings = settings.merge(user);
                }
            }
            None => warn!("HOME is not set, user settings disabled"),
        }

        if let Some(local) = Self::load_from_dir(local_dir)? {
            settings = settings.merge(local);
        }

        if let Some(path) = explicit {
            let extra = Self::load_file(path)?.ok_or_else(|| SettingsError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
            settings = settings.merge(extra);
        }

        debug!("Effective settings: {:?}", settings);
        Ok(settings)
    }

    /// Save settings to surfcast.toml in the given directory, creating it if
    /// needed. Tables already in the file that these settings do not carry
    /// are kept.
    pub fn save_to_dir(&self, dir: &Path) -> Result<PathBuf, SettingsError> {
        let path = dir.join(SETTINGS_FILENAME);
        std::fs::create_dir_all(dir).map_err(|e| SettingsError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let ours = toml::to_string_pretty(self).map_err(|e| SettingsError::SerializeToml {
            path: path.clone(),
            source: e,
        })?;

        let merged = if path.exists() {
            let existing_contents =
                std::fs::read_to_string(&path).map_err(|e| SettingsError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            let mut existing_table: toml::Table =
                toml::from_str(&existing_contents).unwrap_or_default();
            let our_table: toml::Table = toml::from_str(&ours).unwrap_or_default();
            for (key, value) in our_table {
                existing_table.insert(key, value);
            }
            toml::to_string_pretty(&existing_table).map_err(|e| SettingsError::SerializeToml {
                path: path.clone(),
                source: e,
            })?
        } else {
            ours
        };

        std::fs::write(&path, merged).map_err(|e| SettingsError::Io {
            path: path.clone(),
            source: e,
        })?;
        info!("Saved settings to {:?}", path);
        Ok(path)
    }

    /// Resolve into library configuration, filling gaps with defaults
    pub fn client_config(&self) -> ClientConfig {
        let network = self.network.clone().unwrap_or_default();

        let ttl = match network.heartbeat_ttl.map(Duration::try_from_secs_f64) {
            Some(Ok(ttl)) if !ttl.is_zero() => ttl,
            Some(_) => {
                warn!(
                    "Ignoring invalid heartbeat_ttl {:?}, using {:?}",
                    network.heartbeat_ttl, DEFAULT_HEARTBEAT_TTL
                );
                DEFAULT_HEARTBEAT_TTL
            }
            None => DEFAULT_HEARTBEAT_TTL,
        };

        ClientConfig {
            receiver: ReceiverConfig {
                host: network
                    .in_host
                    .unwrap_or_else(|| DEFAULT_DATA_HOST.to_string()),
                port: network.in_port.unwrap_or(DEFAULT_DATA_PORT),
                recv_buffer_size: network.udp_size,
                apply_recommended_buffer: network.apply_recommended_buffer.unwrap_or(false),
                ..Default::default()
            },
            sender: SenderConfig {
                host: network
                    .host
                    .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
                port: network.port.unwrap_or(DEFAULT_SERVER_PORT),
                ttl,
                ..Default::default()
            },
        }
    }

    /// Viewer preferences with every gap filled from the defaults
    pub fn viewer(&self) -> ViewerSettings {
        let defaults = Self::defaults().viewer.unwrap_or_default();
        defaults.merge(self.viewer.clone().unwrap_or_default())
    }
}

/// `$HOME/.surfcast`, if HOME is set
pub fn user_settings_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(USER_SETTINGS_DIR))
}

/// Write the default settings to the user settings file
pub fn write_user_defaults() -> Result<PathBuf, SettingsError> {
    let dir = user_settings_dir().ok_or(SettingsError::NoHomeDirectory)?;
    Settings::defaults().save_to_dir(&dir)
}

/// Errors that can occur during settings operations
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize TOML for {path}: {source}")]
    SerializeToml {
        path: PathBuf,
        source: toml::ser::Error,
    },
    #[error("HOME is not set - cannot locate user settings")]
    NoHomeDirectory,
}
