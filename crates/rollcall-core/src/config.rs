use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Match tolerance used by the interactive window.
pub const DEFAULT_TOLERANCE: f32 = 1.10;
/// Tighter tolerance used by the HTTP daemon.
pub const STRICT_TOLERANCE: f32 = 1.00;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Runtime configuration shared by `rollcall` and `rollcalld`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path or bare index (default: 0).
    pub camera_device: String,
    /// Directory of reference images, one person per file.
    pub known_faces_dir: PathBuf,
    /// Attendance CSV file.
    pub ledger_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance accepted as a match.
    pub tolerance: f32,
    /// Integer shrink factor applied before detection.
    pub downscale: u32,
    /// Frames discarded when a capture session starts.
    pub warmup_frames: usize,
    /// TrueType font for name labels, overriding the bundled one.
    pub font_path: Option<PathBuf>,
    /// HTTP listen address for the daemon.
    pub listen_addr: String,
}

/// Keys accepted in the TOML config file; all optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    camera_device: Option<String>,
    known_faces_dir: Option<PathBuf>,
    ledger_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    tolerance: Option<f32>,
    downscale: Option<u32>,
    warmup_frames: Option<usize>,
    font_path: Option<PathBuf>,
    listen_addr: Option<String>,
}

impl Config {
    /// Defaults for the interactive window.
    pub fn interactive() -> Self {
        Self {
            camera_device: "0".to_string(),
            known_faces_dir: PathBuf::from("known_faces"),
            ledger_path: PathBuf::from("attendance.csv"),
            model_dir: default_model_dir(),
            tolerance: DEFAULT_TOLERANCE,
            downscale: 4,
            warmup_frames: 4,
            font_path: None,
            listen_addr: "127.0.0.1:5000".to_string(),
        }
    }

    /// Defaults for the HTTP daemon.
    pub fn server() -> Self {
        Self {
            ledger_path: PathBuf::from("webattendance.csv"),
            tolerance: STRICT_TOLERANCE,
            ..Self::interactive()
        }
    }

    /// Layer an optional TOML file and then `ROLLCALL_*` variables over `self`.
    ///
    /// `file` falls back to `ROLLCALL_CONFIG` when `None`.
    pub fn load(mut self, file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = file
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));

        if let Some(path) = file {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            self.apply_toml(&text)
                .map_err(|source| ConfigError::Parse { path, source })?;
        }

        self.apply_env(|key| std::env::var(key).ok());
        Ok(self)
    }

    fn apply_toml(&mut self, text: &str) -> Result<(), toml::de::Error> {
        let file: ConfigFile = toml::from_str(text)?;

        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.known_faces_dir {
            self.known_faces_dir = v;
        }
        if let Some(v) = file.ledger_path {
            self.ledger_path = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.tolerance {
            self.tolerance = v;
        }
        if let Some(v) = file.downscale {
            self.downscale = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if file.font_path.is_some() {
            self.font_path = file.font_path;
        }
        if let Some(v) = file.listen_addr {
            self.listen_addr = v;
        }
        Ok(())
    }

    /// Unparseable values leave the current setting in place.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = get("ROLLCALL_KNOWN_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_LEDGER_PATH") {
            self.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = get("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        self.tolerance = parsed(&get, "ROLLCALL_TOLERANCE", self.tolerance);
        self.downscale = parsed(&get, "ROLLCALL_DOWNSCALE", self.downscale);
        self.warmup_frames = parsed(&get, "ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        if let Some(v) = get("ROLLCALL_FONT_PATH") {
            self.font_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ROLLCALL_LISTEN_ADDR") {
            self.listen_addr = v;
        }
    }
}

fn parsed<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    get(key).and_then(|v| v.trim().parse().ok()).unwrap_or(current)
}

/// `$XDG_DATA_HOME/rollcall/models`, or `~/.local/share/rollcall/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}
