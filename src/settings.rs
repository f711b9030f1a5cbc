use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::codegen::DEFAULT_MODULE_SIZE;
use crate::thumbnail::{DEFAULT_THUMBNAIL_HEIGHT, LARGE_DOCUMENT_THRESHOLD};

const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "qrdoc";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Thumbnail height in pixels
    #[serde(default = "default_thumbnail_height")]
    pub thumbnail_height: u32,

    /// Above this many pages, ask before generating thumbnails
    #[serde(default = "default_large_document_threshold")]
    pub large_document_threshold: usize,

    #[serde(default = "default_preview_zoom")]
    pub preview_zoom: f32,

    /// QR module edge in pixels
    #[serde(default = "default_qr_module_size")]
    pub qr_module_size: u32,
}

fn default_thumbnail_height() -> u32 {
    DEFAULT_THUMBNAIL_HEIGHT
}

fn default_large_document_threshold() -> usize {
    LARGE_DOCUMENT_THRESHOLD
}

fn default_preview_zoom() -> f32 {
    1.0
}

fn default_qr_module_size() -> u32 {
    DEFAULT_MODULE_SIZE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thumbnail_height: default_thumbnail_height(),
            large_document_threshold: default_large_document_threshold(),
            preview_zoom: default_preview_zoom(),
            qr_module_size: default_qr_module_size(),
        }
    }
}

/// `<config dir>/qrdoc/config.yaml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl Settings {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                debug!("No settings file at {path:?}, using defaults");
                Self::default()
            }
            None => {
                warn!("Could not determine config directory, using default settings");
                Self::default()
            }
        }
    }

    /// Load from `path`. Unreadable or unparsable files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                error!("Failed to read settings file {path:?}: {e}");
                return Self::default();
            }
        };

        match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");
                settings.repair();
                settings
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self).map_err(std::io::Error::other)?;
        fs::write(path, content)?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    /// Replace values that would produce empty bitmaps with defaults
    fn repair(&mut self) {
        if self.thumbnail_height == 0 {
            warn!("thumbnail_height must be positive, using {DEFAULT_THUMBNAIL_HEIGHT}");
            self.thumbnail_height = DEFAULT_THUMBNAIL_HEIGHT;
        }
        if self.qr_module_size == 0 {
            warn!("qr_module_size must be positive, using {DEFAULT_MODULE_SIZE}");
            self.qr_module_size = DEFAULT_MODULE_SIZE;
        }
        if !(self.preview_zoom.is_finite() && self.preview_zoom > 0.0) {
            warn!("preview_zoom must be positive, using 1.0");
            self.preview_zoom = default_preview_zoom();
        }
    }
}
