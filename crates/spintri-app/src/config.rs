// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "spintri".to_owned(),
            width: 300,
            height: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    /// Radians per second.
    pub spin_speed: f32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            spin_speed: 1.0,
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.2, 0.4, 0.9, 1.0]
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// Command-line sizes win over the file.
    pub fn with_size_overrides(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        if let Some(w) = width {
            self.window.width = w;
        }
        if let Some(h) = height {
            self.window.height = h;
        }
        self
    }
}

/// Missing file means defaults; a malformed one is reported and ignored.
pub fn load(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match AppCfg::parse(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("no config at {}, using defaults", path.display());
            AppCfg::default()
        }
        Err(e) => {
            warn!("cannot read {}: {e}", path.display());
            AppCfg::default()
        }
    }
}
