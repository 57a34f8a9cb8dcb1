//! Layered replay configuration.
//!
//! Sources, later ones winning:
//!
//! | Source                 | Example                                     |
//! |------------------------|---------------------------------------------|
//! | built-in defaults      | `ReplayConfig::default()`                   |
//! | optional TOML file     | `[episode] scene_id = "2"`                  |
//! | environment            | `REPLAY__EPISODE__TIME_BETWEEN_FRAMES_MS=20` |

use crate::annotation::AnnotationConfig;
use crate::error::Result;
use crate::logger::LoggerConfig;
use crate::player::EpisodeConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub episode: EpisodeConfig,
    pub logger: LoggerConfig,
    pub annotation: AnnotationConfig,
}

impl ReplayConfig {
    /// Defaults, then `file` (if given), then `REPLAY__*` environment keys.
    ///
    /// Keys absent from every source keep their `Default` value.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("REPLAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
