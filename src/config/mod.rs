//! Configuration file loading.
//!
//! The file is YAML; its structure lives in [`settings`]. When no `-c` is
//! given the working directory is searched for a single `*.kiforge.yaml`
//! (or `.yml`) file, the same way the board is implied by the project.

mod settings;

pub use settings::Config;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;

/// Resolves the configuration file to use.
///
/// An explicit path must exist. Without one, exactly one `*.kiforge.yaml`
/// or `*.kiforge.yml` must live in `dir`.
pub fn find_config(explicit: Option<&Path>, dir: &Path) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok(path.to_path_buf());
    }
    let mut candidates = Vec::new();
    for pattern in ["*.kiforge.yaml", "*.kiforge.yml"] {
        let full = dir.join(pattern).to_string_lossy().into_owned();
        if let Ok(paths) = glob::glob(&full) {
            candidates.extend(paths.flatten());
        }
    }
    match candidates.len() {
        0 => Err(ConfigError::NotFound {
            path: dir.join("*.kiforge.yaml"),
        }),
        1 => {
            debug!("Using config `{}`", candidates[0].display());
            Ok(candidates.remove(0))
        }
        _ => Err(ConfigError::validation(format!(
            "more than one config found in `{}`, use -c to pick one",
            dir.display()
        ))),
    }
}
