//! The YAML configuration file.
//!
//! A config starts with a `kiforge:` section carrying the format version,
//! then the optional `global:`, `preflight:` and `variants:` sections, and
//! the `outputs:` list. Output options are kept as raw YAML here and parsed
//! by the matching driver, so option errors name the offending output.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::ConfigError;
use crate::global::GlobalSection;
use crate::outputs::Output;
use crate::preflight::PreflightSection;
use crate::variant::Variant;

/// Config format version we understand.
const SUPPORTED_VERSION: u64 = 1;

fn default_true() -> bool {
    true
}

/// The mandatory `kiforge:` header section.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Header {
    version: u64,
}

/// One `outputs:` entry as written in the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOutput {
    name: String,
    #[serde(default)]
    comment: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    dir: String,
    #[serde(default = "default_true")]
    run_by_default: bool,
    #[serde(default)]
    output_id: String,
    #[serde(default)]
    options: serde_yaml::Value,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    kiforge: Header,
    #[serde(default)]
    global: Option<GlobalSection>,
    #[serde(default)]
    preflight: Option<PreflightSection>,
    #[serde(default)]
    variants: Vec<Variant>,
    #[serde(default)]
    outputs: Vec<RawOutput>,
}

/// A parsed and validated configuration.
#[derive(Debug)]
pub struct Config {
    /// The raw `global:` section, resolved later against the stack-up and
    /// the command line.
    pub global: Option<GlobalSection>,
    /// The preflights to apply.
    pub preflight: PreflightSection,
    /// The declared variants.
    pub variants: Vec<Variant>,
    /// The outputs, in declaration order.
    pub outputs: Vec<Output>,
}

impl Config {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading config from `{}`", path.display());
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if raw.kiforge.version != SUPPORTED_VERSION {
            return Err(ConfigError::validation(format!(
                "unknown config version {} (supported: {SUPPORTED_VERSION})",
                raw.kiforge.version
            )));
        }
        let mut variants = Vec::with_capacity(raw.variants.len());
        for v in raw.variants {
            variants.push(v.finish().map_err(|e| e.in_section("variants"))?);
        }
        let mut outputs: Vec<Output> = Vec::with_capacity(raw.outputs.len());
        for o in raw.outputs {
            if o.name.is_empty() {
                return Err(ConfigError::validation("output needs a name").in_section("outputs"));
            }
            if outputs.iter().any(|other| other.name == o.name) {
                return Err(ConfigError::validation(format!(
                    "output name `{}` is not unique",
                    o.name
                ))
                .in_section("outputs"));
            }
            // Missing `options:` means all defaults.
            let options = if o.options.is_null() {
                serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
            } else {
                o.options
            };
            outputs.push(Output::from_config(
                o.name,
                o.comment,
                &o.kind,
                o.dir,
                o.run_by_default,
                o.output_id,
                options,
            )?);
        }
        Ok(Self {
            global: raw.global,
            preflight: raw.preflight.unwrap_or_default(),
            variants,
            outputs,
        })
    }

    /// Finds the variant selected by the resolved globals, if any.
    pub fn select_variant(&self, name: &str) -> Result<Option<Variant>, ConfigError> {
        if name.is_empty() {
            return Ok(None);
        }
        self.variants
            .iter()
            .find(|v| v.name == name)
            .cloned()
            .map(Some)
            .ok_or_else(|| ConfigError::validation(format!("unknown variant `{name}`")))
    }
}
