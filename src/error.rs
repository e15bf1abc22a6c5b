//! Error types and process exit codes.
//!
//! Every failure that aborts a run maps to a stable numeric exit code so
//! wrapper scripts and the generated Makefiles can tell failure modes apart.

use std::path::PathBuf;

use thiserror::Error;

/// Unhandled internal errors.
pub const INTERNAL_ERROR: u8 = 1;
/// Bad command line (what the argument parser uses).
pub const WRONG_ARGUMENTS: u8 = 2;
/// A required external tool is missing or too old.
pub const MISSING_TOOL: u8 = 4;
/// Invalid targets, skip lists or other run-time arguments.
pub const EXIT_BAD_ARGS: u8 = 6;
/// Broken configuration file.
pub const EXIT_BAD_CONFIG: u8 = 7;
/// An operation needed a PCB file and none was given.
pub const NO_PCB_FILE: u8 = 8;
/// An operation needed a schematic file and none was given.
pub const NO_SCH_FILE: u8 = 9;
/// The schematic PDF export failed.
pub const PDF_SCH_PRINT: u8 = 12;
/// The PCB PDF/SVG export failed.
pub const PDF_PCB_PRINT: u8 = 13;
/// Generic output generation failure.
pub const PLOT_ERROR: u8 = 14;
/// The PCB file could not be parsed.
pub const CORRUPTED_PCB: u8 = 17;
/// The schematic file could not be parsed.
pub const CORRUPTED_SCH: u8 = 22;
/// A user-supplied command (tag replacement) failed.
pub const FAILED_EXECUTE: u8 = 25;

/// Errors raised while reading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    Read {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed as YAML.
    #[error("failed to parse configuration file: {path}")]
    Parse {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying YAML error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Semantic problem in the configuration.
    #[error("{message}")]
    Validation {
        /// Description of the problem, including the section it was found in.
        message: String,
    },
}

impl ConfigError {
    /// Builds a validation error from anything printable.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Same error, but prefixed with the config section it belongs to.
    #[must_use]
    pub fn in_section(self, section: &str) -> Self {
        Self::Validation {
            message: format!("In section '{section}': {self}"),
        }
    }
}

/// Errors raised while generating outputs.
#[derive(Error, Debug)]
pub enum PlotError {
    /// A required external tool is not installed.
    #[error("no `{tool}` command found, please install it, visit: {url}")]
    MissingTool {
        /// Command name.
        tool: String,
        /// Where to get it.
        url: String,
    },

    /// An external tool is older than the minimum supported version.
    #[error("wrong version for `{tool}` ({found}), must be {needed} or newer")]
    ToolTooOld {
        /// Command name.
        tool: String,
        /// Version reported by the tool.
        found: String,
        /// Minimum version we support.
        needed: String,
    },

    /// An external tool exited with a non-zero status.
    #[error("{tool} returned {code}")]
    ToolFailed {
        /// Command name.
        tool: String,
        /// Its exit code.
        code: i32,
        /// Exit code we should use when aborting because of it.
        exit: u8,
    },

    /// A user command (e.g. from a tag replacement) failed.
    #[error("failed to execute:\n{command}\nreturn code {code}")]
    CommandFailed {
        /// The shell command.
        command: String,
        /// Its exit code.
        code: i32,
    },

    /// No PCB file was specified.
    #[error("no PCB file specified, use -b PCB_FILE")]
    NoPcbFile,

    /// No schematic file was specified.
    #[error("no schematic file specified, use -e SCH_FILE")]
    NoSchFile,

    /// The board file could not be parsed.
    #[error("error loading PCB file `{path}`: {reason}")]
    CorruptedPcb {
        /// The board file.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// The schematic file could not be parsed.
    #[error("error loading schematic `{path}`: {reason}")]
    CorruptedSch {
        /// The schematic file.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },

    /// Bad run-time arguments (unknown target, bad skip list).
    #[error("{0}")]
    BadArgs(String),

    /// IO failure while producing an output.
    #[error("{context}: {source}")]
    Io {
        /// What we were doing.
        context: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Anything else that aborts an output.
    #[error("{0}")]
    Plot(String),

    /// Broken run-time state that should never happen.
    #[error("{0}")]
    Internal(String),
}

/// Any error that aborts a run.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration was unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Output generation failed.
    #[error(transparent)]
    Plot(#[from] PlotError),
}

impl Error {
    /// The process exit code this error maps to.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => EXIT_BAD_CONFIG,
            Self::Plot(e) => e.exit_code(),
        }
    }
}

impl PlotError {
    /// Wraps an IO error with a human context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// The process exit code this error maps to.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingTool { .. } | Self::ToolTooOld { .. } => MISSING_TOOL,
            Self::ToolFailed { exit, .. } => *exit,
            Self::CommandFailed { .. } => FAILED_EXECUTE,
            Self::NoPcbFile => NO_PCB_FILE,
            Self::NoSchFile => NO_SCH_FILE,
            Self::CorruptedPcb { .. } => CORRUPTED_PCB,
            Self::CorruptedSch { .. } => CORRUPTED_SCH,
            Self::BadArgs(_) => EXIT_BAD_ARGS,
            Self::Io { .. } | Self::Plot(_) => PLOT_ERROR,
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }
}
