//! kiforge: KiCad automation from a YAML file.
//!
//! A project declares the documentation and fabrication artifacts it needs
//! (`outputs:`), the checks and in-place updates to apply first
//! (`preflight:`) and the assembly variants of the board (`variants:`); one
//! command regenerates everything, or a generated Makefile does it
//! incrementally. The heavy lifting — plotting, zone filling — is delegated
//! to KiCad itself through the KiAuto tools; what runs here is the plumbing
//! around them.
//!
//! # Modules
//!
//! - [`config`] — the YAML configuration file
//! - [`context`] — per-run project state
//! - [`error`] — error types and process exit codes
//! - [`exec`] — external tool invocation
//! - [`global`] — cross-cutting global options
//! - [`kicad`] — board/schematic parsing and patching
//! - [`makefile`] — Makefile generation
//! - [`outputs`] — the output drivers
//! - [`plot`] — the run driver
//! - [`preflight`] — checks and updates applied before outputs
//! - [`variant`] — assembly variants

pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod global;
pub mod kicad;
pub mod makefile;
pub mod outputs;
pub mod plot;
pub mod preflight;
pub mod variant;

pub use config::Config;
pub use context::Context;
pub use error::Error;
