//! Preflights: checks and in-place updates applied before any output runs.
//!
//! The config's `preflight:` section enables them; `-s` skips some or all of
//! them from the command line. They run in a fixed order: tag replacements
//! first (they edit the source files), then zone filling, and the
//! `check_zone_fills` flag is only recorded for the print outputs to consume.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{info, warn};

use crate::context::Context;
use crate::error::PlotError;
use crate::exec::Runner;

pub mod replace;
pub mod zones;

use replace::TagReplaceOptions;

/// Names accepted in a `-s` skip list.
const KNOWN: &[&str] = &["check_zone_fills", "fill_zones", "pcb_replace", "sch_replace"];

/// The `preflight:` section of the config.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PreflightSection {
    /// Ask KiCad to refill zones before printing layers.
    pub check_zone_fills: Option<bool>,
    /// Fill the board zones in place (a backup is kept).
    pub fill_zones: Option<bool>,
    /// Tag replacements applied to the board file.
    pub pcb_replace: Option<TagReplaceOptions>,
    /// Tag replacements applied to the schematic file.
    pub sch_replace: Option<TagReplaceOptions>,
}

impl PreflightSection {
    /// Names of the enabled preflights, in application order.
    #[must_use]
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.sch_replace.is_some() {
            names.push("sch_replace");
        }
        if self.pcb_replace.is_some() {
            names.push("pcb_replace");
        }
        if self.fill_zones == Some(true) {
            names.push("fill_zones");
        }
        if self.check_zone_fills == Some(true) {
            names.push("check_zone_fills");
        }
        names
    }

    /// Runs the enabled preflights, honoring the skip set.
    pub fn run(
        &self,
        ctx: &mut Context,
        runner: &mut Runner,
        skipped: &HashSet<String>,
    ) -> Result<(), PlotError> {
        let active = |name: &str| {
            if skipped.contains(name) {
                info!("Skipping `{name}`");
                false
            } else {
                true
            }
        };
        if let Some(options) = &self.sch_replace {
            if active("sch_replace") {
                replace::sch_replace(ctx, options)?;
            }
        }
        if let Some(options) = &self.pcb_replace {
            if active("pcb_replace") {
                replace::pcb_replace(ctx, options)?;
            }
        }
        if self.fill_zones == Some(true) && active("fill_zones") {
            zones::fill_zones(ctx, runner)?;
        }
        if self.check_zone_fills == Some(true) && active("check_zone_fills") {
            ctx.check_zone_fills = true;
        }
        Ok(())
    }
}

/// Resolves the `-s` lists into the set of skipped preflights.
///
/// `all` skips everything; anything else must name a known preflight.
pub fn parse_skip(
    lists: &[String],
    section: &PreflightSection,
) -> Result<HashSet<String>, PlotError> {
    let mut skipped = HashSet::new();
    for list in lists {
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name == "all" {
                for k in KNOWN {
                    skipped.insert((*k).to_string());
                }
                continue;
            }
            if !KNOWN.contains(&name) {
                return Err(PlotError::BadArgs(format!(
                    "unknown preflight `{name}` in skip list"
                )));
            }
            if !section.enabled().contains(&name) {
                warn!("`{name}` is not enabled, skipping it has no effect");
            }
            skipped.insert(name.to_string());
        }
    }
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_follows_application_order() {
        let section: PreflightSection = serde_yaml::from_str(
            "check_zone_fills: true\n\
             fill_zones: true\n\
             pcb_replace:\n  \
             replace_tags:\n    \
             tag: 'git_hash'\n    \
             command: 'git rev-parse --short HEAD'\n",
        )
        .unwrap();
        assert_eq!(
            section.enabled(),
            vec!["pcb_replace", "fill_zones", "check_zone_fills"]
        );
    }

    #[test]
    fn unknown_preflight_key_is_rejected() {
        let r: Result<PreflightSection, _> = serde_yaml::from_str("run_teleport: true");
        assert!(r.is_err());
    }

    #[test]
    fn skip_all_expands_to_everything() {
        let section = PreflightSection::default();
        let skipped = parse_skip(&["all".to_string()], &section).unwrap();
        assert_eq!(skipped.len(), KNOWN.len());
    }

    #[test]
    fn skip_list_is_validated() {
        let section = PreflightSection::default();
        let err = parse_skip(&["fill_zones,bogus".to_string()], &section).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_BAD_ARGS);
    }

    #[test]
    fn skip_lists_accumulate() {
        let section = PreflightSection::default();
        let lists = vec!["fill_zones".to_string(), "check_zone_fills".to_string()];
        let skipped = parse_skip(&lists, &section).unwrap();
        assert!(skipped.contains("fill_zones"));
        assert!(skipped.contains("check_zone_fills"));
    }
}
