//! The run driver: preflights, output selection and generation.
//!
//! Explicit targets run in command line order; without targets the
//! `run_by_default` outputs run in declaration order. `-i` inverts an
//! explicit selection. Outputs consumed by a `compress` entry run before it,
//! whether selected or not, each one at most once per run.

use std::collections::HashSet;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, PlotError};
use crate::exec::Runner;
use crate::global::GlobalOptions;
use crate::outputs::Output;
use crate::preflight;

/// Resolves globals and the selected variant into the context.
///
/// The board's stack-up seeds the globals when a board is available, then
/// the config section and the command line redefinitions are applied on top.
pub fn setup_context(
    ctx: &mut Context,
    config: &Config,
    redefs: &[String],
) -> Result<(), Error> {
    let stackup = if ctx.pcb_file.as_deref().is_some_and(std::path::Path::is_file) {
        ctx.board()?.stackup()
    } else {
        None
    };
    ctx.globals = GlobalOptions::resolve(config.global.as_ref(), redefs, stackup.as_ref())?;
    ctx.apply_forced_units();
    let variant_name = ctx.globals.variant.clone();
    ctx.variant = config.select_variant(&variant_name)?;
    if !ctx.out_dir_from_cli {
        if let Some(dir) = ctx.globals.out_dir.clone() {
            ctx.out_dir = dir.into();
        }
    }
    Ok(())
}

/// Picks the outputs to generate, as indices into the config list.
pub fn select_outputs(
    outputs: &[Output],
    targets: &[String],
    invert: bool,
) -> Result<Vec<usize>, PlotError> {
    for t in targets {
        if !outputs.iter().any(|o| &o.name == t) {
            return Err(PlotError::BadArgs(format!("unknown output `{t}`")));
        }
    }
    if invert {
        // `-i` without targets selects nothing: only the preflights run.
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(outputs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.run_by_default && !targets.contains(&o.name))
            .map(|(i, _)| i)
            .collect());
    }
    if targets.is_empty() {
        return Ok(outputs
            .iter()
            .enumerate()
            .filter(|(_, o)| o.run_by_default)
            .map(|(i, _)| i)
            .collect());
    }
    Ok(targets
        .iter()
        .map(|t| outputs.iter().position(|o| &o.name == t).unwrap())
        .collect())
}

fn run_with_deps(
    index: usize,
    ctx: &mut Context,
    runner: &mut Runner,
    outputs: &[Output],
    done: &mut HashSet<usize>,
    depth: usize,
) -> Result<(), PlotError> {
    if done.contains(&index) {
        return Ok(());
    }
    if depth > outputs.len() {
        return Err(PlotError::Plot(format!(
            "circular `from_output` dependency involving `{}`",
            outputs[index].name
        )));
    }
    for dep in outputs[index].dependencies() {
        let dep_index = outputs
            .iter()
            .position(|o| o.name == dep)
            .ok_or_else(|| PlotError::Plot(format!("unknown output `{dep}` in `from_output`")))?;
        if !done.contains(&dep_index) {
            debug!("Running `{dep}` first, `{}` needs it", outputs[index].name);
            run_with_deps(dep_index, ctx, runner, outputs, done, depth + 1)?;
        }
    }
    if let Err(e) = outputs[index].run(ctx, runner, outputs) {
        error!("Output `{}` failed", outputs[index].name);
        return Err(e);
    }
    done.insert(index);
    Ok(())
}

/// Runs the preflights and generates the selected outputs.
pub fn generate_outputs(
    ctx: &mut Context,
    config: &Config,
    targets: &[String],
    invert: bool,
    skip_pre: &[String],
) -> Result<(), Error> {
    let skipped = preflight::parse_skip(skip_pre, &config.preflight)?;
    let mut runner = Runner::new(&ctx.globals, ctx.debug_level);
    config.preflight.run(ctx, &mut runner, &skipped)?;
    let selected = select_outputs(&config.outputs, targets, invert)?;
    if selected.is_empty() {
        info!("Nothing to generate");
        return Ok(());
    }
    info!("Generating outputs:");
    let mut done = HashSet::new();
    for index in selected {
        run_with_deps(index, ctx, &mut runner, &config.outputs, &mut done, 0)?;
    }
    Ok(())
}

/// Prints the available outputs.
pub fn list_outputs(config: &Config) {
    println!("Available outputs:");
    for o in &config.outputs {
        let skipped = if o.run_by_default { "" } else { " [skipped]" };
        println!("- `{}` ({}): {}{}", o.name, o.kind(), o.comment_or_name(), skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> Vec<Output> {
        let empty = || serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        vec![
            Output::from_config(
                "prints".to_string(),
                String::new(),
                "pdf_pcb_print",
                String::new(),
                true,
                String::new(),
                empty(),
            )
            .unwrap(),
            Output::from_config(
                "view".to_string(),
                String::new(),
                "boardview",
                String::new(),
                false,
                String::new(),
                empty(),
            )
            .unwrap(),
            Output::from_config(
                "archive".to_string(),
                String::new(),
                "compress",
                String::new(),
                true,
                String::new(),
                empty(),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn default_selection_honors_run_by_default() {
        let outs = outputs();
        let selected = select_outputs(&outs, &[], false).unwrap();
        assert_eq!(selected, vec![0, 2]);
    }

    #[test]
    fn explicit_targets_keep_cli_order() {
        let outs = outputs();
        let targets = vec!["view".to_string(), "prints".to_string()];
        let selected = select_outputs(&outs, &targets, false).unwrap();
        assert_eq!(selected, vec![1, 0]);
    }

    #[test]
    fn inverted_selection_excludes_targets() {
        let outs = outputs();
        let targets = vec!["prints".to_string()];
        let selected = select_outputs(&outs, &targets, true).unwrap();
        // `view` stays out: it is not run by default.
        assert_eq!(selected, vec![2]);
    }

    #[test]
    fn invert_without_targets_selects_nothing() {
        let outs = outputs();
        let selected = select_outputs(&outs, &[], true).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn unknown_target_is_rejected() {
        let outs = outputs();
        let err = select_outputs(&outs, &["gerbers".to_string()], false).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_BAD_ARGS);
    }
}
