//! Makefile generation (`-m`).
//!
//! The generated file lets `make` drive incremental runs: one rule per
//! output with its real target files as prerequisites, one phony rule per
//! enabled preflight, and `sch`/`pcb` group targets. All paths are written
//! relative to the Makefile so the project stays relocatable.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::Config;
use crate::context::Context;
use crate::error::{Error, PlotError};

/// Turns an output name into a valid make identifier.
fn name2make(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A path as written in the Makefile: relative to it when possible.
fn rel(path: &Path, base: &Path) -> String {
    if let Ok(stripped) = path.strip_prefix(base) {
        return non_empty(stripped);
    }
    // Absolute paths against a relative base: anchor the base at the
    // working directory.
    if let Ok(cwd) = std::env::current_dir() {
        let full_base = if base.as_os_str() == "." {
            cwd
        } else {
            cwd.join(base)
        };
        if let Ok(stripped) = path.strip_prefix(&full_base) {
            return non_empty(stripped);
        }
    }
    non_empty(path)
}

fn non_empty(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.is_empty() {
        ".".to_string()
    } else {
        s.into_owned()
    }
}

/// Writes the Makefile.
pub fn generate_makefile(
    makefile: &Path,
    cfg_file: &Path,
    ctx: &mut Context,
    config: &Config,
) -> Result<(), Error> {
    debug!("Creating makefile `{}`", makefile.display());
    let base = makefile
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let text = render(&base, cfg_file, ctx, config)?;
    fs::write(makefile, text)
        .map_err(|e| PlotError::io(format!("writing `{}`", makefile.display()), e))?;
    Ok(())
}

fn render(
    base: &Path,
    cfg_file: &Path,
    ctx: &mut Context,
    config: &Config,
) -> Result<String, Error> {
    let mut text = String::new();
    text.push_str("# Automatically generated, all paths are relative to this file\n");
    text.push_str("KIFORGE?=kiforge\n");
    text.push_str("DEBUG?=\n");
    text.push_str(&format!("CONFIG={}\n", rel(cfg_file, base)));
    if let Some(sch) = &ctx.sch_file {
        text.push_str(&format!("SCH={}\n", rel(sch, base)));
    }
    if let Some(pcb) = &ctx.pcb_file {
        text.push_str(&format!("PCB={}\n", rel(pcb, base)));
    }
    text.push_str(&format!("DEST={}\n", rel(&ctx.out_dir.clone(), base)));
    text.push_str("LOGFILE?=kiforge_error.log\n");
    let mut cmd = "KIFORGE_CMD=$(KIFORGE) $(DEBUG) -c $(CONFIG)".to_string();
    if ctx.sch_file.is_some() {
        cmd.push_str(" -e $(SCH)");
    }
    if ctx.pcb_file.is_some() {
        cmd.push_str(" -b $(PCB)");
    }
    cmd.push_str(" -d $(DEST)\n");
    text.push_str(&cmd);

    let preflights = config.preflight.enabled();
    let mut phony = vec!["all".to_string()];
    let mut all_deps = Vec::new();
    let mut sch_group = Vec::new();
    let mut pcb_group = Vec::new();
    let mut rules = String::new();

    rules.push_str("\n#### Outputs\n");
    for out in &config.outputs {
        let make_name = name2make(&out.name);
        let targets = out.targets(ctx, &config.outputs)?;
        let files: Vec<String> = targets.iter().map(|t| rel(t, base)).collect();
        rules.push_str(&format!("\n# {}: {}\n", out.name, out.comment_or_name()));
        rules.push_str(&format!("{make_name}_targets={}\n", files.join(" ")));
        rules.push_str(&format!("{make_name}: $({make_name}_targets)\n"));
        rules.push_str(&format!("$({make_name}_targets):\n"));
        rules.push_str(&format!(
            "\t@$(KIFORGE_CMD) -s all \"{}\" 2>> $(LOGFILE)\n",
            out.name
        ));
        phony.push(make_name.clone());
        if out.run_by_default {
            all_deps.push(make_name.clone());
        }
        if out.is_sch() {
            sch_group.push(make_name);
        } else if out.is_pcb() {
            pcb_group.push(make_name);
        }
    }

    if !preflights.is_empty() {
        rules.push_str("\n#### Preflights\n");
        for p in &preflights {
            let make_name = format!("pre_{p}");
            let others: Vec<&str> = preflights.iter().filter(|o| *o != p).copied().collect();
            rules.push_str(&format!("\n{make_name}:\n"));
            if others.is_empty() {
                rules.push_str("\t@$(KIFORGE_CMD) -i 2>> $(LOGFILE)\n");
            } else {
                rules.push_str(&format!(
                    "\t@$(KIFORGE_CMD) -s {} -i 2>> $(LOGFILE)\n",
                    others.join(",")
                ));
            }
            all_deps.insert(0, make_name.clone());
            phony.push(make_name);
        }
    }

    text.push_str("\n#### Default target\n");
    text.push_str(&format!("all: {}\n", all_deps.join(" ")));
    text.push_str(&rules);

    text.push_str("\n#### Groups\n");
    text.push_str(&format!("sch: {}\n", sch_group.join(" ")));
    text.push_str(&format!("pcb: {}\n", pcb_group.join(" ")));
    phony.push("sch".to_string());
    phony.push("pcb".to_string());

    text.push_str(&format!("\n.PHONY: {}\n", phony.join(" ")));
    Ok(text)
}
