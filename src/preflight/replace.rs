//! Tag replacement inside the board/schematic files.
//!
//! Tags look like `@tag@` in the file text; each one is replaced by a fixed
//! text or by the output of a shell command, before any output reads the
//! file. A `-bak` backup is kept the first time a file is touched.

use std::fs;
use std::path::Path;
use std::process::Command;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::PlotError;

/// One tag replacement.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagReplace {
    /// Regular expression matched between the delimiters.
    pub tag: String,
    /// Text surrounding the tag in the file.
    pub tag_delimiter: String,
    /// Replacement text, used when `command` is empty.
    pub text: String,
    /// Command executed through the shell; its stdout is the replacement.
    pub command: String,
    /// Text prepended to the replacement.
    pub before: String,
    /// Text appended to the replacement.
    pub after: String,
}

impl Default for TagReplace {
    fn default() -> Self {
        Self {
            tag: String::new(),
            tag_delimiter: "@".to_string(),
            text: String::new(),
            command: String::new(),
            before: String::new(),
            after: String::new(),
        }
    }
}

/// One replacement or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TagReplaceList {
    One(TagReplace),
    Many(Vec<TagReplace>),
}

impl TagReplaceList {
    fn iter(&self) -> impl Iterator<Item = &TagReplace> {
        match self {
            Self::One(t) => std::slice::from_ref(t).iter(),
            Self::Many(v) => v.iter(),
        }
    }
}

/// Options shared by `pcb_replace` and `sch_replace`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TagReplaceOptions {
    /// Command whose output replaces the title block date.
    pub date_command: String,
    /// The replacements.
    pub replace_tags: Option<TagReplaceList>,
}

impl Default for TagReplaceOptions {
    fn default() -> Self {
        Self {
            date_command: String::new(),
            replace_tags: None,
        }
    }
}

/// Applies the replacements to the board file.
pub fn pcb_replace(ctx: &mut Context, options: &TagReplaceOptions) -> Result<(), PlotError> {
    let path = ctx.check_pcb()?.to_path_buf();
    apply(ctx, &path, options)
}

/// Applies the replacements to the schematic file.
pub fn sch_replace(ctx: &mut Context, options: &TagReplaceOptions) -> Result<(), PlotError> {
    let path = ctx.check_sch()?.to_path_buf();
    apply(ctx, &path, options)
}

fn apply(ctx: &Context, path: &Path, options: &TagReplaceOptions) -> Result<(), PlotError> {
    let original = fs::read_to_string(path)
        .map_err(|e| PlotError::io(format!("reading `{}`", path.display()), e))?;
    let mut text = original.clone();
    if let Some(tags) = &options.replace_tags {
        for tag in tags.iter() {
            apply_tag(ctx, &mut text, tag)?;
        }
    }
    if !options.date_command.is_empty() {
        let date = run_command(ctx, &options.date_command)?;
        if date.is_empty() {
            warn!("`date_command` returned nothing, date not changed");
        } else {
            let re = Regex::new(r#"\(date "[^"]*"\)"#)
                .map_err(|e| PlotError::Plot(format!("internal date pattern: {e}")))?;
            text = re
                .replace(&text, format!(r#"(date "{date}")"#).as_str())
                .into_owned();
        }
    }
    if text == original {
        debug!("Nothing to replace in `{}`", path.display());
        return Ok(());
    }
    Context::make_backup(path)?;
    fs::write(path, text).map_err(|e| PlotError::io(format!("updating `{}`", path.display()), e))
}

fn apply_tag(ctx: &Context, text: &mut String, tag: &TagReplace) -> Result<(), PlotError> {
    if tag.tag.is_empty() {
        warn!("Replacement without a `tag`, ignored");
        return Ok(());
    }
    let delimiter = regex::escape(&tag.tag_delimiter);
    let pattern = format!("{delimiter}{}{delimiter}", tag.tag);
    let re = Regex::new(&pattern)
        .map_err(|e| PlotError::Plot(format!("bad tag expression `{}`: {e}", tag.tag)))?;
    let replacement = if tag.command.is_empty() {
        tag.text.clone()
    } else {
        let out = run_command(ctx, &tag.command)?;
        if out.is_empty() {
            warn!("Command `{}` returned nothing, tag skipped", tag.command);
            return Ok(());
        }
        out
    };
    let replacement = format!("{}{}{}", tag.before, sanitize(&replacement), tag.after);
    debug!("Replacing `{pattern}` with `{replacement}`");
    *text = re.replace_all(text, replacement.as_str()).into_owned();
    Ok(())
}

/// Characters that would break the s-expression file are mapped to `_`.
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if matches!(c, '"' | '\\' | '\n' | '\r') {
                '_'
            } else {
                c
            }
        })
        .collect()
}

fn run_command(ctx: &Context, command: &str) -> Result<String, PlotError> {
    debug!("Executing: {command}");
    let mut cmd = Command::new("/bin/bash");
    cmd.arg("-c").arg(command);
    if let Some(pcb) = &ctx.pcb_file {
        cmd.env("KIFORGE_PCB_NAME", pcb);
    }
    if let Some(sch) = &ctx.sch_file {
        cmd.env("KIFORGE_SCH_NAME", sch);
    }
    let output = cmd
        .output()
        .map_err(|e| PlotError::io(format!("running `{command}`"), e))?;
    if !output.status.success() {
        return Err(PlotError::CommandFailed {
            command: command.to_string(),
            code: output.status.code().unwrap_or(-1),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
