//! PDF of all schematic pages, generated through `eeschema_do export`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::context::Context;
use crate::error::{PlotError, PDF_SCH_PRINT};
use crate::exec::{Runner, CMD_EESCHEMA_DO, URL_KIAUTO};
use crate::outputs::{expand_filename, filter_schematic, Output};

/// Minimum KiAuto with working KiCad 6 schematic export.
const MIN_EESCHEMA_DO: &str = "1.5.4";
/// `%i` value for this output.
const ID: &str = "schematic";

/// Options of the `pdf_sch_print` output.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchPrintOptions {
    /// Output file name pattern; empty means the global default.
    pub output: String,
    /// Print in black and white.
    pub monochrome: bool,
    /// Include the frame and title block.
    pub frame: bool,
}

impl Default for SchPrintOptions {
    fn default() -> Self {
        Self {
            output: String::new(),
            monochrome: false,
            frame: true,
        }
    }
}

impl SchPrintOptions {
    /// The file this print will generate.
    pub fn targets(
        &self,
        ctx: &mut Context,
        out: &Output,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, PlotError> {
        let pattern = if self.output.is_empty() {
            ctx.globals.output.clone()
        } else {
            self.output.clone()
        };
        let name = expand_filename(ctx, &pattern, ID, "pdf", &out.output_id, false)?;
        Ok(vec![dir.join(name)])
    }

    /// Generates the print.
    pub fn run(
        &self,
        ctx: &mut Context,
        runner: &mut Runner,
        out: &Output,
        dir: &Path,
    ) -> Result<(), PlotError> {
        runner.check_tool(CMD_EESCHEMA_DO, URL_KIAUTO, Some(MIN_EESCHEMA_DO))?;
        let target = self.targets(ctx, out, dir)?.remove(0);
        let work = filter_schematic(ctx)?;
        let mut cmd = vec![
            CMD_EESCHEMA_DO.to_string(),
            "export".to_string(),
            "--all_pages".to_string(),
            "--file_format".to_string(),
            "pdf".to_string(),
        ];
        if self.monochrome {
            cmd.push("--monochrome".to_string());
        }
        if !self.frame {
            cmd.push("--no_frame".to_string());
        }
        let video_remove = runner.add_extra_options(&mut cmd);
        cmd.push(work.path.to_string_lossy().into_owned());
        cmd.push(dir.to_string_lossy().into_owned());
        runner.exec_with_retry(&cmd, PDF_SCH_PRINT)?;
        if video_remove {
            let _ = fs::remove_file(dir.join("export_eeschema_screencast.ogv"));
        }
        // The tool names the PDF after the schematic, we want our pattern.
        let stem = work
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let generated = dir.join(format!("{stem}.pdf"));
        if generated != target && generated.is_file() {
            debug!(
                "Renaming `{}` -> `{}`",
                generated.display(),
                target.display()
            );
            fs::rename(&generated, &target).map_err(|e| {
                PlotError::io(format!("renaming to `{}`", target.display()), e)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_the_frame() {
        let o: SchPrintOptions = serde_yaml::from_str("{}").unwrap();
        assert!(o.frame);
        assert!(!o.monochrome);
        assert!(o.output.is_empty());
    }

    #[test]
    fn unknown_option_is_rejected() {
        let r: Result<SchPrintOptions, _> = serde_yaml::from_str("all_pages: false");
        assert!(r.is_err());
    }
}
