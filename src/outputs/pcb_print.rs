//! PDF/SVG prints of board layers, generated through `pcbnew_do export`.
//!
//! Both print types share the same options and the same invocation; SVG adds
//! the `--svg` switch and a post-processing pass that swaps the page
//! dimensions (the exporter writes them transposed).

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::context::Context;
use crate::error::{PlotError, PDF_PCB_PRINT};
use crate::exec::{Runner, CMD_PCBNEW_DO, URL_KIAUTO};
use crate::outputs::{expand_filename, filter_board, LayerSelection, Output};

/// Minimum KiAuto with working KiCad 6 export.
const MIN_PCBNEW_DO: &str = "1.6.7";
/// `%i` value for these outputs.
const ID: &str = "pcb_print";

/// Options shared by `pdf_pcb_print` and `svg_pcb_print`.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PcbPrintOptions {
    /// Output file name pattern; empty means the global default.
    pub output: String,
    /// Scale factor, 0 means fit to page.
    pub scaling: f64,
    /// How to draw the drill marks: `none`, `small` or `full`.
    pub drill_marks: String,
    /// Include the frame and title block.
    pub plot_sheet_reference: bool,
    /// Print in black and white.
    pub monochrome: bool,
    /// One file per layer instead of one page per layer.
    pub separated: bool,
    /// Mirror the print (bottom-side documentation).
    pub mirror: bool,
    /// Also hide the Fab texts of variant-excluded components.
    pub hide_excluded: bool,
    /// Replacement sheet title; a `+` prefix appends to the current one.
    pub title: String,
    /// Always include `Edge.Cuts` so the outline shows on every page.
    pub force_edge_cuts: bool,
    /// KiCad color theme name, empty for the default.
    pub color_theme: String,
    /// Swap the transposed page dimensions of SVG sheets (SVG prints only).
    pub enable_page_fix: bool,
    /// Layers to include.
    pub layers: LayerSelection,
}

impl Default for PcbPrintOptions {
    fn default() -> Self {
        Self {
            output: String::new(),
            scaling: 1.0,
            drill_marks: "full".to_string(),
            plot_sheet_reference: true,
            monochrome: false,
            separated: false,
            mirror: false,
            hide_excluded: false,
            title: String::new(),
            force_edge_cuts: true,
            color_theme: String::new(),
            enable_page_fix: true,
            layers: LayerSelection::default(),
        }
    }
}

impl PcbPrintOptions {
    fn drill_marks_code(&self) -> Result<u8, PlotError> {
        match self.drill_marks.as_str() {
            "none" => Ok(0),
            "small" => Ok(1),
            "full" => Ok(2),
            other => Err(PlotError::Plot(format!(
                "unknown drill mark type `{other}` (use none, small or full)"
            ))),
        }
    }

    fn output_pattern(&self, ctx: &Context) -> String {
        if self.output.is_empty() {
            ctx.globals.output.clone()
        } else {
            self.output.clone()
        }
    }

    /// Files this print will generate.
    pub fn targets(
        &self,
        ctx: &mut Context,
        out: &Output,
        dir: &Path,
        svg: bool,
    ) -> Result<Vec<PathBuf>, PlotError> {
        let ext = if svg { "svg" } else { "pdf" };
        if self.separated {
            // In separated mode the tool names the files after the board and
            // the layer.
            let base = ctx.pcb_basename();
            let layers = self.solve_layers(ctx)?;
            return Ok(layers
                .iter()
                .map(|l| dir.join(format!("{base}-{}.{ext}", l.replace('.', "_"))))
                .collect());
        }
        let pattern = self.output_pattern(ctx);
        let name = expand_filename(ctx, &pattern, ID, ext, &out.output_id, true)?;
        Ok(vec![dir.join(name)])
    }

    fn solve_layers(&self, ctx: &mut Context) -> Result<Vec<String>, PlotError> {
        let mut layers = self.layers.resolve(ctx)?;
        if self.force_edge_cuts && !layers.iter().any(|l| l == "Edge.Cuts") {
            layers.push("Edge.Cuts".to_string());
        }
        Ok(layers)
    }

    fn build_command(
        &self,
        board: &Path,
        dir: &Path,
        layers: &[String],
        output_name: &str,
        svg: bool,
        check_zone_fills: bool,
    ) -> Result<Vec<String>, PlotError> {
        let mut cmd = vec![CMD_PCBNEW_DO.to_string(), "export".to_string()];
        if !self.separated {
            cmd.push("--output_name".to_string());
            cmd.push(output_name.to_string());
        }
        if check_zone_fills {
            cmd.push("-f".to_string());
        }
        cmd.push("--scaling".to_string());
        cmd.push(self.scaling.to_string());
        cmd.push("--pads".to_string());
        cmd.push(self.drill_marks_code()?.to_string());
        if !self.plot_sheet_reference {
            cmd.push("--no-title".to_string());
        }
        if self.monochrome {
            cmd.push("--monochrome".to_string());
        }
        if self.separated {
            cmd.push("--separate".to_string());
        }
        if self.mirror {
            cmd.push("--mirror".to_string());
        }
        if !self.color_theme.is_empty() {
            cmd.push("--color_theme".to_string());
            cmd.push(self.color_theme.clone());
        }
        if svg {
            cmd.push("--svg".to_string());
        }
        cmd.push(board.to_string_lossy().into_owned());
        cmd.push(dir.to_string_lossy().into_owned());
        cmd.extend(layers.iter().cloned());
        Ok(cmd)
    }

    /// Generates the print.
    pub fn run(
        &self,
        ctx: &mut Context,
        runner: &mut Runner,
        out: &Output,
        dir: &Path,
        svg: bool,
    ) -> Result<(), PlotError> {
        runner.check_tool(CMD_PCBNEW_DO, URL_KIAUTO, Some(MIN_PCBNEW_DO))?;
        let layers = self.solve_layers(ctx)?;
        let targets = self.targets(ctx, out, dir, svg)?;
        let output_name = targets[0]
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let work = filter_board(ctx, &self.title, self.hide_excluded)?;
        let mut cmd = self.build_command(
            &work.path,
            dir,
            &layers,
            &output_name,
            svg,
            ctx.check_zone_fills,
        )?;
        let video_remove = runner.add_extra_options(&mut cmd);
        runner.exec_with_retry(&cmd, PDF_PCB_PRINT)?;
        if video_remove {
            let _ = fs::remove_file(dir.join("pcbnew_export_screencast.ogv"));
        }
        if svg && self.enable_page_fix {
            for target in &targets {
                if target.is_file() {
                    fix_svg_page(target)?;
                }
            }
        }
        Ok(())
    }
}

/// Swaps the page dimensions of an SVG: the exporter writes them transposed.
fn fix_svg_page(path: &Path) -> Result<(), PlotError> {
    let text = fs::read_to_string(path)
        .map_err(|e| PlotError::io(format!("reading `{}`", path.display()), e))?;
    let Some(fixed) = fix_svg_text(&text) else {
        return Ok(());
    };
    debug!("Fixing page size of `{}`", path.display());
    fs::write(path, fixed).map_err(|e| PlotError::io(format!("patching `{}`", path.display()), e))
}

fn fix_svg_text(text: &str) -> Option<String> {
    // Swap width with height in the page header (the last two viewBox
    // numbers carry them too) and in the background rectangle.
    let page_re =
        Regex::new(r#"<svg (.*) width="(.*)" height="(.*)" viewBox="(\S+) (\S+) (\S+) (\S+)""#)
            .ok()?;
    let fixed = page_re.replace_all(
        text,
        r#"<svg ${1} width="${3}" height="${2}" viewBox="${4} ${5} ${7} ${6}""#,
    );
    let rect_re = Regex::new(r#"<rect x="(\S+)" y="(\S+)" width="(\S+)" height="(\S+)""#).ok()?;
    let fixed = rect_re
        .replace_all(&fixed, r#"<rect x="${1}" y="${2}" width="${4}" height="${3}""#)
        .into_owned();
    if fixed == text {
        None
    } else {
        Some(fixed)
    }
}
