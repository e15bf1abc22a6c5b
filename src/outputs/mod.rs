//! The outputs: everything that lands in the destination directory.
//!
//! Each config entry under `outputs:` has a common envelope (name, comment,
//! type, dir, `run_by_default`, `output_id`) and type-specific options. The
//! envelope is parsed here; the options are handed to the matching driver
//! module. Drivers never print to stdout and never change the current
//! directory; they receive the run context and the external tool runner.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::context::Context;
use crate::error::{ConfigError, PlotError};
use crate::exec::Runner;

pub mod boardview;
pub mod compress;
pub mod pcb_print;
pub mod sch_print;

use boardview::BoardviewOptions;
use compress::CompressOptions;
use pcb_print::PcbPrintOptions;
use sch_print::SchPrintOptions;

/// Type-specific part of an output.
#[derive(Debug)]
enum Driver {
    PdfPcbPrint(PcbPrintOptions),
    SvgPcbPrint(PcbPrintOptions),
    PdfSchPrint(SchPrintOptions),
    Boardview(BoardviewOptions),
    Compress(CompressOptions),
}

/// One entry of the config's `outputs:` list, ready to run.
#[derive(Debug)]
pub struct Output {
    /// Name used to select the output from the command line.
    pub name: String,
    /// A comment, shown when listing and used in the Makefile.
    pub comment: String,
    /// Target directory pattern, relative to the base output dir.
    pub dir: String,
    /// False for outputs that only run when explicitly requested.
    pub run_by_default: bool,
    /// User-assigned text for the `%I` filename expansion.
    pub output_id: String,
    driver: Driver,
}

impl Output {
    /// Builds an output from its envelope and raw options.
    pub fn from_config(
        name: String,
        comment: String,
        kind: &str,
        dir: String,
        run_by_default: bool,
        output_id: String,
        options: serde_yaml::Value,
    ) -> Result<Self, ConfigError> {
        let section = format!("{name} ({kind})");
        let wrap = |e: serde_yaml::Error| {
            ConfigError::validation(format!("bad `options`: {e}")).in_section(&section)
        };
        let driver = match kind {
            "pdf_pcb_print" => Driver::PdfPcbPrint(serde_yaml::from_value(options).map_err(wrap)?),
            "svg_pcb_print" => Driver::SvgPcbPrint(serde_yaml::from_value(options).map_err(wrap)?),
            "pdf_sch_print" => Driver::PdfSchPrint(serde_yaml::from_value(options).map_err(wrap)?),
            "boardview" => Driver::Boardview(serde_yaml::from_value(options).map_err(wrap)?),
            "compress" => Driver::Compress(serde_yaml::from_value(options).map_err(wrap)?),
            _ => {
                return Err(
                    ConfigError::validation(format!("unknown output type `{kind}`"))
                        .in_section(&section),
                )
            }
        };
        Ok(Self {
            name,
            comment,
            dir,
            run_by_default,
            output_id,
            driver,
        })
    }

    /// The config `type` of this output.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match &self.driver {
            Driver::PdfPcbPrint(_) => "pdf_pcb_print",
            Driver::SvgPcbPrint(_) => "svg_pcb_print",
            Driver::PdfSchPrint(_) => "pdf_sch_print",
            Driver::Boardview(_) => "boardview",
            Driver::Compress(_) => "compress",
        }
    }

    /// True when the output needs the board file.
    #[must_use]
    pub fn is_pcb(&self) -> bool {
        !matches!(self.driver, Driver::PdfSchPrint(_) | Driver::Compress(_))
    }

    /// True when the output needs the schematic file.
    #[must_use]
    pub fn is_sch(&self) -> bool {
        matches!(self.driver, Driver::PdfSchPrint(_))
    }

    /// Names of the outputs this one consumes (compress `from_output`).
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        match &self.driver {
            Driver::Compress(o) => o.dependencies(),
            _ => Vec::new(),
        }
    }

    /// Files this output will generate, with their final paths.
    pub fn targets(&self, ctx: &mut Context, all: &[Output]) -> Result<Vec<PathBuf>, PlotError> {
        let dir = self.expand_dir(ctx)?;
        match &self.driver {
            Driver::PdfPcbPrint(o) => o.targets(ctx, self, &dir, false),
            Driver::SvgPcbPrint(o) => o.targets(ctx, self, &dir, true),
            Driver::PdfSchPrint(o) => o.targets(ctx, self, &dir),
            Driver::Boardview(o) => o.targets(ctx, self, &dir),
            Driver::Compress(o) => o.targets(ctx, self, &dir, all),
        }
    }

    /// Generates the output.
    pub fn run(
        &self,
        ctx: &mut Context,
        runner: &mut Runner,
        all: &[Output],
    ) -> Result<(), PlotError> {
        info!("- `{}` ({})", self.comment_or_name(), self.name);
        let dir = self.expand_dir(ctx)?;
        fs::create_dir_all(&dir)
            .map_err(|e| PlotError::io(format!("creating `{}`", dir.display()), e))?;
        match &self.driver {
            Driver::PdfPcbPrint(o) => o.run(ctx, runner, self, &dir, false),
            Driver::SvgPcbPrint(o) => o.run(ctx, runner, self, &dir, true),
            Driver::PdfSchPrint(o) => o.run(ctx, runner, self, &dir),
            Driver::Boardview(o) => o.run(ctx, self, &dir),
            Driver::Compress(o) => o.run(ctx, runner, self, &dir, all),
        }
    }

    /// The comment when there is one, the name otherwise.
    #[must_use]
    pub fn comment_or_name(&self) -> &str {
        if self.comment.is_empty() {
            &self.name
        } else {
            &self.comment
        }
    }

    fn expand_dir(&self, ctx: &mut Context) -> Result<PathBuf, PlotError> {
        let pattern = if self.dir.is_empty() {
            ctx.globals.dir.clone()
        } else {
            self.dir.clone()
        };
        let expanded = expand(ctx, &pattern, "", "", &self.output_id, !self.is_sch(), false)?;
        let path = PathBuf::from(expanded);
        Ok(if path.is_absolute() {
            path
        } else {
            ctx.out_dir.join(path)
        })
    }
}

/// Expands the `%X` filename patterns for an output and sanitizes the result
/// for use as a file name.
pub fn expand_filename(
    ctx: &mut Context,
    pattern: &str,
    id: &str,
    ext: &str,
    output_id: &str,
    for_pcb: bool,
) -> Result<String, PlotError> {
    expand(ctx, pattern, id, ext, output_id, for_pcb, true)
}

fn expand(
    ctx: &mut Context,
    pattern: &str,
    id: &str,
    ext: &str,
    output_id: &str,
    for_pcb: bool,
    sanitize: bool,
) -> Result<String, PlotError> {
    let basename = if for_pcb {
        ctx.pcb_basename()
    } else {
        ctx.sch_basename()
    };
    let no_ext = if for_pcb {
        ctx.pcb_file.clone()
    } else {
        ctx.sch_file.clone()
    }
    .map(|p| p.with_extension("").to_string_lossy().into_owned())
    .unwrap_or_default();
    // Title block data comes from the document the output prints: the board
    // for PCB outputs, the schematic otherwise. Loading it lazily keeps runs
    // with only the other file working.
    let needs_doc = ["%p", "%r", "%d", "%c"].iter().any(|t| pattern.contains(t));
    let tb = if needs_doc && for_pcb && ctx.pcb_file.as_deref().is_some_and(Path::is_file) {
        ctx.board()?.title_block()
    } else if needs_doc && !for_pcb && ctx.sch_file.as_deref().is_some_and(Path::is_file) {
        ctx.schematic()?.title_block()
    } else {
        crate::kicad::TitleBlock::default()
    };
    let title = if tb.title.is_empty() {
        basename.clone()
    } else {
        tb.title.clone()
    };
    let doc_date = solve_date(ctx, &tb.date);
    let run_date = ctx.now.format(&ctx.globals.date_format).to_string();
    let run_time = ctx.now.format(&ctx.globals.time_format).to_string();

    let mut result = String::with_capacity(pattern.len() + 16);
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('i') => result.push_str(id),
            Some('I') => result.push_str(output_id),
            Some('x') => result.push_str(ext),
            Some('v') => result.push_str(ctx.variant_file_id()),
            Some('V') => result.push_str(ctx.variant_name()),
            Some('f') => result.push_str(&basename),
            Some('F') => result.push_str(&no_ext),
            Some('p') => result.push_str(&title),
            Some('r') => result.push_str(&tb.rev),
            Some('d') => result.push_str(&doc_date),
            Some('c') => result.push_str(&tb.company),
            Some('D') => result.push_str(&run_date),
            Some('T') => result.push_str(&run_time),
            Some(other) => {
                result.push('%');
                result.push(other);
            }
            None => result.push('%'),
        }
    }
    if sanitize {
        result = result
            .chars()
            .map(|c| {
                if matches!(c, '?' | '*' | ':' | '|' | '"' | '<' | '>') {
                    '_'
                } else {
                    c
                }
            })
            .collect();
    }
    debug!("Expanded `{pattern}` -> `{result}`");
    Ok(result)
}

/// The `%d` value: the document date reformatted when it looks like a date,
/// the run timestamp when the document has none.
fn solve_date(ctx: &Context, doc_date: &str) -> String {
    if doc_date.is_empty() {
        return ctx.now.format(&ctx.globals.date_time_format).to_string();
    }
    if ctx.globals.time_reformat {
        if let Ok(d) = chrono::NaiveDate::parse_from_str(doc_date, "%Y-%m-%d") {
            return d.format(&ctx.globals.date_format).to_string();
        }
    }
    doc_date.to_string()
}

/// A possibly filtered working copy of the board, alive while the temporary
/// directory behind it exists.
#[derive(Debug)]
pub struct WorkFile {
    /// File to feed to the external tool.
    pub path: PathBuf,
    _dir: Option<tempfile::TempDir>,
}

/// Builds the board file an exporting tool should see: the original when
/// nothing changes it, a patched temporary copy when a variant or a title
/// override applies.
pub fn filter_board(
    ctx: &mut Context,
    title: &str,
    hide_excluded: bool,
) -> Result<WorkFile, PlotError> {
    let original = ctx.check_pcb()?.to_path_buf();
    let has_exclusions = ctx
        .variant
        .as_ref()
        .is_some_and(crate::variant::Variant::has_exclusions);
    let excluded = if has_exclusions {
        let refs: Vec<String> = ctx
            .board()?
            .footprints()
            .into_iter()
            .map(|f| f.reference)
            .collect();
        ctx.variant
            .as_ref()
            .map(|v| v.resolve(&refs))
            .unwrap_or_default()
    } else {
        std::collections::HashSet::new()
    };
    if excluded.is_empty() && title.is_empty() {
        return Ok(WorkFile {
            path: original,
            _dir: None,
        });
    }
    let mut board = ctx.board()?.clone();
    if !excluded.is_empty() {
        debug!("Excluding {} component/s from the board", excluded.len());
        board.strip_paste(&excluded);
        board.cross_out(&excluded);
        if hide_excluded {
            board.hide_fab_text(&excluded);
        }
    }
    if !title.is_empty() {
        let new_title = if let Some(extra) = title.strip_prefix('+') {
            format!("{}{}", board.title_block().title, extra)
        } else {
            title.to_string()
        };
        board.set_title(&new_title);
    }
    let dir = tempfile::tempdir().map_err(|e| PlotError::io("creating temporary dir", e))?;
    let file_name = original
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("board.kicad_pcb"));
    let path = dir.path().join(file_name);
    debug!("Storing filtered board to `{}`", path.display());
    board.save(&path)?;
    copy_project(ctx, &path)?;
    Ok(WorkFile {
        path,
        _dir: Some(dir),
    })
}

/// Builds the schematic file an exporting tool should see, patching a variant
/// copy when components are excluded.
pub fn filter_schematic(ctx: &mut Context) -> Result<WorkFile, PlotError> {
    let original = ctx.check_sch()?.to_path_buf();
    let has_exclusions = ctx
        .variant
        .as_ref()
        .is_some_and(crate::variant::Variant::has_exclusions);
    if !has_exclusions {
        return Ok(WorkFile {
            path: original,
            _dir: None,
        });
    }
    let refs = ctx.schematic()?.references();
    let excluded = ctx
        .variant
        .as_ref()
        .map(|v| v.resolve(&refs))
        .unwrap_or_default();
    let mut sch = ctx.schematic()?.clone();
    sch.set_not_fitted(&excluded);
    let dir = tempfile::tempdir().map_err(|e| PlotError::io("creating temporary dir", e))?;
    let path = sch.save_variant(dir.path())?;
    copy_project(ctx, &path)?;
    Ok(WorkFile {
        path,
        _dir: Some(dir),
    })
}

/// Puts a project file next to a temporary copy; the KiCad tools want one and
/// complain otherwise. An empty one is written when the project has none.
fn copy_project(ctx: &Context, work_file: &Path) -> Result<(), PlotError> {
    let dest = work_file.with_extension(crate::context::PRO_EXT);
    match ctx.pro_file() {
        Some(pro) => {
            fs::copy(&pro, &dest)
                .map(|_| ())
                .map_err(|e| PlotError::io(format!("copying project `{}`", pro.display()), e))
        }
        None => fs::write(&dest, "{}\n")
            .map_err(|e| PlotError::io("creating placeholder project", e)),
    }
}

/// Layer selection: a named group or an explicit list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LayerSelection {
    /// `all`, `copper` or `technical`.
    Group(String),
    /// Explicit layers.
    List(Vec<LayerEntry>),
}

impl Default for LayerSelection {
    fn default() -> Self {
        Self::Group("all".to_string())
    }
}

/// One entry of an explicit layer list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LayerEntry {
    /// Just the canonical name.
    Name(String),
    /// Name plus presentation details.
    Full {
        layer: String,
        #[serde(default)]
        suffix: String,
        #[serde(default)]
        description: String,
    },
}

impl LayerEntry {
    /// The canonical layer name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Full { layer, .. } => layer,
        }
    }
}

const TECHNICAL_LAYERS: &[&str] = &[
    "F.Adhes",
    "B.Adhes",
    "F.Paste",
    "B.Paste",
    "F.SilkS",
    "B.SilkS",
    "F.Mask",
    "B.Mask",
    "Dwgs.User",
    "Cmts.User",
    "Eco1.User",
    "Eco2.User",
    "Edge.Cuts",
    "Margin",
    "F.CrtYd",
    "B.CrtYd",
    "F.Fab",
    "B.Fab",
];

impl LayerSelection {
    /// Resolves the selection to canonical layer names, validated against the
    /// board's layer table.
    pub fn resolve(&self, ctx: &mut Context) -> Result<Vec<String>, PlotError> {
        let board_layers: Vec<String> = ctx.board()?.layers().into_iter().map(|l| l.name).collect();
        match self {
            Self::Group(group) => match group.as_str() {
                "all" => Ok(board_layers),
                "copper" => Ok(board_layers
                    .into_iter()
                    .filter(|n| n.ends_with(".Cu") || n == "F.Cu" || n == "B.Cu")
                    .collect()),
                "technical" => Ok(board_layers
                    .into_iter()
                    .filter(|n| TECHNICAL_LAYERS.contains(&n.as_str()))
                    .collect()),
                other => Err(PlotError::Plot(format!(
                    "unknown layer group `{other}` (use all, copper or technical)"
                ))),
            },
            Self::List(entries) => {
                let mut result = Vec::new();
                for e in entries {
                    let name = e.name();
                    if !board_layers.iter().any(|l| l == name) {
                        return Err(PlotError::Plot(format!(
                            "layer `{name}` is not defined in the board"
                        )));
                    }
                    result.push(name.to_string());
                }
                Ok(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn ctx_with_board() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let pcb = dir.path().join("video.kicad_pcb");
        let mut f = fs::File::create(&pcb).unwrap();
        writeln!(
            f,
            "(kicad_pcb (version 20211014) (layers (0 \"F.Cu\" signal) \
             (31 \"B.Cu\" signal) (44 \"Edge.Cuts\" user)) \
             (title_block (title \"Video board\") (date \"2022-03-01\") (rev \"C\")))"
        )
        .unwrap();
        let ctx = Context::new(Some(pcb), None, dir.path().join("out"), true, 0);
        (dir, ctx)
    }

    #[test]
    fn filename_expansion_basics() {
        let (_dir, mut ctx) = ctx_with_board();
        let name = expand_filename(&mut ctx, "%f-%i%I%v.%x", "pcb_print", "pdf", "", true).unwrap();
        assert_eq!(name, "video-pcb_print.pdf");
    }

    #[test]
    fn filename_expansion_title_block() {
        let (_dir, mut ctx) = ctx_with_board();
        let name = expand_filename(&mut ctx, "%p_rev%r.%x", "", "pdf", "", true).unwrap();
        assert_eq!(name, "Video board_revC.pdf");
    }

    #[test]
    fn sch_expansion_reads_the_schematic_title_block() {
        let dir = tempfile::tempdir().unwrap();
        let sch = dir.path().join("video.kicad_sch");
        fs::write(
            &sch,
            "(kicad_sch (title_block (title \"Supply\") (rev \"B\")))",
        )
        .unwrap();
        let mut ctx = Context::new(None, Some(sch), dir.path().join("out"), true, 0);
        let name = expand_filename(&mut ctx, "%p_rev%r.%x", "schematic", "pdf", "", false).unwrap();
        assert_eq!(name, "Supply_revB.pdf");
    }

    #[test]
    fn filename_expansion_sanitizes() {
        let (_dir, mut ctx) = ctx_with_board();
        let name = expand_filename(&mut ctx, "a:b*c.%x", "", "pdf", "", true).unwrap();
        assert_eq!(name, "a_b_c.pdf");
    }

    #[test]
    fn doc_date_is_reformatted() {
        let (_dir, mut ctx) = ctx_with_board();
        ctx.globals.date_format = "%d-%m-%Y".to_string();
        let name = expand_filename(&mut ctx, "%d", "", "", "", true).unwrap();
        assert_eq!(name, "01-03-2022");
    }

    #[test]
    fn layer_groups_resolve_from_board() {
        let (_dir, mut ctx) = ctx_with_board();
        let copper = LayerSelection::Group("copper".to_string())
            .resolve(&mut ctx)
            .unwrap();
        assert_eq!(copper, vec!["F.Cu".to_string(), "B.Cu".to_string()]);
        let all = LayerSelection::default().resolve(&mut ctx).unwrap();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn unknown_layer_is_rejected() {
        let (_dir, mut ctx) = ctx_with_board();
        let sel = LayerSelection::List(vec![LayerEntry::Name("In7.Cu".to_string())]);
        assert!(sel.resolve(&mut ctx).is_err());
    }

    #[test]
    fn filter_board_without_variant_uses_original() {
        let (_dir, mut ctx) = ctx_with_board();
        let work = filter_board(&mut ctx, "", false).unwrap();
        assert_eq!(work.path, ctx.pcb_file.clone().unwrap());
    }

    #[test]
    fn filter_board_with_title_makes_a_copy() {
        let (_dir, mut ctx) = ctx_with_board();
        let work = filter_board(&mut ctx, "+ (draft)", false).unwrap();
        assert_ne!(work.path, ctx.pcb_file.clone().unwrap());
        let text = fs::read_to_string(&work.path).unwrap();
        assert!(text.contains("Video board (draft)"));
        // A project file was placed next to the copy.
        assert!(work.path.with_extension("kicad_pro").exists());
    }
}
