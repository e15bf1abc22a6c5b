//! Per-run project state.
//!
//! One `Context` is built in `main` and passed by reference to everything
//! else: paths, resolved global options, the run timestamp, and the lazily
//! loaded board/schematic. This replaces the shared singleton a script would
//! use; there is exactly one instance and no global mutable state.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::PlotError;
use crate::global::GlobalOptions;
use crate::kicad::{Board, Schematic};
use crate::variant::Variant;

/// Extension of KiCad 6 project files.
pub const PRO_EXT: &str = "kicad_pro";

/// Project state for one run.
#[derive(Debug)]
pub struct Context {
    /// The board file, when one was given.
    pub pcb_file: Option<PathBuf>,
    /// The schematic file, when one was given.
    pub sch_file: Option<PathBuf>,
    /// Base output directory.
    pub out_dir: PathBuf,
    /// Whether `out_dir` came from the command line (a config `out_dir`
    /// never overrides an explicit `-d`).
    pub out_dir_from_cli: bool,
    /// Debug verbosity (the `-v` count).
    pub debug_level: u8,
    /// When this run started; used for `%D`/`%T` expansion.
    pub now: DateTime<Local>,
    /// Resolved global options.
    pub globals: GlobalOptions,
    /// The globally selected variant, already resolved by the config reader.
    pub variant: Option<Variant>,
    /// Set by the `check_zone_fills` preflight, consumed by the PCB print
    /// outputs (adds `-f` to the export invocations).
    pub check_zone_fills: bool,

    board: Option<Board>,
    sch: Option<Schematic>,
}

impl Context {
    /// Builds a context; board/schematic stay unloaded until needed.
    #[must_use]
    pub fn new(
        pcb_file: Option<PathBuf>,
        sch_file: Option<PathBuf>,
        out_dir: PathBuf,
        out_dir_from_cli: bool,
        debug_level: u8,
    ) -> Self {
        Self {
            pcb_file,
            sch_file,
            out_dir,
            out_dir_from_cli,
            debug_level,
            now: Local::now(),
            globals: GlobalOptions::default(),
            variant: None,
            check_zone_fills: false,
            board: None,
            sch: None,
        }
    }

    /// The board path, or the error that aborts outputs needing one.
    pub fn check_pcb(&self) -> Result<&Path, PlotError> {
        match &self.pcb_file {
            Some(p) if p.is_file() => Ok(p),
            _ => Err(PlotError::NoPcbFile),
        }
    }

    /// The schematic path, or the error that aborts outputs needing one.
    pub fn check_sch(&self) -> Result<&Path, PlotError> {
        match &self.sch_file {
            Some(p) if p.is_file() => Ok(p),
            _ => Err(PlotError::NoSchFile),
        }
    }

    /// Loads the board on first use.
    pub fn board(&mut self) -> Result<&Board, PlotError> {
        if self.board.is_none() {
            let path = self.check_pcb()?.to_path_buf();
            debug!("Loading board `{}`", path.display());
            self.board = Some(Board::load(&path)?);
            self.apply_forced_units();
            debug!("Board loaded");
        }
        Ok(self.board.as_ref().unwrap())
    }

    /// Patches dimensions in automatic units mode to the globally forced
    /// units. Runs when the board loads and again once the globals are
    /// resolved; the stack-up read can load the board before that.
    pub fn apply_forced_units(&mut self) {
        let Some(units) = self.globals.units else {
            return;
        };
        if let Some(board) = self.board.as_mut() {
            let patched = board.force_dimension_units(units.dimension_mode());
            if patched > 0 {
                debug!("Forced units on {patched} dimension(s)");
            }
        }
    }

    /// Loads the schematic on first use.
    pub fn schematic(&mut self) -> Result<&Schematic, PlotError> {
        if self.sch.is_none() {
            let path = self.check_sch()?.to_path_buf();
            debug!("Loading schematic `{}`", path.display());
            self.sch = Some(Schematic::load(&path)?);
        }
        Ok(self.sch.as_ref().unwrap())
    }

    /// File stem of the board (`video` for `work/video.kicad_pcb`).
    #[must_use]
    pub fn pcb_basename(&self) -> String {
        stem_of(self.pcb_file.as_deref())
    }

    /// File stem of the schematic.
    #[must_use]
    pub fn sch_basename(&self) -> String {
        stem_of(self.sch_file.as_deref())
    }

    /// The project file next to the board (or schematic), if any exists.
    #[must_use]
    pub fn pro_file(&self) -> Option<PathBuf> {
        let source = self.pcb_file.as_deref().or(self.sch_file.as_deref())?;
        let pro = source.with_extension(PRO_EXT);
        pro.is_file().then_some(pro)
    }

    /// File id of the selected variant (`%v` expansion), empty without one.
    #[must_use]
    pub fn variant_file_id(&self) -> &str {
        self.variant.as_ref().map_or("", |v| v.file_id.as_str())
    }

    /// Name of the selected variant (`%V` expansion), empty without one.
    #[must_use]
    pub fn variant_name(&self) -> &str {
        self.variant.as_ref().map_or("", |v| v.name.as_str())
    }

    /// Creates a `file-bak` backup before a file is rewritten in place.
    pub fn make_backup(path: &Path) -> Result<(), PlotError> {
        let mut bkp = path.as_os_str().to_owned();
        bkp.push("-bak");
        debug!("Creating backup `{}`", PathBuf::from(&bkp).display());
        fs::copy(path, PathBuf::from(bkp))
            .map(|_| ())
            .map_err(|e| PlotError::io(format!("backing up `{}`", path.display()), e))
    }
}

fn stem_of(path: Option<&Path>) -> String {
    path.and_then(Path::file_stem)
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
