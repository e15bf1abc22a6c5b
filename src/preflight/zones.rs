//! Zone filling, delegated to `pcbnew_do`.
//!
//! Refilling the copper zones needs the real pcbnew engine, so the board is
//! backed up and `pcbnew_do run_drc --save` does the work: it refills before
//! checking and `--save` writes the result back to the board file.

use tracing::debug;

use crate::context::Context;
use crate::error::{PlotError, PLOT_ERROR};
use crate::exec::{Runner, CMD_PCBNEW_DO, URL_KIAUTO};

/// Minimum KiAuto whose `run_drc` refills and saves on KiCad 6.
const MIN_PCBNEW_DO: &str = "1.6.7";

/// Fills the board zones in place.
pub fn fill_zones(ctx: &mut Context, runner: &mut Runner) -> Result<(), PlotError> {
    runner.check_tool(CMD_PCBNEW_DO, URL_KIAUTO, Some(MIN_PCBNEW_DO))?;
    let pcb = ctx.check_pcb()?.to_path_buf();
    Context::make_backup(&pcb)?;
    debug!("Filling zones of `{}`", pcb.display());
    let mut cmd = vec![
        CMD_PCBNEW_DO.to_string(),
        "run_drc".to_string(),
        "--save".to_string(),
    ];
    runner.add_extra_options(&mut cmd);
    cmd.push(pcb.to_string_lossy().into_owned());
    cmd.push(ctx.out_dir.to_string_lossy().into_owned());
    runner.exec_with_retry(&cmd, PLOT_ERROR)
}
