//! kiforge: KiCad automation from a YAML file.
//!
//! Reads the project's config, runs the preflights and generates the
//! requested outputs through the KiAuto tools.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use kiforge::config::{self, Config};
use kiforge::context::Context;
use kiforge::error::Error;
use kiforge::{makefile, plot};

/// KiCad automation: generate documentation and fabrication outputs from a
/// YAML config.
#[derive(Parser, Debug)]
#[command(name = "kiforge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Outputs to generate (all `run_by_default` ones when empty)
    #[arg(value_name = "TARGET")]
    targets: Vec<String>,

    /// The PCB file (detected in the working dir when omitted)
    #[arg(short = 'b', long, value_name = "PCB_FILE")]
    board_file: Option<PathBuf>,

    /// The schematic file (detected in the working dir when omitted)
    #[arg(short = 'e', long, value_name = "SCH_FILE")]
    schematic: Option<PathBuf>,

    /// The config file (a single *.kiforge.yaml is found automatically)
    #[arg(short = 'c', long, value_name = "CONFIG")]
    plot_config: Option<PathBuf>,

    /// Base output directory
    #[arg(short = 'd', long = "out-dir", value_name = "OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Skip preflights; use `all` or a comma separated list
    #[arg(short = 's', long = "skip-pre", value_name = "PRE")]
    skip_pre: Vec<String>,

    /// Generate the outputs NOT listed as targets
    #[arg(short = 'i', long = "invert-sel")]
    invert_sel: bool,

    /// List the available outputs and exit
    #[arg(short = 'l', long)]
    list: bool,

    /// Generate a Makefile driving the outputs and exit
    #[arg(short = 'm', long, value_name = "MAKEFILE")]
    makefile: Option<PathBuf>,

    /// Override a global option (KEY=VALUE, can be repeated)
    #[arg(long = "global-redef", value_name = "KEY=VALUE")]
    global_redef: Vec<String>,

    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from the CLI arguments.
fn get_log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Finds the single file with the given extension in `dir`, if any.
fn detect_file(dir: &Path, ext: &str) -> Option<PathBuf> {
    let pattern = dir.join(format!("*.{ext}")).to_string_lossy().into_owned();
    let mut found: Vec<PathBuf> = glob::glob(&pattern).ok()?.flatten().collect();
    if found.len() == 1 {
        let file = found.remove(0);
        info!("Using {ext} file: {}", file.display());
        Some(file)
    } else {
        None
    }
}

fn run(args: Args) -> Result<(), Error> {
    let cwd = std::env::current_dir()
        .map_err(|e| kiforge::error::PlotError::io("getting working dir", e))?;
    let cfg_path = config::find_config(args.plot_config.as_deref(), &cwd)?;
    let config = Config::load(&cfg_path)?;
    let board_file = args.board_file.or_else(|| detect_file(&cwd, "kicad_pcb"));
    let sch_file = args.schematic.or_else(|| detect_file(&cwd, "kicad_sch"));
    let out_dir_from_cli = args.out_dir.is_some();
    let mut ctx = Context::new(
        board_file,
        sch_file,
        args.out_dir.unwrap_or_else(|| PathBuf::from(".")),
        out_dir_from_cli,
        args.verbose,
    );
    plot::setup_context(&mut ctx, &config, &args.global_redef)?;
    if args.list {
        plot::list_outputs(&config);
        return Ok(());
    }
    if let Some(makefile_path) = &args.makefile {
        return makefile::generate_makefile(makefile_path, &cfg_path, &mut ctx, &config);
    }
    plot::generate_outputs(
        &mut ctx,
        &config,
        &args.targets,
        args.invert_sel,
        &args.skip_pre,
    )
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(get_log_level(args.verbose, args.quiet));

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut source = std::error::Error::source(&e);
            while let Some(inner) = source {
                error!("  caused by: {inner}");
                source = inner.source();
            }
            ExitCode::from(e.exit_code())
        }
    }
}
