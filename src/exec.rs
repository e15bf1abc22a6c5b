//! External tool invocation (the KiAuto wrappers).
//!
//! `pcbnew_do` and `eeschema_do` automate a GUI, so invocations are flaky by
//! nature: tools are probed for a minimum version, failed runs with a sane
//! exit code are retried once, and the stderr stream is scanned to relay the
//! tool's own ERROR/WARNING messages through our logger. A detected time-out
//! gets a hint about the `kiauto_*` global options.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::Command;

use regex::Regex;
use tracing::{debug, error, warn};

use crate::error::PlotError;
use crate::global::GlobalOptions;

/// Where to get the KiAuto tools.
pub const URL_KIAUTO: &str = "https://github.com/INTI-CMNB/KiAuto";
/// The pcbnew automation front-end.
pub const CMD_PCBNEW_DO: &str = "pcbnew_do";
/// The eeschema automation front-end.
pub const CMD_EESCHEMA_DO: &str = "eeschema_do";

/// Runs external tools with the retry/relay policy described above.
#[derive(Debug)]
pub struct Runner {
    versions: HashMap<String, (u32, u32, u32)>,
    wait_start: u32,
    time_out_scale: f64,
    debug_level: u8,
    record: bool,
}

impl Runner {
    /// Builds a runner from the resolved globals and the debug level.
    #[must_use]
    pub fn new(globals: &GlobalOptions, debug_level: u8) -> Self {
        // Forcing record on GitLab CI/CD, so failed pipelines keep evidence.
        let is_gitlab_ci = env::var_os("GITLAB_CI").is_some();
        Self {
            versions: HashMap::new(),
            wait_start: globals.kiauto_wait_start,
            time_out_scale: globals.kiauto_time_out_scale,
            debug_level,
            record: debug_level > 0 || is_gitlab_ci,
        }
    }

    /// Whether the KiAuto screencast should be deleted after a run.
    #[must_use]
    pub fn video_remove(&self) -> bool {
        self.debug_level == 0 && env::var_os("GITLAB_CI").is_some()
    }

    /// Checks a command is installed and recent enough.
    pub fn check_tool(
        &mut self,
        cmd: &str,
        url: &str,
        min_version: Option<&str>,
    ) -> Result<(), PlotError> {
        if which(cmd).is_none() {
            return Err(PlotError::MissingTool {
                tool: cmd.to_string(),
                url: url.to_string(),
            });
        }
        if let Some(min) = min_version {
            self.check_version(cmd, min)?;
        }
        Ok(())
    }

    fn check_version(&mut self, cmd: &str, min: &str) -> Result<(), PlotError> {
        if self.versions.contains_key(cmd) {
            return Ok(());
        }
        debug!("Running: {cmd} --version");
        let output = Command::new(cmd)
            .arg("--version")
            .output()
            .map_err(|e| PlotError::io(format!("running `{cmd} --version`"), e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let found = extract_version(cmd, &stdout).ok_or_else(|| PlotError::Plot(format!(
            "unable to determine {cmd} version:\n{stdout}"
        )))?;
        let needed = parse_version(min).unwrap_or((0, 0, 0));
        if found < needed {
            return Err(PlotError::ToolTooOld {
                tool: cmd.to_string(),
                found: format!("{}.{}.{}", found.0, found.1, found.2),
                needed: min.to_string(),
            });
        }
        self.versions.insert(cmd.to_string(), found);
        Ok(())
    }

    /// Inserts the KiAuto options right after the command name (before the
    /// subcommand), mirroring what the tools expect. Returns true when a
    /// screencast will be recorded that should be removed afterwards.
    pub fn add_extra_options(&self, cmd: &mut Vec<String>) -> bool {
        if self.debug_level > 0 {
            cmd.insert(1, format!("-{}", "v".repeat(self.debug_level as usize)));
        }
        if self.record {
            cmd.insert(1, "-r".to_string());
        }
        if self.time_out_scale > 0.0 {
            cmd.insert(1, self.time_out_scale.to_string());
            cmd.insert(1, "--time_out_scale".to_string());
        }
        if self.wait_start > 0 {
            cmd.insert(1, self.wait_start.to_string());
            cmd.insert(1, "--wait_start".to_string());
        }
        self.video_remove()
    }

    /// Runs a command, retrying once on exit codes that look like flaky GUI
    /// automation failures (1..127).
    pub fn exec_with_retry(&self, cmd: &[String], exit: u8) -> Result<(), PlotError> {
        debug!("Executing: {cmd:?}");
        if self.debug_level > 2 {
            debug!("Command line: {}", cmd.join(" "));
        }
        let mut retry = 2;
        loop {
            let output = Command::new(&cmd[0])
                .args(&cmd[1..])
                .output()
                .map_err(|e| PlotError::io(format!("running `{}`", cmd[0]), e))?;
            let ret = output.status.code().unwrap_or(-1);
            retry -= 1;
            if ret > 0 && ret < 128 && retry > 0 {
                debug!("Failed with error {ret}, retrying ...");
                continue;
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            relay_tool_messages(&stderr);
            debug!("Output from command:\n> {}", stderr.replace('\n', "\n> "));
            if stderr.contains("Timed out") {
                warn!("Time out detected, on slow machines or complex projects try:");
                warn!("`kiauto_time_out_scale` and/or `kiauto_wait_start` global options");
            }
            if ret == 0 {
                return Ok(());
            }
            return Err(PlotError::ToolFailed {
                tool: cmd[0].clone(),
                code: ret,
                exit,
            });
        }
    }
}

/// Finds a command on `PATH`.
#[must_use]
pub fn which(cmd: &str) -> Option<PathBuf> {
    let cmd_path = PathBuf::from(cmd);
    if cmd_path.components().count() > 1 {
        return cmd_path.is_file().then_some(cmd_path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| candidate.is_file())
}

/// Relays `ERROR:`/`WARNING:` blocks from a tool's stderr through our
/// logger. Indented lines continue the previous message.
fn relay_tool_messages(text: &str) {
    enum State {
        Idle,
        Error(String),
        Warning(String),
    }
    let mut state = State::Idle;
    let flush = |state: &mut State| match std::mem::replace(state, State::Idle) {
        State::Error(msg) => error!("{}", msg.trim_end()),
        State::Warning(msg) => warn!("{}", msg.trim_end()),
        State::Idle => {}
    };
    for line in text.lines() {
        if line.starts_with(' ') {
            match &mut state {
                State::Error(msg) | State::Warning(msg) => {
                    msg.push('\n');
                    msg.push_str(line);
                    continue;
                }
                State::Idle => {}
            }
        } else {
            flush(&mut state);
        }
        if let Some(rest) = line.strip_prefix("ERROR:") {
            state = State::Error(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("WARNING:") {
            state = State::Warning(rest.to_string());
        }
    }
    flush(&mut state);
}

fn extract_version(cmd: &str, stdout: &str) -> Option<(u32, u32, u32)> {
    let base = PathBuf::from(cmd);
    let base = base.file_name().map_or_else(
        || cmd.to_string(),
        |s| s.to_string_lossy().into_owned(),
    );
    let direct = Regex::new(&format!(
        r"(?i)^{} (\d+\.\d+\.\d+)",
        regex::escape(&base)
    ))
    .ok()?;
    let version = direct
        .captures(stdout)
        .or_else(|| {
            Regex::new(r"(?i)Version: (\d+\.\d+\.\d+)")
                .ok()
                .and_then(|re| re.captures(stdout))
        })
        .map(|c| c[1].to_string())?;
    parse_version(&version)
}

fn parse_version(text: &str) -> Option<(u32, u32, u32)> {
    let mut parts = text.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_extraction_direct_format() {
        let v = extract_version("pcbnew_do", "pcbnew_do 1.6.7 - pcbnew automation\n");
        assert_eq!(v, Some((1, 6, 7)));
    }

    #[test]
    fn version_extraction_generic_format() {
        let v = extract_version("eeschema_do", "KiAuto\nVersion: 2.0.0\n");
        assert_eq!(v, Some((2, 0, 0)));
    }

    #[test]
    fn version_extraction_uses_basename() {
        let v = extract_version("/usr/local/bin/pcbnew_do", "pcbnew_do 1.6.7\n");
        assert_eq!(v, Some((1, 6, 7)));
    }

    #[test]
    fn version_compare_is_numeric() {
        assert!(parse_version("1.10.0").unwrap() > parse_version("1.6.7").unwrap());
    }

    #[test]
    fn extra_options_inserted_after_command() {
        let globals = GlobalOptions {
            kiauto_wait_start: 30,
            kiauto_time_out_scale: 2.0,
            ..GlobalOptions::default()
        };
        let runner = Runner::new(&globals, 0);
        let mut cmd: Vec<String> = ["pcbnew_do", "export", "x"]
            .into_iter()
            .map(String::from)
            .collect();
        runner.add_extra_options(&mut cmd);
        assert_eq!(cmd[0], "pcbnew_do");
        assert_eq!(cmd[1], "--wait_start");
        assert_eq!(cmd[2], "30");
        assert_eq!(cmd[3], "--time_out_scale");
        assert_eq!(cmd[4], "2");
        assert_eq!(cmd[5], "export");
    }

    #[test]
    fn missing_tool_error() {
        let mut runner = Runner::new(&GlobalOptions::default(), 0);
        let err = runner
            .check_tool("definitely-not-a-real-tool-name", URL_KIAUTO, None)
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::MISSING_TOOL);
    }
}
