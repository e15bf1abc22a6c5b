//! Shared harness for the CLI integration tests.
//!
//! Each test gets a sandbox directory holding a small project (board,
//! schematic, config) plus a `bin/` directory placed first on `PATH` where
//! fake `pcbnew_do`/`eeschema_do` scripts live. The fakes record their
//! command line and fabricate the files the real tools would produce, so
//! the tests check the exact invocations without KiCad installed.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

pub const PCB: &str = r#"(kicad_pcb (version 20211014) (generator pcbnew)
  (layers (0 "F.Cu" signal) (31 "B.Cu" signal) (36 "B.SilkS" user) (37 "F.SilkS" user)
    (36 "B.Fab" user) (37 "F.Fab" user) (44 "Edge.Cuts" user))
  (setup (stackup
    (layer "F.Cu" (type "copper") (thickness 0.035))
    (layer "dielectric 1" (type "core") (thickness 1.51) (material "FR4"))
    (layer "B.Cu" (type "copper") (thickness 0.035))
    (copper_finish "ENIG")
  ))
  (title_block (title "Video board") (date "2022-03-01") (rev "C") (company "ACME"))
  (net 0 "") (net 1 "GND") (net 2 "+5V")
  (gr_rect (start 0 0) (end 20 10) (layer "Edge.Cuts") (width 0.1))
  (footprint "Resistor_SMD:R_0805" (layer "F.Cu")
    (at 5 5)
    (fp_text reference "R1" (at 0 -2) (layer "F.SilkS"))
    (fp_text value "10K" (at 0 2) (layer "F.Fab"))
    (pad "1" smd rect (at -1 0) (size 1 1) (layers "F.Cu" "F.Paste" "F.Mask") (net 1 "GND"))
    (pad "2" smd rect (at 1 0) (size 1 1) (layers "F.Cu" "F.Paste" "F.Mask") (net 2 "+5V"))
  )
  (footprint "TestPoint:TP" (layer "F.Cu")
    (at 15 5)
    (fp_text reference "TP1" (at 0 -1) (layer "F.SilkS"))
    (pad "1" smd circle (at 0 0) (size 1 1) (layers "F.Cu" "F.Mask") (net 1 "GND"))
  )
)
"#;

pub const SCH: &str = r#"(kicad_sch (version 20211123) (generator eeschema)
  (title_block (title "Video board") (rev "C"))
  (symbol (lib_id "Device:R") (at 50 50 0) (in_bom yes) (on_board yes)
    (property "Reference" "R1" (at 50 48 0))
    (property "Value" "10K" (at 50 52 0))
  )
  (symbol (lib_id "Connector:TestPoint") (at 60 50 0) (in_bom yes) (on_board yes)
    (property "Reference" "TP1" (at 60 48 0))
    (property "Value" "TP" (at 60 52 0))
  )
)
"#;

pub struct Sandbox {
    dir: tempfile::TempDir,
    bin: PathBuf,
}

impl Sandbox {
    /// Creates an empty sandbox with a `bin/` dir for fake tools.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("sandbox dir");
        let bin = dir.path().join("bin");
        fs::create_dir(&bin).expect("bin dir");
        Self { dir, bin }
    }

    /// Creates a sandbox holding the standard small project.
    pub fn with_project(config: &str) -> Self {
        let sandbox = Self::new();
        sandbox.write("video.kicad_pcb", PCB);
        sandbox.write("video.kicad_sch", SCH);
        sandbox.write("video.kiforge.yaml", config);
        sandbox
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file inside the sandbox and returns its path.
    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.dir.path().join(name)).expect("read file")
    }

    pub fn exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Installs a fake KiAuto-style tool. It answers `--version`, appends its
    /// arguments to `<name>.calls`, and creates the file the real tool would:
    /// `--output_name` after a `*.kicad_pcb` argument for `pcbnew_do`-style
    /// tools, `<schematic stem>.pdf` for `eeschema_do`-style ones. With `-r`
    /// it also drops the screencast file the real tools record.
    #[cfg(unix)]
    pub fn install_fake_tool(&self, name: &str, version: &str) {
        use std::os::unix::fs::PermissionsExt;

        let calls = self.dir.path().join(format!("{name}.calls"));
        let script = format!(
            r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "{name} {version}"
  exit 0
fi
printf '%s\n' "$*" >> "{calls}"
out=""
dir=""
sch=""
rec=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--output_name" ]; then out="$a"; fi
  case "$prev" in
    *.kicad_pcb) dir="$a" ;;
    *.kicad_sch) dir="$a" ;;
  esac
  case "$a" in
    *.kicad_sch) sch="$a" ;;
    -r) rec=1 ;;
  esac
  prev="$a"
done
if [ -n "$sch" ] && [ -n "$dir" ]; then
  base=$(basename "$sch" .kicad_sch)
  echo "%PDF-fake" > "$dir/$base.pdf"
  if [ -n "$rec" ]; then echo "ogv" > "$dir/export_eeschema_screencast.ogv"; fi
elif [ -n "$dir" ] && [ -n "$out" ]; then
  case "$out" in
    *.svg)
      printf '<svg xmlns="http://www.w3.org/2000/svg" width="21.0cm" height="29.7cm" viewBox="0 0 210 297">\n<rect x="0" y="0" width="210" height="297"/>\n</svg>\n' > "$dir/$out"
      ;;
    *)
      echo "%PDF-fake" > "$dir/$out"
      ;;
  esac
  if [ -n "$rec" ]; then echo "ogv" > "$dir/pcbnew_export_screencast.ogv"; fi
fi
exit 0
"#,
            calls = calls.display()
        );
        let path = self.bin.join(name);
        fs::write(&path, script).expect("write fake tool");
        let mut perms = fs::metadata(&path).expect("tool metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod fake tool");
    }

    /// The recorded command lines of a fake tool, one per invocation.
    pub fn calls(&self, name: &str) -> Vec<String> {
        let path = self.dir.path().join(format!("{name}.calls"));
        fs::read_to_string(path)
            .map(|t| t.lines().map(String::from).collect())
            .unwrap_or_default()
    }

    /// A command running the binary inside the sandbox, fake tools first on
    /// the PATH.
    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_kiforge"));
        cmd.current_dir(self.dir.path());
        // A CI environment would force screencast recording on.
        cmd.env_remove("GITLAB_CI");
        let path = std::env::var("PATH").unwrap_or_default();
        cmd.env(
            "PATH",
            format!("{}:{path}", self.bin.display()),
        );
        cmd
    }
}

/// Runs the command and returns (exit code, stderr).
pub fn run(cmd: &mut Command) -> (i32, String) {
    let output = cmd.output().expect("run kiforge");
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}
