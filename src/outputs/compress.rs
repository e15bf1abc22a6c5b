//! Archives of generated files (`compress` output).
//!
//! File lists can name other outputs (`from_output`), glob the destination
//! tree, or glob the project directory (`from_cwd`). ZIP archives are written
//! natively; TAR and RAR are delegated to the system tools.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::context::Context;
use crate::error::PlotError;
use crate::exec::Runner;
use crate::outputs::{expand_filename, Output};

/// `%i` value for this output.
const ID: &str = "compress";

/// Archive container formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Zip,
    Tar,
    Rar,
}

/// ZIP entry compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Let the writer choose (deflate).
    #[default]
    Auto,
    Stored,
    Deflated,
}

/// One entry of the `files` list.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilesList {
    /// Glob pattern for the files, relative to the destination dir (or the
    /// working dir with `from_cwd`).
    pub source: String,
    /// Glob relative to the working directory instead of the destination.
    pub from_cwd: bool,
    /// Take the files generated by this output instead of globbing.
    pub from_output: String,
    /// Regular expression the archived names must match.
    pub filter: String,
    /// Directory inside the archive, empty keeps the relative path.
    pub dest: String,
}

impl Default for FilesList {
    fn default() -> Self {
        Self {
            source: "*".to_string(),
            from_cwd: false,
            from_output: String::new(),
            filter: ".*".to_string(),
            dest: String::new(),
        }
    }
}

/// Options of the `compress` output.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressOptions {
    /// Output file name pattern; empty means the global default.
    pub output: String,
    /// Container format.
    pub format: Format,
    /// ZIP entry compression.
    pub compression: Compression,
    /// What goes into the archive.
    pub files: Vec<FilesList>,
}

impl CompressOptions {
    fn extension(&self) -> &'static str {
        match self.format {
            Format::Zip => "zip",
            Format::Tar => "tar.gz",
            Format::Rar => "rar",
        }
    }

    /// Names of the outputs consumed through `from_output`.
    #[must_use]
    pub fn dependencies(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|f| !f.from_output.is_empty())
            .map(|f| f.from_output.clone())
            .collect()
    }

    /// The archive this output will generate.
    pub fn targets(
        &self,
        ctx: &mut Context,
        out: &Output,
        dir: &Path,
        _all: &[Output],
    ) -> Result<Vec<PathBuf>, PlotError> {
        let pattern = if self.output.is_empty() {
            ctx.globals.output.clone()
        } else {
            self.output.clone()
        };
        let name = expand_filename(ctx, &pattern, ID, self.extension(), &out.output_id, true)?;
        Ok(vec![dir.join(name)])
    }

    /// Collects the files to archive as (on disk, inside the archive) pairs.
    fn collect(
        &self,
        ctx: &mut Context,
        all: &[Output],
        target: &Path,
    ) -> Result<Vec<(PathBuf, PathBuf)>, PlotError> {
        let out_dir = ctx.out_dir.clone();
        let mut result = Vec::new();
        for entry in &self.files {
            let filter = Regex::new(&entry.filter).map_err(|e| {
                PlotError::Plot(format!("bad `filter` expression `{}`: {e}", entry.filter))
            })?;
            let mut found = Vec::new();
            if entry.from_output.is_empty() {
                let base = if entry.from_cwd {
                    env::current_dir().map_err(|e| PlotError::io("getting working dir", e))?
                } else {
                    out_dir.clone()
                };
                let pattern = base.join(&entry.source).to_string_lossy().into_owned();
                debug!("Searching: {pattern}");
                let paths = glob::glob(&pattern)
                    .map_err(|e| PlotError::Plot(format!("bad `source` pattern: {e}")))?;
                for path in paths.flatten() {
                    gather(&path, &base, &mut found);
                }
            } else {
                let dep = all
                    .iter()
                    .find(|o| o.name == entry.from_output)
                    .ok_or_else(|| {
                        PlotError::Plot(format!(
                            "unknown output `{}` in `from_output`",
                            entry.from_output
                        ))
                    })?;
                for path in dep.targets(ctx, all)? {
                    if !path.is_file() {
                        // The dependency already ran, so a missing target
                        // means something is broken.
                        return Err(PlotError::Internal(format!(
                            "`{}` was not generated by `{}`",
                            path.display(),
                            dep.name
                        )));
                    }
                    let name = path
                        .strip_prefix(&out_dir)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| {
                            PathBuf::from(path.file_name().unwrap_or_default())
                        });
                    found.push((path, name));
                }
            }
            for (path, mut name) in found {
                if path == target {
                    // The archive never contains itself.
                    continue;
                }
                if !entry.dest.is_empty() {
                    name = Path::new(&entry.dest)
                        .join(name.file_name().unwrap_or_default());
                }
                if filter.is_match(&name.to_string_lossy()) {
                    result.push((path, name));
                }
            }
        }
        Ok(result)
    }

    /// Generates the archive.
    pub fn run(
        &self,
        ctx: &mut Context,
        runner: &mut Runner,
        out: &Output,
        dir: &Path,
        all: &[Output],
    ) -> Result<(), PlotError> {
        let target = self.targets(ctx, out, dir, all)?.remove(0);
        let files = self.collect(ctx, all, &target)?;
        debug!("Archiving {} file/s into `{}`", files.len(), target.display());
        match self.format {
            Format::Zip => self.create_zip(&target, &files),
            Format::Tar => create_tar(runner, &target, &files),
            Format::Rar => create_rar(runner, &target, &files),
        }
    }

    fn create_zip(&self, target: &Path, files: &[(PathBuf, PathBuf)]) -> Result<(), PlotError> {
        let method = match self.compression {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Auto | Compression::Deflated => CompressionMethod::Deflated,
        };
        let options = SimpleFileOptions::default().compression_method(method);
        let file = fs::File::create(target)
            .map_err(|e| PlotError::io(format!("creating `{}`", target.display()), e))?;
        let mut archive = zip::ZipWriter::new(file);
        for (path, name) in files {
            let name = name.to_string_lossy().replace('\\', "/");
            archive
                .start_file(name, options)
                .map_err(|e| PlotError::Plot(format!("writing ZIP entry: {e}")))?;
            let mut source = fs::File::open(path)
                .map_err(|e| PlotError::io(format!("reading `{}`", path.display()), e))?;
            io::copy(&mut source, &mut archive)
                .map_err(|e| PlotError::io(format!("compressing `{}`", path.display()), e))?;
        }
        archive
            .finish()
            .map(|_| ())
            .map_err(|e| PlotError::Plot(format!("finishing ZIP: {e}")))
    }
}

/// Files land in a staging dir under their archive names, then one `tar`
/// invocation packs the whole tree.
fn create_tar(
    runner: &mut Runner,
    target: &Path,
    files: &[(PathBuf, PathBuf)],
) -> Result<(), PlotError> {
    runner.check_tool("tar", "https://www.gnu.org/software/tar/", None)?;
    let staging = tempfile::tempdir().map_err(|e| PlotError::io("creating staging dir", e))?;
    for (path, name) in files {
        let dest = staging.path().join(name);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| PlotError::io("creating staging dir", e))?;
        }
        fs::copy(path, &dest)
            .map_err(|e| PlotError::io(format!("staging `{}`", path.display()), e))?;
    }
    let cmd = vec![
        "tar".to_string(),
        "czf".to_string(),
        target.to_string_lossy().into_owned(),
        "-C".to_string(),
        staging.path().to_string_lossy().into_owned(),
        ".".to_string(),
    ];
    runner.exec_with_retry(&cmd, crate::error::PLOT_ERROR)
}

fn create_rar(
    runner: &mut Runner,
    target: &Path,
    files: &[(PathBuf, PathBuf)],
) -> Result<(), PlotError> {
    runner.check_tool("rar", "https://www.rarlab.com/", None)?;
    for (path, name) in files {
        let mut cmd = vec!["rar".to_string(), "a".to_string(), "-m5".to_string()];
        // -ap sets the path of the entry inside the archive
        if let Some(parent) = name.parent().filter(|p| !p.as_os_str().is_empty()) {
            cmd.push(format!("-ap{}", parent.display()));
        }
        cmd.push("-ep".to_string());
        cmd.push(target.to_string_lossy().into_owned());
        cmd.push(path.to_string_lossy().into_owned());
        runner.exec_with_retry(&cmd, crate::error::PLOT_ERROR)?;
    }
    Ok(())
}

/// Expands directories into their files, names relative to `base`.
fn gather(path: &Path, base: &Path, found: &mut Vec<(PathBuf, PathBuf)>) {
    if path.is_dir() {
        if let Ok(entries) = fs::read_dir(path) {
            for entry in entries.flatten() {
                gather(&entry.path(), base, found);
            }
        }
        return;
    }
    let name = path
        .strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()));
    found.push((path.to_path_buf(), name));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o: CompressOptions = serde_yaml::from_str("{}").unwrap();
        assert_eq!(o.format, Format::Zip);
        assert_eq!(o.compression, Compression::Auto);
        assert_eq!(o.extension(), "zip");
        assert!(o.files.is_empty());
    }

    #[test]
    fn files_list_parsing() {
        let o: CompressOptions = serde_yaml::from_str(
            "format: tar\nfiles:\n- from_output: prints\n  dest: docs\n- source: '*.brd'\n",
        )
        .unwrap();
        assert_eq!(o.extension(), "tar.gz");
        assert_eq!(o.files.len(), 2);
        assert_eq!(o.dependencies(), vec!["prints".to_string()]);
        assert_eq!(o.files[1].source, "*.brd");
        assert_eq!(o.files[1].filter, ".*");
    }

    #[test]
    fn gather_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("a.txt"), "a").unwrap();
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        let mut found = Vec::new();
        gather(dir.path(), dir.path(), &mut found);
        let mut names: Vec<String> = found
            .iter()
            .map(|(_, n)| n.to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["b.txt".to_string(), "sub/a.txt".to_string()]);
    }

    #[test]
    fn missing_dependency_target_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(
            Some(dir.path().join("video.kicad_pcb")),
            None,
            dir.path().to_path_buf(),
            true,
            0,
        );
        let empty = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        let view = Output::from_config(
            "view".to_string(),
            String::new(),
            "boardview",
            String::new(),
            true,
            String::new(),
            empty,
        )
        .unwrap();
        let o: CompressOptions = serde_yaml::from_str("files:\n- from_output: view\n").unwrap();
        let err = o
            .collect(&mut ctx, &[view], Path::new("out.zip"))
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::INTERNAL_ERROR);
    }

    #[test]
    fn zip_contains_the_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("doc.txt");
        fs::write(&src, "hello").unwrap();
        let target = dir.path().join("out.zip");
        let o = CompressOptions::default();
        o.create_zip(&target, &[(src, PathBuf::from("docs/doc.txt"))])
            .unwrap();
        let mut archive = zip::ZipArchive::new(fs::File::open(&target).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        assert!(archive.by_name("docs/doc.txt").is_ok());
    }
}
