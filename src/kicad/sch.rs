//! Read/patch access to `.kicad_sch` files.
//!
//! Variant generation marks not-fitted symbols as DNP (do not populate) and
//! excludes them from the BOM, then saves the patched copy next to the
//! hierarchical sub-sheets it references so `eeschema_do` can resolve them.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::PlotError;
use crate::kicad::board::TitleBlock;
use crate::kicad::sexpr::Sexpr;

/// A parsed schematic document.
#[derive(Debug, Clone)]
pub struct Schematic {
    doc: Sexpr,
    path: PathBuf,
}

fn symbol_reference(node: &Sexpr) -> Option<&str> {
    for prop in node.find_all("property") {
        if prop.items().get(1).and_then(Sexpr::atom) == Some("Reference") {
            return prop.items().get(2).and_then(Sexpr::atom);
        }
    }
    None
}

impl Schematic {
    /// Loads and parses a schematic file.
    pub fn load(path: &Path) -> Result<Self, PlotError> {
        let text = fs::read_to_string(path).map_err(|e| PlotError::CorruptedSch {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let doc = Sexpr::parse(&text).map_err(|e| PlotError::CorruptedSch {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if doc.name() != Some("kicad_sch") {
            return Err(PlotError::CorruptedSch {
                path: path.to_path_buf(),
                reason: "not a kicad_sch document".to_string(),
            });
        }
        Ok(Self {
            doc,
            path: path.to_path_buf(),
        })
    }

    /// The file this schematic was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Title block contents (empty strings when absent).
    #[must_use]
    pub fn title_block(&self) -> TitleBlock {
        let mut tb = TitleBlock::default();
        let Some(node) = self.doc.find("title_block") else {
            return tb;
        };
        tb.title = node.value_of("title").unwrap_or_default().to_string();
        tb.date = node.value_of("date").unwrap_or_default().to_string();
        tb.rev = node.value_of("rev").unwrap_or_default().to_string();
        tb.company = node.value_of("company").unwrap_or_default().to_string();
        for c in node.find_all("comment") {
            if let Some(text) = c.items().get(2).and_then(Sexpr::atom) {
                tb.comments.push(text.to_string());
            }
        }
        tb
    }

    /// References of the placed symbols.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.doc
            .find_all("symbol")
            .filter_map(symbol_reference)
            .map(String::from)
            .collect()
    }

    /// File names of the hierarchical sub-sheets, as written in the sheet
    /// properties (relative to the schematic's directory).
    #[must_use]
    pub fn sheet_files(&self) -> Vec<String> {
        let mut files = Vec::new();
        for sheet in self.doc.find_all("sheet") {
            for prop in sheet.find_all("property") {
                let key = prop.items().get(1).and_then(Sexpr::atom);
                if matches!(key, Some("Sheetfile" | "Sheet file")) {
                    if let Some(file) = prop.items().get(2).and_then(Sexpr::atom) {
                        files.push(file.to_string());
                    }
                }
            }
        }
        files
    }

    /// Marks the given symbols as DNP and drops them from the BOM.
    pub fn set_not_fitted(&mut self, refs: &HashSet<String>) {
        for node in self.doc.items_mut() {
            if node.name() != Some("symbol") {
                continue;
            }
            let matched = symbol_reference(node).is_some_and(|r| refs.contains(r));
            if !matched {
                continue;
            }
            set_flag(node, "in_bom", "no");
            set_flag(node, "dnp", "yes");
        }
    }

    /// Writes a variant copy into `dir`, bringing the sub-sheets along, and
    /// returns the copy's path.
    pub fn save_variant(&self, dir: &Path) -> Result<PathBuf, PlotError> {
        let name = self
            .path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("schematic.kicad_sch"));
        let dest = dir.join(name);
        debug!("Storing filtered schematic to `{}`", dest.display());
        fs::write(&dest, self.doc.to_string())
            .map_err(|e| PlotError::io(format!("saving schematic to `{}`", dest.display()), e))?;
        let src_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        for sheet in self.sheet_files() {
            let from = src_dir.join(&sheet);
            let to = dir.join(&sheet);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| PlotError::io("creating sub-sheet dir", e))?;
            }
            if from.is_file() {
                fs::copy(&from, &to).map_err(|e| {
                    PlotError::io(format!("copying sub-sheet `{}`", from.display()), e)
                })?;
            }
        }
        Ok(dest)
    }
}

/// Sets a `(flag value)` child, replacing or appending as needed.
fn set_flag(node: &mut Sexpr, flag: &str, value: &str) {
    if let Some(existing) = node.find_mut(flag) {
        *existing = Sexpr::List(vec![Sexpr::sym(flag), Sexpr::sym(value)]);
    } else {
        // Insert before the properties so the file stays readable.
        let pos = node
            .items()
            .iter()
            .position(|e| e.name() == Some("property"))
            .unwrap_or(node.items().len());
        node.items_mut()
            .insert(pos, Sexpr::List(vec![Sexpr::sym(flag), Sexpr::sym(value)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SMALL_SCH: &str = r#"(kicad_sch (version 20211123) (generator eeschema)
  (title_block (title "Test") (rev "A"))
  (sheet (at 10 10) (size 20 20)
    (property "Sheetname" "power")
    (property "Sheetfile" "power.kicad_sch")
  )
  (symbol (lib_id "Device:R") (at 50 50 0) (in_bom yes) (on_board yes)
    (property "Reference" "R1" (at 50 48 0))
    (property "Value" "10K" (at 50 52 0))
  )
  (symbol (lib_id "Device:C") (at 60 50 0) (in_bom yes) (on_board yes)
    (property "Reference" "C1" (at 60 48 0))
    (property "Value" "100n" (at 60 52 0))
  )
)
"#;

    fn load_small(dir: &Path) -> Schematic {
        let path = dir.join("test.kicad_sch");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(SMALL_SCH.as_bytes()).unwrap();
        fs::write(dir.join("power.kicad_sch"), "(kicad_sch (version 20211123))\n").unwrap();
        Schematic::load(&path).unwrap()
    }

    #[test]
    fn references_and_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let sch = load_small(dir.path());
        assert_eq!(sch.references(), vec!["R1".to_string(), "C1".to_string()]);
        assert_eq!(sch.sheet_files(), vec!["power.kicad_sch".to_string()]);
    }

    #[test]
    fn title_block_is_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let sch = load_small(dir.path());
        let tb = sch.title_block();
        assert_eq!(tb.title, "Test");
        assert_eq!(tb.rev, "A");
        assert!(tb.date.is_empty());
    }

    #[test]
    fn not_fitted_symbols_are_marked_dnp() {
        let dir = tempfile::tempdir().unwrap();
        let mut sch = load_small(dir.path());
        let refs: HashSet<String> = std::iter::once("C1".to_string()).collect();
        sch.set_not_fitted(&refs);
        let out = tempfile::tempdir().unwrap();
        let dest = sch.save_variant(out.path()).unwrap();
        let text = fs::read_to_string(dest).unwrap();
        assert!(text.contains("(dnp yes)"));
        assert!(text.contains("(in_bom no)"));
        // R1 still in the BOM
        assert!(text.contains("(in_bom yes)"));
    }

    #[test]
    fn save_variant_copies_sub_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let sch = load_small(dir.path());
        let out = tempfile::tempdir().unwrap();
        let dest = sch.save_variant(out.path()).unwrap();
        assert!(dest.exists());
        assert!(out.path().join("power.kicad_sch").exists());
    }

    #[test]
    fn rejects_non_schematic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.kicad_sch");
        fs::write(&path, "(kicad_pcb)").unwrap();
        let err = Schematic::load(&path).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::CORRUPTED_SCH);
    }
}
