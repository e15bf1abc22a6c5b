//! Read/patch access to `.kicad_pcb` files.
//!
//! This is deliberately not a full board model: outputs delegate the heavy
//! lifting to `pcbnew_do`. What we need locally is the stack-up (to derive
//! global defaults), the title block and layer table (filename expansion and
//! layer selection), the footprint/pad/outline geometry (boardview export)
//! and a handful of in-place mutations used to build temporary variant
//! copies: paste stripping, Fab-layer cross-out and title replacement.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PlotError;
use crate::kicad::sexpr::Sexpr;

/// One layer of the physical stack-up.
#[derive(Debug, Clone, Default)]
pub struct StackupLayer {
    /// KiCad layer name (`F.SilkS`, `B.Mask`, ...) or dielectric id.
    pub name: String,
    /// Layer type string (`copper`, `core`, ...).
    pub kind: String,
    /// User-assigned color, when present.
    pub color: Option<String>,
    /// Dielectric material, when present.
    pub material: Option<String>,
    /// Thickness in millimeters for dielectrics, micrometers for copper.
    pub thickness: Option<f64>,
}

/// Stack-up information from `kicad_pcb/setup/stackup`.
#[derive(Debug, Clone, Default)]
pub struct Stackup {
    /// Pad finish (`ENIG`, `HAL`, ...).
    pub copper_finish: Option<String>,
    /// Edge connector setting (`yes`, `no`, `bevelled`).
    pub edge_connector: Option<String>,
    /// Castellated pads flag.
    pub castellated_pads: Option<bool>,
    /// Plated board edge flag.
    pub edge_plating: Option<bool>,
    /// Dielectric constraints flag.
    pub impedance_controlled: Option<bool>,
    /// The layers, in file order.
    pub layers: Vec<StackupLayer>,
}

/// Title block data.
#[derive(Debug, Clone, Default)]
pub struct TitleBlock {
    pub title: String,
    pub date: String,
    pub rev: String,
    pub company: String,
    /// Numbered comments, index 0 is comment 1.
    pub comments: Vec<String>,
}

/// An entry of the board's layer table.
#[derive(Debug, Clone)]
pub struct LayerDef {
    /// Canonical name (`F.Cu`, `Edge.Cuts`, ...).
    pub name: String,
    /// `signal`, `power` or `user`.
    pub kind: String,
}

/// A pad, with absolute board coordinates in millimeters.
#[derive(Debug, Clone)]
pub struct Pad {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub net_code: i64,
    pub flipped: bool,
}

/// A footprint, with absolute board coordinates in millimeters.
#[derive(Debug, Clone)]
pub struct Footprint {
    pub reference: String,
    pub x: f64,
    pub y: f64,
    pub flipped: bool,
    pub pads: Vec<Pad>,
}

impl Footprint {
    /// Axis-aligned bounding box over the pads, falling back to a small box
    /// around the origin for padless footprints.
    #[must_use]
    pub fn bbox(&self) -> (f64, f64, f64, f64) {
        if self.pads.is_empty() {
            return (self.x - 0.5, self.y - 0.5, self.x + 0.5, self.y + 0.5);
        }
        let mut x1 = f64::INFINITY;
        let mut y1 = f64::INFINITY;
        let mut x2 = f64::NEG_INFINITY;
        let mut y2 = f64::NEG_INFINITY;
        for p in &self.pads {
            x1 = x1.min(p.x);
            y1 = y1.min(p.y);
            x2 = x2.max(p.x);
            y2 = y2.max(p.y);
        }
        (x1, y1, x2, y2)
    }
}

/// A parsed board document.
#[derive(Debug, Clone)]
pub struct Board {
    doc: Sexpr,
    path: PathBuf,
}

fn is_footprint(node: &Sexpr) -> bool {
    matches!(node.name(), Some("footprint" | "module"))
}

fn at_of(node: &Sexpr) -> (f64, f64, f64) {
    let Some(at) = node.find("at") else {
        return (0.0, 0.0, 0.0);
    };
    let items = at.items();
    let x = items.get(1).and_then(Sexpr::as_f64).unwrap_or(0.0);
    let y = items.get(2).and_then(Sexpr::as_f64).unwrap_or(0.0);
    let rot = items.get(3).and_then(Sexpr::as_f64).unwrap_or(0.0);
    (x, y, rot)
}

fn reference_of(node: &Sexpr) -> Option<String> {
    // KiCad 7+: (property "Reference" "R1" ...)
    for prop in node.find_all("property") {
        if prop.items().get(1).and_then(Sexpr::atom) == Some("Reference") {
            return prop.items().get(2).and_then(Sexpr::atom).map(String::from);
        }
    }
    // KiCad 6: (fp_text reference "R1" ...)
    for text in node.find_all("fp_text") {
        if text.items().get(1).and_then(Sexpr::atom) == Some("reference") {
            return text.items().get(2).and_then(Sexpr::atom).map(String::from);
        }
    }
    None
}

fn on_back(node: &Sexpr) -> bool {
    node.value_of("layer").is_some_and(|l| l.starts_with("B."))
}

impl Board {
    /// Loads and parses a board file.
    pub fn load(path: &Path) -> Result<Self, PlotError> {
        let text = fs::read_to_string(path).map_err(|e| PlotError::CorruptedPcb {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let doc = Sexpr::parse(&text).map_err(|e| PlotError::CorruptedPcb {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if doc.name() != Some("kicad_pcb") {
            return Err(PlotError::CorruptedPcb {
                path: path.to_path_buf(),
                reason: "not a kicad_pcb document".to_string(),
            });
        }
        Ok(Self {
            doc,
            path: path.to_path_buf(),
        })
    }

    /// The file this board was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes the (possibly patched) board to a new file.
    pub fn save(&self, path: &Path) -> Result<(), PlotError> {
        fs::write(path, self.doc.to_string())
            .map_err(|e| PlotError::io(format!("saving board to `{}`", path.display()), e))
    }

    /// The stack-up section, when the board has one.
    #[must_use]
    pub fn stackup(&self) -> Option<Stackup> {
        let node = self.doc.query("kicad_pcb/setup/stackup").into_iter().next()?;
        let mut stackup = Stackup::default();
        for e in node.items().iter().skip(1) {
            match e.name() {
                Some("copper_finish") => {
                    stackup.copper_finish = e.items().get(1).and_then(Sexpr::atom).map(String::from);
                }
                Some("edge_connector") => {
                    stackup.edge_connector = e.items().get(1).and_then(Sexpr::atom).map(String::from);
                }
                Some("castellated_pads") => {
                    stackup.castellated_pads =
                        Some(e.items().get(1).and_then(Sexpr::atom) == Some("yes"));
                }
                Some("edge_plating") => {
                    stackup.edge_plating =
                        Some(e.items().get(1).and_then(Sexpr::atom) == Some("yes"));
                }
                Some("dielectric_constraints") => {
                    stackup.impedance_controlled =
                        Some(e.items().get(1).and_then(Sexpr::atom) == Some("yes"));
                }
                Some("layer") => {
                    stackup.layers.push(StackupLayer {
                        name: e
                            .items()
                            .get(1)
                            .and_then(Sexpr::atom)
                            .unwrap_or_default()
                            .to_string(),
                        kind: e.value_of("type").unwrap_or_default().to_string(),
                        color: e.value_of("color").map(String::from),
                        material: e.value_of("material").map(String::from),
                        thickness: e.find("thickness").and_then(|t| {
                            t.items().get(1).and_then(Sexpr::as_f64)
                        }),
                    });
                }
                _ => {}
            }
        }
        Some(stackup)
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

    /// The board's layer table, in file order.
    #[must_use]
    pub fn layers(&self) -> Vec<LayerDef> {
        let Some(node) = self.doc.find("layers") else {
            return Vec::new();
        };
        node.items()
            .iter()
            .skip(1)
            .filter_map(|e| {
                let name = e.items().get(1).and_then(Sexpr::atom)?;
                let kind = e.items().get(2).and_then(Sexpr::atom).unwrap_or("user");
                Some(LayerDef {
                    name: name.to_string(),
                    kind: kind.to_string(),
                })
            })
            .collect()
    }

    /// Net table as (code, name) pairs, code 0 (the unconnected net) included.
    #[must_use]
    pub fn nets(&self) -> Vec<(i64, String)> {
        self.doc
            .find_all("net")
            .filter_map(|n| {
                let code = n.items().get(1).and_then(Sexpr::as_f64)?;
                #[allow(clippy::cast_possible_truncation)]
                let code = code as i64;
                let name = n.items().get(2).and_then(Sexpr::atom).unwrap_or("");
                Some((code, name.to_string()))
            })
            .collect()
    }

    /// Snapshot of the footprints with absolute pad coordinates.
    #[must_use]
    pub fn footprints(&self) -> Vec<Footprint> {
        let mut result = Vec::new();
        for node in self.doc.items().iter().filter(|e| is_footprint(e)) {
            let (fx, fy, frot) = at_of(node);
            let flipped = on_back(node);
            let rad = frot.to_radians();
            let (sin, cos) = rad.sin_cos();
            let mut pads = Vec::new();
            for pad in node.find_all("pad") {
                let (dx, dy, _) = at_of(pad);
                // Pad offsets are stored unrotated; apply the footprint angle.
                let x = fx + dx * cos + dy * sin;
                let y = fy - dx * sin + dy * cos;
                let net_code = pad
                    .find("net")
                    .and_then(|n| n.items().get(1).and_then(Sexpr::as_f64))
                    .unwrap_or(0.0);
                #[allow(clippy::cast_possible_truncation)]
                let net_code = net_code as i64;
                pads.push(Pad {
                    name: pad
                        .items()
                        .get(1)
                        .and_then(Sexpr::atom)
                        .unwrap_or_default()
                        .to_string(),
                    x,
                    y,
                    net_code,
                    flipped,
                });
            }
            result.push(Footprint {
                reference: reference_of(node).unwrap_or_default(),
                x: fx,
                y: fy,
                flipped,
                pads,
            });
        }
        result
    }

    /// Board outline from the `Edge.Cuts` graphics, as an ordered point list
    /// plus a closed flag.
    #[must_use]
    pub fn outline(&self) -> (Vec<(f64, f64)>, bool) {
        let on_edge = |e: &Sexpr| e.value_of("layer") == Some("Edge.Cuts");
        // A polygon or rectangle wins outright.
        for e in self.doc.items() {
            if e.name() == Some("gr_poly") && on_edge(e) {
                if let Some(pts) = e.find("pts") {
                    let points: Vec<(f64, f64)> = pts
                        .find_all("xy")
                        .filter_map(|p| {
                            Some((
                                p.items().get(1).and_then(Sexpr::as_f64)?,
                                p.items().get(2).and_then(Sexpr::as_f64)?,
                            ))
                        })
                        .collect();
                    return (points, true);
                }
            }
            if e.name() == Some("gr_rect") && on_edge(e) {
                let (sx, sy) = point_of(e, "start");
                let (ex, ey) = point_of(e, "end");
                return (vec![(sx, sy), (ex, sy), (ex, ey), (sx, ey)], true);
            }
        }
        // Otherwise chain the individual segments.
        let mut segments: Vec<((f64, f64), (f64, f64))> = self
            .doc
            .items()
            .iter()
            .filter(|e| e.name() == Some("gr_line") && on_edge(e))
            .map(|e| (point_of(e, "start"), point_of(e, "end")))
            .collect();
        let Some(first) = segments.first().copied() else {
            return (Vec::new(), false);
        };
        let mut points = vec![first.0, first.1];
        segments.remove(0);
        while let Some(pos) = segments
            .iter()
            .position(|s| close(s.0, *points.last().unwrap()) || close(s.1, *points.last().unwrap()))
        {
            let (a, b) = segments.remove(pos);
            let next = if close(a, *points.last().unwrap()) { b } else { a };
            points.push(next);
        }
        let closed = points.len() > 2 && close(points[0], *points.last().unwrap());
        if closed {
            points.pop();
        }
        (points, closed)
    }

    /// Forces the units of dimension objects left in automatic mode, so
    /// prints show measurements in the globally chosen units. `mode` is the
    /// file format's code (0 inches, 1 mils, 2 millimeters; 3 is automatic).
    /// Returns how many dimensions were patched.
    pub fn force_dimension_units(&mut self, mode: i64) -> usize {
        let mut patched = 0;
        for node in self.doc.items_mut() {
            if node.name() != Some("dimension") {
                continue;
            }
            let Some(format) = node.find_mut("format") else {
                continue;
            };
            let Some(units) = format.find_mut("units") else {
                continue;
            };
            if units.items().get(1).and_then(Sexpr::atom) == Some("3") {
                *units = Sexpr::List(vec![Sexpr::sym("units"), Sexpr::sym(mode.to_string())]);
                patched += 1;
            }
        }
        patched
    }

    /// Replaces the sheet title, creating the title block when missing.
    pub fn set_title(&mut self, title: &str) {
        if self.doc.find("title_block").is_none() {
            self.doc
                .items_mut()
                .insert(1, Sexpr::List(vec![Sexpr::sym("title_block")]));
        }
        let tb = self.doc.find_mut("title_block").unwrap();
        if let Some(t) = tb.find_mut("title") {
            *t = Sexpr::List(vec![Sexpr::sym("title"), Sexpr::str(title)]);
        } else {
            tb.items_mut()
                .push(Sexpr::List(vec![Sexpr::sym("title"), Sexpr::str(title)]));
        }
    }

    /// Removes the paste layers from the pads of the given footprints, so
    /// not-fitted components produce no stencil apertures.
    pub fn strip_paste(&mut self, refs: &HashSet<String>) {
        for_footprints(&mut self.doc, refs, |node| {
            for pad in list_children_mut(node, "pad") {
                if let Some(layers) = pad.find_mut("layers") {
                    layers
                        .items_mut()
                        .retain(|l| !matches!(l.atom(), Some("F.Paste" | "B.Paste")));
                }
            }
        });
    }

    /// Draws an X over the given footprints on their Fab layer.
    pub fn cross_out(&mut self, refs: &HashSet<String>) {
        let boxes: Vec<(String, (f64, f64, f64, f64), bool)> = self
            .footprints()
            .into_iter()
            .filter(|f| refs.contains(&f.reference))
            .map(|f| {
                let (x1, y1, x2, y2) = f.bbox();
                // bbox is absolute, fp_line coordinates are relative
                ((f.reference.clone()), (x1 - f.x, y1 - f.y, x2 - f.x, y2 - f.y), f.flipped)
            })
            .collect();
        for (reference, (x1, y1, x2, y2), flipped) in boxes {
            let only: HashSet<String> = std::iter::once(reference).collect();
            let layer = if flipped { "B.Fab" } else { "F.Fab" };
            for_footprints(&mut self.doc, &only, |node| {
                node.items_mut().push(fab_line(x1, y1, x2, y2, layer));
                node.items_mut().push(fab_line(x1, y2, x2, y1, layer));
            });
        }
    }

    /// Drops the Fab-layer texts of the given footprints, hiding their
    /// references/values in fabrication prints.
    pub fn hide_fab_text(&mut self, refs: &HashSet<String>) {
        for_footprints(&mut self.doc, refs, |node| {
            node.items_mut().retain(|e| {
                if e.name() != Some("fp_text") {
                    return true;
                }
                !e.value_of("layer").is_some_and(|l| l.ends_with(".Fab"))
            });
        });
    }
}

fn point_of(node: &Sexpr, head: &str) -> (f64, f64) {
    let Some(p) = node.find(head) else {
        return (0.0, 0.0);
    };
    (
        p.items().get(1).and_then(Sexpr::as_f64).unwrap_or(0.0),
        p.items().get(2).and_then(Sexpr::as_f64).unwrap_or(0.0),
    )
}

fn close(a: (f64, f64), b: (f64, f64)) -> bool {
    (a.0 - b.0).abs() < 1e-6 && (a.1 - b.1).abs() < 1e-6
}

fn fab_line(x1: f64, y1: f64, x2: f64, y2: f64, layer: &str) -> Sexpr {
    Sexpr::List(vec![
        Sexpr::sym("fp_line"),
        Sexpr::List(vec![Sexpr::sym("start"), Sexpr::num(x1), Sexpr::num(y1)]),
        Sexpr::List(vec![Sexpr::sym("end"), Sexpr::num(x2), Sexpr::num(y2)]),
        Sexpr::List(vec![
            Sexpr::sym("stroke"),
            Sexpr::List(vec![Sexpr::sym("width"), Sexpr::num(0.12)]),
            Sexpr::List(vec![Sexpr::sym("type"), Sexpr::sym("solid")]),
        ]),
        Sexpr::List(vec![Sexpr::sym("layer"), Sexpr::str(layer)]),
    ])
}

fn for_footprints<F: FnMut(&mut Sexpr)>(doc: &mut Sexpr, refs: &HashSet<String>, mut f: F) {
    for node in doc.items_mut() {
        if is_footprint(node) && reference_of(node).is_some_and(|r| refs.contains(&r)) {
            f(node);
        }
    }
}

fn list_children_mut<'a>(node: &'a mut Sexpr, head: &'a str) -> impl Iterator<Item = &'a mut Sexpr> {
    node.items_mut()
        .iter_mut()
        .filter(move |e| e.name() == Some(head))
}
