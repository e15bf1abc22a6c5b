//! Boardview (.brd) export for repair tools like OpenBoardView.
//!
//! This is a pure conversion, no external tool involved: outline, nets, parts
//! and pads are read from the board and written in the text format the
//! viewers expect. Coordinates are in the format's own unit (2.54 µm steps).
//! Parts and pads on the top side get their Y measured from the bottom edge;
//! flipped ones keep the raw board Y.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::context::Context;
use crate::error::PlotError;
use crate::kicad::{Footprint, Pad};
use crate::outputs::{expand_filename, Output};

/// `%i` value for this output.
const ID: &str = "boardview";

/// Options of the `boardview` output.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BoardviewOptions {
    /// Output file name pattern; empty means the global default.
    pub output: String,
}

fn coord(mm: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let c = (mm * 1_000_000.0 * 5.0 / 127_000.0).round() as i64;
    c
}

fn y_coord(flipped: bool, max_y: f64, y: f64) -> i64 {
    if flipped {
        coord(y)
    } else {
        coord(max_y - y)
    }
}

/// `TP*` footprints are test points: they become nails, everything else
/// becomes a part. `REF**` placeholders are dropped outright.
fn skip_footprint(reference: &str, tp: bool) -> bool {
    if reference == "REF**" {
        return true;
    }
    if tp && !reference.starts_with("TP") {
        return true;
    }
    if !tp && reference.starts_with("TP") {
        return true;
    }
    false
}

/// Numeric pad names sort as numbers and come before the alphanumeric ones;
/// position breaks the ties.
fn pad_sort_key(pad: &Pad) -> (u8, i64, String, i64, i64) {
    if !pad.name.is_empty() && pad.name.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = pad.name.parse::<i64>() {
            return (0, n, String::new(), coord(pad.x), coord(pad.y));
        }
    }
    (1, 0, pad.name.clone(), coord(pad.x), coord(pad.y))
}

fn sorted_pads(part: &Footprint) -> Vec<&Pad> {
    let mut pads: Vec<&Pad> = part.pads.iter().collect();
    pads.sort_by_key(|p| pad_sort_key(p));
    pads
}

fn render(
    outline: &[(f64, f64)],
    closed: bool,
    nets: &[(i64, String)],
    footprints: &[Footprint],
) -> String {
    let max_x = outline.iter().map(|p| p.0).fold(0.0, f64::max);
    let max_y = outline.iter().map(|p| p.1).fold(0.0, f64::max);
    let mut text = String::new();
    text.push_str("0\n");

    text.push_str(&format!(
        "BRDOUT: {} {} {}\n",
        outline.len() + usize::from(closed),
        coord(max_x),
        coord(max_y)
    ));
    for (x, y) in outline {
        text.push_str(&format!("{} {}\n", coord(*x), coord(*y)));
    }
    if closed {
        if let Some((x, y)) = outline.first() {
            text.push_str(&format!("{} {}\n", coord(*x), coord(*y)));
        }
    }
    text.push('\n');

    // Net 0 is the unconnected one, viewers don't want it. Spaces in names
    // would break the column split, a NBSP keeps them readable.
    let nets: Vec<&(i64, String)> = nets.iter().filter(|(code, _)| *code != 0).collect();
    text.push_str(&format!("NETS: {}\n", nets.len()));
    for (code, name) in &nets {
        text.push_str(&format!("{code} {}\n", name.replace(' ', "\u{a0}")));
    }
    text.push('\n');

    let mut parts: Vec<&Footprint> = footprints
        .iter()
        .filter(|f| !skip_footprint(&f.reference, false))
        .collect();
    parts.sort_by(|a, b| a.reference.cmp(&b.reference));
    text.push_str(&format!("PARTS: {}\n", parts.len()));
    let mut pin_at = 0usize;
    for part in &parts {
        let (x1, y1, x2, y2) = part.bbox();
        text.push_str(&format!(
            "{} {} {} {} {} {} {}\n",
            part.reference,
            coord(x1),
            y_coord(part.flipped, max_y, y1),
            coord(x2),
            y_coord(part.flipped, max_y, y2),
            pin_at,
            1 + i32::from(part.flipped)
        ));
        pin_at += part.pads.len();
    }
    text.push('\n');

    let pads: Vec<&Pad> = parts.iter().flat_map(|part| sorted_pads(part)).collect();
    text.push_str(&format!("PINS: {}\n", pads.len()));
    for pad in &pads {
        text.push_str(&format!(
            "{} {} {} {}\n",
            coord(pad.x),
            y_coord(pad.flipped, max_y, pad.y),
            pad.net_code,
            1 + i32::from(pad.flipped)
        ));
    }
    text.push('\n');

    let mut testpoints: Vec<&Footprint> = footprints
        .iter()
        .filter(|f| !skip_footprint(&f.reference, true))
        .collect();
    testpoints.sort_by(|a, b| a.reference.cmp(&b.reference));
    let nails: Vec<(&Footprint, &Pad)> = testpoints
        .iter()
        .flat_map(|part| sorted_pads(part).into_iter().map(move |p| (*part, p)))
        .collect();
    text.push_str(&format!("NAILS: {}\n", nails.len()));
    for (part, pad) in &nails {
        // The probe number is the reference without its TP prefix.
        text.push_str(&format!(
            "{} {} {} {} {}\n",
            &part.reference[2..],
            coord(pad.x),
            y_coord(pad.flipped, max_y, pad.y),
            pad.net_code,
            1 + i32::from(pad.flipped)
        ));
    }
    text.push('\n');
    text
}

impl BoardviewOptions {
    /// The file this output will generate.
    pub fn targets(
        &self,
        ctx: &mut Context,
        out: &Output,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, PlotError> {
        let pattern = if self.output.is_empty() {
            ctx.globals.output.clone()
        } else {
            self.output.clone()
        };
        let name = expand_filename(ctx, &pattern, ID, "brd", &out.output_id, true)?;
        Ok(vec![dir.join(name)])
    }

    /// Generates the boardview file.
    pub fn run(&self, ctx: &mut Context, out: &Output, dir: &Path) -> Result<(), PlotError> {
        let target = self.targets(ctx, out, dir)?.remove(0);
        let board = ctx.board()?;
        let (outline, closed) = board.outline();
        let nets = board.nets();
        let footprints = board.footprints();
        debug!(
            "Converting {} footprints and {} nets",
            footprints.len(),
            nets.len()
        );
        let text = render(&outline, closed, &nets, &footprints);
        fs::write(&target, text)
            .map_err(|e| PlotError::io(format!("writing `{}`", target.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Vec<(f64, f64)>, Vec<(i64, String)>, Vec<Footprint>) {
        let outline = vec![(0.0, 0.0), (25.4, 0.0), (25.4, 12.7), (0.0, 12.7)];
        let nets = vec![
            (0, String::new()),
            (1, "GND".to_string()),
            (2, "+5V".to_string()),
        ];
        let footprints = vec![
            Footprint {
                reference: "R1".to_string(),
                x: 5.0,
                y: 5.0,
                flipped: false,
                pads: vec![
                    Pad {
                        name: "1".to_string(),
                        x: 4.0,
                        y: 5.0,
                        net_code: 1,
                        flipped: false,
                    },
                    Pad {
                        name: "2".to_string(),
                        x: 6.0,
                        y: 5.0,
                        net_code: 2,
                        flipped: false,
                    },
                ],
            },
            Footprint {
                reference: "TP1".to_string(),
                x: 20.0,
                y: 5.0,
                flipped: true,
                pads: vec![Pad {
                    name: "1".to_string(),
                    x: 20.0,
                    y: 5.0,
                    net_code: 1,
                    flipped: true,
                }],
            },
            Footprint {
                reference: "REF**".to_string(),
                x: 0.0,
                y: 0.0,
                flipped: false,
                pads: vec![],
            },
        ];
        (outline, nets, footprints)
    }

    #[test]
    fn coordinates_use_brd_units() {
        // 25.4 mm = 1 inch = 1000 brd units
        assert_eq!(coord(25.4), 1000);
        assert_eq!(coord(0.0), 0);
    }

    #[test]
    fn sections_and_counts() {
        let (outline, nets, footprints) = sample();
        let text = render(&outline, true, &nets, &footprints);
        // Closed outline repeats the first point, written in raw board
        // coordinates.
        assert!(text.starts_with("0\nBRDOUT: 5 1000 500\n0 0\n1000 0\n"), "{text}");
        // Net 0 is left out.
        assert!(text.contains("\nNETS: 2\n"));
        assert!(text.contains("1 GND\n"));
        // REF** and the test point are no parts.
        assert!(text.contains("\nPARTS: 1\n"));
        assert!(text.contains("\nPINS: 2\n"));
        assert!(text.contains("\nNAILS: 1\n"));
    }

    #[test]
    fn part_line_has_zero_based_pin_index() {
        let (outline, nets, footprints) = sample();
        let text = render(&outline, true, &nets, &footprints);
        // bbox 4..6 mm in X, 5 mm in Y measured from the 12.7 mm bottom edge.
        let r1 = text.lines().find(|l| l.starts_with("R1 ")).unwrap();
        assert_eq!(r1, "R1 157 303 236 303 0 1");
    }

    #[test]
    fn nail_uses_the_reference_suffix_as_probe() {
        let (outline, nets, footprints) = sample();
        let text = render(&outline, true, &nets, &footprints);
        // TP1 is flipped: its Y stays unflipped and its side is 2.
        let nail = text.lines().skip_while(|l| !l.starts_with("NAILS:")).nth(1).unwrap();
        assert_eq!(nail, "1 787 197 1 2");
    }

    #[test]
    fn net_name_spaces_become_nbsp() {
        let (outline, _, footprints) = sample();
        let nets = vec![(3, "V IN".to_string())];
        let text = render(&outline, true, &nets, &footprints);
        assert!(text.contains("3 V\u{a0}IN\n"));
    }

    #[test]
    fn parts_are_sorted_by_reference() {
        let (outline, nets, mut footprints) = sample();
        footprints.push(Footprint {
            reference: "C1".to_string(),
            x: 1.0,
            y: 1.0,
            flipped: false,
            pads: vec![Pad {
                name: "1".to_string(),
                x: 1.0,
                y: 1.0,
                net_code: 2,
                flipped: false,
            }],
        });
        let text = render(&outline, true, &nets, &footprints);
        let c1 = text.find("C1 ").unwrap();
        let r1 = text.find("R1 ").unwrap();
        assert!(c1 < r1);
        // C1 comes first, so R1's pins start after its single pad.
        let r1_line = text.lines().find(|l| l.starts_with("R1 ")).unwrap();
        assert!(r1_line.ends_with(" 1 1"), "line: {r1_line}");
    }

    #[test]
    fn numeric_pad_names_sort_as_numbers() {
        let mk = |name: &str, x: f64| Pad {
            name: name.to_string(),
            x,
            y: 0.0,
            net_code: 0,
            flipped: false,
        };
        let part = Footprint {
            reference: "U1".to_string(),
            x: 0.0,
            y: 0.0,
            flipped: false,
            pads: vec![mk("10", 1.0), mk("2", 2.0), mk("A1", 0.0)],
        };
        let names: Vec<&str> = sorted_pads(&part).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["2", "10", "A1"]);
    }
}
