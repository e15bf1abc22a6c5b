//! Global options: cross-cutting defaults shared by every output.
//!
//! Values come from four places, strongest first: `--global-redef KEY=VALUE`
//! command line overrides, the config's `global:` section, overrides derived
//! from the board's physical stack-up, and built-in defaults. Solder mask and
//! silk screen colors have a general value plus per-side values; when both
//! sides are set the top becomes the general value, otherwise missing sides
//! inherit the general one.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::kicad::Stackup;

/// Default pattern for output file names.
pub const DEF_OUTPUT: &str = "%f-%i%I%v.%x";

/// Measurement units forced on KiCad dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    Millimeters,
    Inches,
    Mils,
}

impl Units {
    /// The units code dimension objects carry in the board file format
    /// (3 is "automatic", the value these force away).
    #[must_use]
    pub fn dimension_mode(self) -> i64 {
        match self {
            Self::Inches => 0,
            Self::Mils => 1,
            Self::Millimeters => 2,
        }
    }
}

/// The `global:` section as written in the YAML config. Everything is
/// optional so resolution can tell "not set" from "set to the default".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSection {
    /// Default pattern for output file names.
    pub output: Option<String>,
    /// Default pattern for the output directories.
    pub dir: Option<String>,
    /// Base output dir, same as the command line `--out-dir`.
    pub out_dir: Option<String>,
    /// Default variant applied to all outputs.
    pub variant: Option<String>,
    /// Default units.
    pub units: Option<Units>,
    /// Seconds to wait for KiCad in KiAuto operations.
    pub kiauto_wait_start: Option<f64>,
    /// Time-out multiplier for KiAuto operations.
    pub kiauto_time_out_scale: Option<f64>,
    /// `strftime` format for file timestamps.
    pub date_time_format: Option<String>,
    /// `strftime` format for the run date.
    pub date_format: Option<String>,
    /// `strftime` format for the run time.
    pub time_format: Option<String>,
    /// Reformat the PCB/SCH date using `date_format`.
    pub time_reformat: Option<bool>,
    /// PCB core material, for documentation and color defaults.
    pub pcb_material: Option<String>,
    pub solder_mask_color: Option<String>,
    pub solder_mask_color_top: Option<String>,
    pub solder_mask_color_bottom: Option<String>,
    pub silk_screen_color: Option<String>,
    pub silk_screen_color_top: Option<String>,
    pub silk_screen_color_bottom: Option<String>,
    /// Pad finish (HAL, ENIG, ...).
    pub pcb_finish: Option<String>,
    /// Alias for `pcb_finish`.
    pub copper_finish: Option<String>,
    /// `yes`, `no` or `bevelled`.
    pub edge_connector: Option<String>,
    pub castellated_pads: Option<bool>,
    pub edge_plating: Option<bool>,
    /// Copper thickness in micrometers (string: boards can mix thicknesses).
    pub copper_thickness: Option<String>,
    pub impedance_controlled: Option<bool>,
}

/// Fully resolved global options.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub output: String,
    pub dir: String,
    pub out_dir: Option<String>,
    pub variant: String,
    pub units: Option<Units>,
    pub kiauto_wait_start: u32,
    pub kiauto_time_out_scale: f64,
    pub date_time_format: String,
    pub date_format: String,
    pub time_format: String,
    pub time_reformat: bool,
    pub pcb_material: String,
    pub solder_mask_color: String,
    pub solder_mask_color_top: String,
    pub solder_mask_color_bottom: String,
    pub silk_screen_color: String,
    pub silk_screen_color_top: String,
    pub silk_screen_color_bottom: String,
    pub pcb_finish: String,
    pub edge_connector: String,
    pub castellated_pads: bool,
    pub edge_plating: bool,
    pub copper_thickness: String,
    pub impedance_controlled: bool,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            output: DEF_OUTPUT.to_string(),
            dir: String::new(),
            out_dir: None,
            variant: String::new(),
            units: None,
            kiauto_wait_start: 0,
            kiauto_time_out_scale: 0.0,
            date_time_format: "%Y-%m-%d_%H-%M-%S".to_string(),
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H-%M-%S".to_string(),
            time_reformat: true,
            pcb_material: "FR4".to_string(),
            solder_mask_color: "green".to_string(),
            solder_mask_color_top: String::new(),
            solder_mask_color_bottom: String::new(),
            silk_screen_color: "white".to_string(),
            silk_screen_color_top: String::new(),
            silk_screen_color_bottom: String::new(),
            pcb_finish: "HAL".to_string(),
            edge_connector: "no".to_string(),
            castellated_pads: false,
            edge_plating: false,
            copper_thickness: "35".to_string(),
            impedance_controlled: false,
        }
    }
}

impl GlobalOptions {
    fn apply_stackup(&mut self, stackup: &Stackup) {
        debug!("Applying stack-up information to the global options");
        if let Some(finish) = &stackup.copper_finish {
            self.pcb_finish = finish.clone();
            debug!("- Copper finish: {}", self.pcb_finish);
        }
        if let Some(edge) = &stackup.edge_connector {
            self.edge_connector = edge.clone();
            debug!("- Edge connector: {}", self.edge_connector);
        }
        if let Some(v) = stackup.castellated_pads {
            self.castellated_pads = v;
        }
        if let Some(v) = stackup.edge_plating {
            self.edge_plating = v;
        }
        if let Some(v) = stackup.impedance_controlled {
            self.impedance_controlled = v;
        }
        let mut materials: Vec<String> = Vec::new();
        let mut thicknesses: Vec<String> = Vec::new();
        for ly in &stackup.layers {
            match (ly.name.as_str(), &ly.color) {
                ("F.SilkS", Some(c)) => self.silk_screen_color_top = c.to_lowercase(),
                ("B.SilkS", Some(c)) => self.silk_screen_color_bottom = c.to_lowercase(),
                ("F.Mask", Some(c)) => self.solder_mask_color_top = c.to_lowercase(),
                ("B.Mask", Some(c)) => self.solder_mask_color_bottom = c.to_lowercase(),
                _ => {
                    if let Some(material) = &ly.material {
                        if !materials.contains(material) {
                            materials.push(material.clone());
                        }
                    } else if ly.kind == "copper" {
                        if let Some(t) = ly.thickness {
                            // Stack-up thickness is mm, ours is micrometers.
                            #[allow(clippy::cast_possible_truncation)]
                            let um = format!("{}", (t * 1000.0).round() as i64);
                            if !thicknesses.contains(&um) {
                                thicknesses.push(um);
                            }
                        }
                    }
                }
            }
        }
        if !materials.is_empty() {
            self.pcb_material = materials.join(" / ");
            debug!("- PCB material/s: {}", self.pcb_material);
        }
        if !thicknesses.is_empty() {
            self.copper_thickness = thicknesses.join(" / ");
            debug!("- Copper thickness: {}", self.copper_thickness);
        }
    }

    fn apply_section(&mut self, s: &GlobalSection) -> Result<(), ConfigError> {
        macro_rules! take {
            ($field:ident) => {
                if let Some(v) = &s.$field {
                    self.$field = v.clone();
                }
            };
        }
        take!(output);
        take!(dir);
        take!(variant);
        take!(date_time_format);
        take!(date_format);
        take!(time_format);
        take!(pcb_material);
        take!(solder_mask_color);
        take!(solder_mask_color_top);
        take!(solder_mask_color_bottom);
        take!(silk_screen_color);
        take!(silk_screen_color_top);
        take!(silk_screen_color_bottom);
        take!(copper_thickness);
        if let Some(v) = s.out_dir.clone() {
            self.out_dir = Some(v);
        }
        if let Some(v) = s.units {
            self.units = Some(v);
        }
        if let Some(v) = s.time_reformat {
            self.time_reformat = v;
        }
        if let Some(v) = s.castellated_pads {
            self.castellated_pads = v;
        }
        if let Some(v) = s.edge_plating {
            self.edge_plating = v;
        }
        if let Some(v) = s.impedance_controlled {
            self.impedance_controlled = v;
        }
        // `copper_finish` is an alias for `pcb_finish`
        if let Some(v) = s.pcb_finish.as_ref().or(s.copper_finish.as_ref()) {
            self.pcb_finish = v.clone();
        }
        if let Some(v) = &s.edge_connector {
            if !matches!(v.as_str(), "yes" | "no" | "bevelled") {
                return Err(ConfigError::validation(format!(
                    "`edge_connector` must be yes, no or bevelled (got `{v}`)"
                )));
            }
            self.edge_connector = v.clone();
        }
        if let Some(v) = s.kiauto_wait_start {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let truncated = v.max(0.0) as u32;
            if (f64::from(truncated) - v).abs() > f64::EPSILON {
                warn!("kiauto_wait_start must be integer, truncating to {truncated}");
            }
            self.kiauto_wait_start = truncated;
        }
        if let Some(v) = s.kiauto_time_out_scale {
            self.kiauto_time_out_scale = v;
        }
        Ok(())
    }

    fn apply_redef(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        info!("Using command line value `{value}` for global option `{key}`");
        let parse_bool = |v: &str| -> Result<bool, ConfigError> {
            match v {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(ConfigError::validation(format!(
                    "global `{key}` expects a boolean, got `{v}`"
                ))),
            }
        };
        match key {
            "output" => self.output = value.to_string(),
            "dir" => self.dir = value.to_string(),
            "out_dir" => self.out_dir = Some(value.to_string()),
            "variant" => self.variant = value.to_string(),
            "units" => {
                self.units = Some(match value {
                    "millimeters" => Units::Millimeters,
                    "inches" => Units::Inches,
                    "mils" => Units::Mils,
                    _ => {
                        return Err(ConfigError::validation(format!(
                            "global `units` must be millimeters, inches or mils (got `{value}`)"
                        )))
                    }
                });
            }
            "kiauto_wait_start" => {
                self.kiauto_wait_start = value.parse().map_err(|_| {
                    ConfigError::validation("global `kiauto_wait_start` expects an integer")
                })?;
            }
            "kiauto_time_out_scale" => {
                self.kiauto_time_out_scale = value.parse().map_err(|_| {
                    ConfigError::validation("global `kiauto_time_out_scale` expects a number")
                })?;
            }
            "date_time_format" => self.date_time_format = value.to_string(),
            "date_format" => self.date_format = value.to_string(),
            "time_format" => self.time_format = value.to_string(),
            "time_reformat" => self.time_reformat = parse_bool(value)?,
            "pcb_material" => self.pcb_material = value.to_string(),
            "solder_mask_color" => self.solder_mask_color = value.to_string(),
            "solder_mask_color_top" => self.solder_mask_color_top = value.to_string(),
            "solder_mask_color_bottom" => self.solder_mask_color_bottom = value.to_string(),
            "silk_screen_color" => self.silk_screen_color = value.to_string(),
            "silk_screen_color_top" => self.silk_screen_color_top = value.to_string(),
            "silk_screen_color_bottom" => self.silk_screen_color_bottom = value.to_string(),
            "pcb_finish" | "copper_finish" => self.pcb_finish = value.to_string(),
            "edge_connector" => self.edge_connector = value.to_string(),
            "castellated_pads" => self.castellated_pads = parse_bool(value)?,
            "edge_plating" => self.edge_plating = parse_bool(value)?,
            "copper_thickness" => self.copper_thickness = value.to_string(),
            "impedance_controlled" => self.impedance_controlled = parse_bool(value)?,
            _ => {
                return Err(ConfigError::validation(format!(
                    "unknown global option `{key}`"
                )))
            }
        }
        Ok(())
    }

    fn solve_colors(&mut self) {
        if !self.solder_mask_color_top.is_empty() && !self.solder_mask_color_bottom.is_empty() {
            // Top and bottom defined, use the top as general
            self.solder_mask_color = self.solder_mask_color_top.clone();
        } else {
            if self.solder_mask_color_top.is_empty() {
                self.solder_mask_color_top = self.solder_mask_color.clone();
            }
            if self.solder_mask_color_bottom.is_empty() {
                self.solder_mask_color_bottom = self.solder_mask_color.clone();
            }
        }
        if !self.silk_screen_color_top.is_empty() && !self.silk_screen_color_bottom.is_empty() {
            self.silk_screen_color = self.silk_screen_color_top.clone();
        } else {
            if self.silk_screen_color_top.is_empty() {
                self.silk_screen_color_top = self.silk_screen_color.clone();
            }
            if self.silk_screen_color_bottom.is_empty() {
                self.silk_screen_color_bottom = self.silk_screen_color.clone();
            }
        }
    }

    /// Resolves the final option values from all the sources.
    ///
    /// `redefs` are `KEY=VALUE` pairs from the command line and always win.
    pub fn resolve(
        section: Option<&GlobalSection>,
        redefs: &[String],
        stackup: Option<&Stackup>,
    ) -> Result<Self, ConfigError> {
        let mut opts = Self::default();
        if let Some(stackup) = stackup {
            opts.apply_stackup(stackup);
        }
        if let Some(section) = section {
            opts.apply_section(section)?;
        }
        for redef in redefs {
            let (key, value) = redef.split_once('=').ok_or_else(|| {
                ConfigError::validation(format!(
                    "global redefinition must be KEY=VALUE (got `{redef}`)"
                ))
            })?;
            opts.apply_redef(key.trim(), value.trim())?;
        }
        opts.solve_colors();
        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kicad::StackupLayer;

    fn stackup() -> Stackup {
        Stackup {
            copper_finish: Some("ENIG".to_string()),
            edge_connector: None,
            castellated_pads: Some(true),
            edge_plating: None,
            impedance_controlled: None,
            layers: vec![
                StackupLayer {
                    name: "F.SilkS".to_string(),
                    kind: "Top Silk Screen".to_string(),
                    color: Some("Black".to_string()),
                    material: None,
                    thickness: None,
                },
                StackupLayer {
                    name: "F.Cu".to_string(),
                    kind: "copper".to_string(),
                    color: None,
                    material: None,
                    thickness: Some(0.035),
                },
                StackupLayer {
                    name: "dielectric 1".to_string(),
                    kind: "core".to_string(),
                    color: None,
                    material: Some("FR4".to_string()),
                    thickness: Some(1.51),
                },
                StackupLayer {
                    name: "B.Cu".to_string(),
                    kind: "copper".to_string(),
                    color: None,
                    material: None,
                    thickness: Some(0.07),
                },
            ],
        }
    }

    #[test]
    fn defaults_without_sources() {
        let opts = GlobalOptions::resolve(None, &[], None).unwrap();
        assert_eq!(opts.output, DEF_OUTPUT);
        assert_eq!(opts.solder_mask_color, "green");
        assert_eq!(opts.solder_mask_color_top, "green");
        assert_eq!(opts.solder_mask_color_bottom, "green");
        assert_eq!(opts.pcb_finish, "HAL");
    }

    #[test]
    fn stackup_overrides_defaults() {
        let opts = GlobalOptions::resolve(None, &[], Some(&stackup())).unwrap();
        assert_eq!(opts.pcb_finish, "ENIG");
        assert!(opts.castellated_pads);
        assert_eq!(opts.silk_screen_color_top, "black");
        // top set, bottom inherited from the general value
        assert_eq!(opts.silk_screen_color_bottom, "white");
        assert_eq!(opts.copper_thickness, "35 / 70");
        assert_eq!(opts.pcb_material, "FR4");
    }

    #[test]
    fn config_beats_stackup_and_cli_beats_config() {
        let section = GlobalSection {
            pcb_finish: Some("HASL".to_string()),
            variant: Some("production".to_string()),
            ..GlobalSection::default()
        };
        let redefs = vec!["pcb_finish=Hard gold".to_string()];
        let opts = GlobalOptions::resolve(Some(&section), &redefs, Some(&stackup())).unwrap();
        assert_eq!(opts.pcb_finish, "Hard gold");
        assert_eq!(opts.variant, "production");
    }

    #[test]
    fn both_sides_set_uses_top_as_general() {
        let section = GlobalSection {
            solder_mask_color_top: Some("blue".to_string()),
            solder_mask_color_bottom: Some("red".to_string()),
            ..GlobalSection::default()
        };
        let opts = GlobalOptions::resolve(Some(&section), &[], None).unwrap();
        assert_eq!(opts.solder_mask_color, "blue");
    }

    #[test]
    fn wait_start_is_truncated() {
        let section = GlobalSection {
            kiauto_wait_start: Some(2.7),
            ..GlobalSection::default()
        };
        let opts = GlobalOptions::resolve(Some(&section), &[], None).unwrap();
        assert_eq!(opts.kiauto_wait_start, 2);
    }

    #[test]
    fn unknown_redef_is_rejected() {
        let redefs = vec!["no_such_option=1".to_string()];
        assert!(GlobalOptions::resolve(None, &redefs, None).is_err());
    }

    #[test]
    fn bad_edge_connector_is_rejected() {
        let section = GlobalSection {
            edge_connector: Some("maybe".to_string()),
            ..GlobalSection::default()
        };
        assert!(GlobalOptions::resolve(Some(&section), &[], None).is_err());
    }
}
