//! Printer and material profiles.
//!
//! The [`BuildVolume`] describes the target machine and is read once at
//! startup. [`Material`] is the fixed set of filaments a job may ask for, and
//! [`FillDensity`] is the infill fraction handed to the slicer.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

/// Static description of the printer a model must fit on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildVolume {
    #[serde(default = "default_printer_name")]
    pub name: String,
    /// Bed extents in millimetres: X, Y, Z.
    #[serde(default = "default_bed_size")]
    pub bed_size: [f64; 3],
    #[serde(default = "default_nozzle_diameter")]
    pub nozzle_diameter: f64,
    #[serde(default = "default_layer_height")]
    pub layer_height: f64,
    #[serde(default = "default_print_speed")]
    pub print_speed: f64,
    #[serde(default = "default_travel_speed")]
    pub travel_speed: f64,
    #[serde(default = "default_filament_diameter")]
    pub filament_diameter: f64,
}

fn default_printer_name() -> String {
    "Prusa i3 MK3S+".to_string()
}

fn default_bed_size() -> [f64; 3] {
    [250.0, 210.0, 210.0]
}

fn default_nozzle_diameter() -> f64 {
    0.4
}

fn default_layer_height() -> f64 {
    0.2
}

fn default_print_speed() -> f64 {
    50.0
}

fn default_travel_speed() -> f64 {
    120.0
}

fn default_filament_diameter() -> f64 {
    1.75
}

impl Default for BuildVolume {
    fn default() -> Self {
        Self {
            name: default_printer_name(),
            bed_size: default_bed_size(),
            nozzle_diameter: default_nozzle_diameter(),
            layer_height: default_layer_height(),
            print_speed: default_print_speed(),
            travel_speed: default_travel_speed(),
            filament_diameter: default_filament_diameter(),
        }
    }
}

/// Filaments the service knows how to slice for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Material {
    #[serde(rename = "PLA")]
    Pla,
    #[serde(rename = "ABS")]
    Abs,
}

impl Material {
    pub const ALL: [Material; 2] = [Material::Pla, Material::Abs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Material::Pla => "PLA",
            Material::Abs => "ABS",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Material {
    type Err = SubmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Material::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| SubmitError::UnknownMaterial(s.to_string()))
    }
}

/// Slicer config file for each material.
pub type MaterialProfiles = BTreeMap<Material, PathBuf>;

pub fn default_material_profiles() -> MaterialProfiles {
    Material::ALL
        .into_iter()
        .map(|m| (m, PathBuf::from(format!("configs/filament_{m}.ini"))))
        .collect()
}

/// Infill density as a fraction in `[0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FillDensity(f64);

impl FillDensity {
    /// Converts an infill percentage, rejecting anything outside `0..=100`.
    pub fn from_percent(percent: i64) -> Result<Self, SubmitError> {
        if !(0..=100).contains(&percent) {
            return Err(SubmitError::InfillOutOfRange(percent));
        }
        Ok(Self(percent as f64 / 100.0))
    }

    pub fn fraction(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for FillDensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
