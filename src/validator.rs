//! Printability checks run before a model is handed to the slicer.

use serde::Serialize;

use crate::mesh::MeshMetrics;
use crate::profile::BuildVolume;

/// Volumes below this (mm³) count as degenerate.
pub const MIN_VOLUME: f64 = 1e-3;

/// Outcome of [`validate_model`]. Every check runs; errors are never short-circuited.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub model_size: [f64; 3],
    pub volume: f64,
}

pub fn validate_model(mesh: &impl MeshMetrics, printer: &BuildVolume) -> Verdict {
    let mut errors = Vec::new();
    let volume = mesh.volume();
    let size = mesh.extents();

    if !volume.is_finite() || volume.abs() < MIN_VOLUME {
        errors.push("Zero or degenerate model volume".to_string());
    }

    if !mesh.is_winding_consistent() {
        errors.push("Inconsistent face normals".to_string());
    }

    let bed = printer.bed_size;
    if size.iter().any(|s| !s.is_finite()) {
        errors.push("Model has non-finite extents".to_string());
    } else if size.iter().zip(bed.iter()).any(|(s, b)| s > b) {
        errors.push(format!(
            "Model exceeds build volume ({} > {})",
            format_dims(size),
            format_dims(bed)
        ));
    }

    Verdict {
        is_valid: errors.is_empty(),
        errors,
        model_size: size,
        volume,
    }
}

fn format_dims(d: [f64; 3]) -> String {
    format!("{:.1} x {:.1} x {:.1} mm", d[0], d[1], d[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMesh {
        volume: f64,
        consistent: bool,
        extents: [f64; 3],
    }

    impl MeshMetrics for FakeMesh {
        fn volume(&self) -> f64 {
            self.volume
        }
        fn is_winding_consistent(&self) -> bool {
            self.consistent
        }
        fn extents(&self) -> [f64; 3] {
            self.extents
        }
    }

    fn good_mesh() -> FakeMesh {
        FakeMesh {
            volume: 1000.0,
            consistent: true,
            extents: [10.0, 10.0, 10.0],
        }
    }

    #[test]
    fn printable_mesh_passes() {
        let verdict = validate_model(&good_mesh(), &BuildVolume::default());
        assert!(verdict.is_valid);
        assert!(verdict.errors.is_empty());
        assert_eq!(verdict.model_size, [10.0, 10.0, 10.0]);
    }

    #[test]
    fn mesh_at_exact_bed_size_fits() {
        let mesh = FakeMesh {
            extents: [250.0, 210.0, 210.0],
            ..good_mesh()
        };
        assert!(validate_model(&mesh, &BuildVolume::default()).is_valid);
    }

    #[test]
    fn zero_volume_reported_alongside_other_errors() {
        let mesh = FakeMesh {
            volume: 0.0005,
            consistent: false,
            extents: [300.0, 10.0, 10.0],
        };
        let verdict = validate_model(&mesh, &BuildVolume::default());
        assert!(!verdict.is_valid);
        assert_eq!(verdict.errors.len(), 3);
        assert_eq!(verdict.errors[0], "Zero or degenerate model volume");
        assert_eq!(verdict.errors[1], "Inconsistent face normals");
    }

    #[test]
    fn negative_volume_uses_magnitude() {
        let mesh = FakeMesh {
            volume: -1000.0,
            ..good_mesh()
        };
        assert!(validate_model(&mesh, &BuildVolume::default()).is_valid);
    }

    #[test]
    fn each_axis_is_checked_against_the_bed() {
        let printer = BuildVolume::default();
        for axis in 0..3 {
            let mut extents = [10.0, 10.0, 10.0];
            extents[axis] = printer.bed_size[axis] + 1.0;
            let mesh = FakeMesh {
                extents,
                ..good_mesh()
            };
            let verdict = validate_model(&mesh, &printer);
            assert_eq!(verdict.errors.len(), 1, "axis {axis}");
            assert!(verdict.errors[0].starts_with("Model exceeds build volume"));

            extents[axis] = printer.bed_size[axis] - 1.0;
            let mesh = FakeMesh {
                extents,
                ..good_mesh()
            };
            assert!(validate_model(&mesh, &printer).is_valid, "axis {axis}");
        }
    }

    #[test]
    fn non_finite_measurements_are_rejected() {
        let mesh = FakeMesh {
            volume: f64::NAN,
            consistent: true,
            extents: [f64::NEG_INFINITY, 1.0, 0.0],
        };
        let verdict = validate_model(&mesh, &BuildVolume::default());
        assert!(!verdict.is_valid);
        assert_eq!(
            verdict.errors,
            vec![
                "Zero or degenerate model volume".to_string(),
                "Model has non-finite extents".to_string(),
            ]
        );

        let mesh = FakeMesh {
            volume: f64::INFINITY,
            ..good_mesh()
        };
        assert!(!validate_model(&mesh, &BuildVolume::default()).is_valid);
    }

    #[test]
    fn oversize_message_names_both_extents() {
        let mesh = FakeMesh {
            extents: [300.0, 300.0, 300.0],
            ..good_mesh()
        };
        let verdict = validate_model(&mesh, &BuildVolume::default());
        assert_eq!(
            verdict.errors,
            vec![
                "Model exceeds build volume (300.0 x 300.0 x 300.0 mm > 250.0 x 210.0 x 210.0 mm)"
                    .to_string()
            ]
        );
    }
}
