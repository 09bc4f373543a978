//! STL decoding and the handful of mesh signals the validator needs.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("failed to read STL: {0}")]
    Read(#[from] std::io::Error),

    #[error("mesh has no faces")]
    Empty,

    #[error("vertex {0} has a non-finite coordinate")]
    NonFinite(usize),
}

/// What the validator needs to know about a loaded mesh.
pub trait MeshMetrics {
    /// Signed enclosed volume in cubic millimetres.
    fn volume(&self) -> f64;
    fn is_winding_consistent(&self) -> bool;
    /// Bounding-box extents along X, Y and Z.
    fn extents(&self) -> [f64; 3];
}

/// Summary of a decoded STL model.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshReport {
    pub faces: usize,
    pub volume: f64,
    pub winding_consistent: bool,
    pub extents: [f64; 3],
}

impl MeshReport {
    /// Decodes ASCII or binary STL bytes.
    pub fn from_stl_bytes(bytes: &[u8]) -> Result<Self, MeshError> {
        Self::from_reader(&mut Cursor::new(bytes))
    }

    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Self, MeshError> {
        let mesh = stl_io::read_stl(reader)?;
        if mesh.faces.is_empty() {
            return Err(MeshError::Empty);
        }

        if let Some(i) = mesh
            .vertices
            .iter()
            .position(|v| !(v[0].is_finite() && v[1].is_finite() && v[2].is_finite()))
        {
            return Err(MeshError::NonFinite(i));
        }

        let vertex = |i: usize| -> [f64; 3] {
            let v = &mesh.vertices[i];
            [v[0] as f64, v[1] as f64, v[2] as f64]
        };

        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for i in 0..mesh.vertices.len() {
            let p = vertex(i);
            for axis in 0..3 {
                min[axis] = min[axis].min(p[axis]);
                max[axis] = max[axis].max(p[axis]);
            }
        }

        // Divergence theorem: sum of signed tetrahedra against the origin.
        let mut volume = 0.0;
        // A directed edge seen twice means two neighbours disagree on orientation.
        let mut edges = HashSet::with_capacity(mesh.faces.len() * 3);
        let mut winding_consistent = true;
        for face in &mesh.faces {
            let [a, b, c] = face.vertices;
            let (p, q, r) = (vertex(a), vertex(b), vertex(c));
            volume += dot(p, cross(q, r)) / 6.0;

            for edge in [(a, b), (b, c), (c, a)] {
                if !edges.insert(edge) {
                    winding_consistent = false;
                }
            }
        }

        Ok(Self {
            faces: mesh.faces.len(),
            volume,
            winding_consistent,
            extents: [max[0] - min[0], max[1] - min[1], max[2] - min[2]],
        })
    }
}

impl MeshMetrics for MeshReport {
    fn volume(&self) -> f64 {
        self.volume
    }

    fn is_winding_consistent(&self) -> bool {
        self.winding_consistent
    }

    fn extents(&self) -> [f64; 3] {
        self.extents
    }
}

fn cross(u: [f64; 3], v: [f64; 3]) -> [f64; 3] {
    [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ]
}

fn dot(u: [f64; 3], v: [f64; 3]) -> f64 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn cube_metrics() {
        let report = MeshReport::from_stl_bytes(&box_stl(10.0, 10.0, 10.0)).unwrap();
        assert_eq!(report.faces, 12);
        assert!((report.volume - 1000.0).abs() < 1e-6);
        assert!(report.winding_consistent);
        assert_eq!(report.extents, [10.0, 10.0, 10.0]);
    }

    #[test]
    fn box_extents_follow_axes() {
        let report = MeshReport::from_stl_bytes(&box_stl(300.0, 20.0, 5.0)).unwrap();
        assert_eq!(report.extents, [300.0, 20.0, 5.0]);
    }

    #[test]
    fn flipped_face_breaks_winding() {
        let report = MeshReport::from_stl_bytes(&flipped_box_stl(10.0, 10.0, 10.0)).unwrap();
        assert!(!report.winding_consistent);
    }

    #[test]
    fn flat_triangle_has_no_volume() {
        let report = MeshReport::from_stl_bytes(&flat_stl()).unwrap();
        assert!(report.volume.abs() < 1e-9);
    }

    #[test]
    fn non_finite_vertex_is_rejected() {
        assert!(matches!(
            MeshReport::from_stl_bytes(&nan_stl()),
            Err(MeshError::NonFinite(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(MeshReport::from_stl_bytes(b"definitely not a mesh").is_err());
    }
}
