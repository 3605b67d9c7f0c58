//! Triangulated surface input.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::color::Rgb;
use super::grid::GridPos;

/// Fatal input errors raised before voxelization.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// A vertex coordinate is NaN or infinite.
    #[error("Vertex {index} has a non-finite coordinate")]
    NonFiniteVertex {
        /// Offending vertex index.
        index: usize,
    },

    /// A face references a vertex that does not exist.
    #[error("Face {face} references vertex {vertex}, but the mesh has {vertex_count} vertices")]
    FaceIndexOutOfRange {
        /// Offending face index.
        face: usize,
        /// Referenced vertex index.
        vertex: u32,
        /// Number of vertices.
        vertex_count: usize,
    },

    /// Vertices were supplied without any faces.
    #[error("Mesh has {vertex_count} vertices but an empty face list")]
    MissingFaces {
        /// Number of vertices.
        vertex_count: usize,
    },

    /// Color list length does not match the element it annotates.
    #[error("Mesh has {actual} {kind} colors, expected {expected}")]
    ColorCountMismatch {
        /// "per-vertex" or "per-face".
        kind: &'static str,
        /// Expected count.
        expected: usize,
        /// Supplied count.
        actual: usize,
    },

    /// Normal list length does not match the vertex count.
    #[error("Mesh has {actual} normals, expected {expected}")]
    NormalCountMismatch {
        /// Expected count.
        expected: usize,
        /// Supplied count.
        actual: usize,
    },

    /// Resolution must be finite and strictly positive.
    #[error("Invalid resolution: {0}")]
    InvalidResolution(f64),

    /// A cell lies outside `±COORD_LIMIT`.
    #[error("Cell {pos} is outside the supported coordinate range")]
    CoordinateOutOfRange {
        /// Offending cell.
        pos: GridPos,
    },

    /// The sampling grid exceeds the configured size.
    #[error("Grid of {dims:?} cells exceeds the limit of {max_cells} cells")]
    GridTooLarge {
        /// Cells per axis.
        dims: [u64; 3],
        /// Configured cap on the total cell count.
        max_cells: u64,
    },
}

/// Optional color annotation on a mesh.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum MeshColors {
    /// No color data.
    #[default]
    None,
    /// One color per vertex.
    PerVertex(Vec<Rgb>),
    /// One color per face.
    PerFace(Vec<Rgb>),
}

/// Triangulated surface in mesh units.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Mesh {
    /// Vertex positions.
    pub vertices: Vec<[f64; 3]>,
    /// Triangles as vertex index triples.
    pub faces: Vec<[u32; 3]>,
    /// Optional colors.
    #[serde(default)]
    pub colors: MeshColors,
    /// Optional per-vertex normals. Carried through validation; not used for
    /// classification, which relies on parity only.
    #[serde(default)]
    pub normals: Option<Vec<[f64; 3]>>,
}

impl Mesh {
    /// Create an uncolored mesh.
    pub fn new(vertices: Vec<[f64; 3]>, faces: Vec<[u32; 3]>) -> Self {
        Self {
            vertices,
            faces,
            colors: MeshColors::None,
            normals: None,
        }
    }

    /// Attach colors.
    pub fn with_colors(mut self, colors: MeshColors) -> Self {
        self.colors = colors;
        self
    }

    /// Attach normals.
    pub fn with_normals(mut self, normals: Vec<[f64; 3]>) -> Self {
        self.normals = Some(normals);
        self
    }

    /// Whether the mesh has neither vertices nor faces.
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() && self.faces.is_empty()
    }

    /// Check structural validity.
    pub fn validate(&self) -> Result<(), GeometryError> {
        if self.is_empty() {
            return Ok(());
        }

        if let Some(index) = self
            .vertices
            .iter()
            .position(|v| v.iter().any(|c| !c.is_finite()))
        {
            return Err(GeometryError::NonFiniteVertex { index });
        }

        if self.faces.is_empty() {
            return Err(GeometryError::MissingFaces {
                vertex_count: self.vertices.len(),
            });
        }

        let vertex_count = self.vertices.len();
        for (face, tri) in self.faces.iter().enumerate() {
            if let Some(&vertex) = tri.iter().find(|&&i| i as usize >= vertex_count) {
                return Err(GeometryError::FaceIndexOutOfRange {
                    face,
                    vertex,
                    vertex_count,
                });
            }
        }

        match &self.colors {
            MeshColors::None => {}
            MeshColors::PerVertex(c) if c.len() != vertex_count => {
                return Err(GeometryError::ColorCountMismatch {
                    kind: "per-vertex",
                    expected: vertex_count,
                    actual: c.len(),
                });
            }
            MeshColors::PerFace(c) if c.len() != self.faces.len() => {
                return Err(GeometryError::ColorCountMismatch {
                    kind: "per-face",
                    expected: self.faces.len(),
                    actual: c.len(),
                });
            }
            _ => {}
        }

        if let Some(normals) = &self.normals {
            if normals.len() != vertex_count {
                return Err(GeometryError::NormalCountMismatch {
                    expected: vertex_count,
                    actual: normals.len(),
                });
            }
        }

        Ok(())
    }

    /// Vertex positions of a face.
    pub fn triangle(&self, face: usize) -> [[f64; 3]; 3] {
        let [a, b, c] = self.faces[face];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Closed, outward-wound axis-aligned box.
    pub fn axis_aligned_box(min: [f64; 3], max: [f64; 3]) -> Self {
        let [x0, y0, z0] = min;
        let [x1, y1, z1] = max;
        let vertices = vec![
            [x0, y0, z0],
            [x1, y0, z0],
            [x1, y1, z0],
            [x0, y1, z0],
            [x0, y0, z1],
            [x1, y0, z1],
            [x1, y1, z1],
            [x0, y1, z1],
        ];
        let faces = vec![
            [0, 2, 1],
            [0, 3, 2],
            [4, 5, 6],
            [4, 6, 7],
            [0, 1, 5],
            [0, 5, 4],
            [2, 3, 7],
            [2, 7, 6],
            [1, 2, 6],
            [1, 6, 5],
            [0, 4, 7],
            [0, 7, 3],
        ];
        Self::new(vertices, faces)
    }
}

/// Validate a grid resolution.
pub fn validate_resolution(resolution: f64) -> Result<(), GeometryError> {
    if resolution.is_finite() && resolution > 0.0 {
        Ok(())
    } else {
        Err(GeometryError::InvalidResolution(resolution))
    }
}
