//! Mesh Voxelizer: triangulated surface to colored occupancy grid.
//!
//! ## Algorithm
//!
//! 1. Tile the mesh's axis-aligned bounding box into cells of edge
//!    `resolution`; cell `(i, j, k)` is centered at
//!    `min + (i + 0.5, j + 0.5, k + 0.5) * resolution`.
//! 2. Reject centers outside the mesh's bounding sphere.
//! 3. Cast a ray from each remaining center and count Möller–Trumbore hits
//!    against every non-degenerate triangle, skipping triangles whose
//!    bounding sphere the ray cannot reach. An odd count means inside.
//! 4. Color each inside cell from the nearest triangle's source color,
//!    quantized to the palette.
//!
//! The ray direction is fixed and very slightly skewed off +X, so rays cast
//! from a regular lattice of centers do not run along shared triangle edges
//! of axis-aligned geometry.
//!
//! Cost is O(cells × triangles). Non-manifold meshes may misclassify.
//! Grids wider than `COORD_LIMIT` on any axis, or with more than the
//! configured cell cap in total, are rejected before sampling.

use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::types::{
    validate_resolution, ColorId, GeometryError, GridPos, Mesh, MeshColors, Palette, Rgb, Voxel,
    VoxelCloud, COORD_LIMIT,
};

/// Tolerance for parallel rays, degenerate triangles and self-hits.
const EPSILON: f64 = 1e-10;

/// Parity ray direction (normalized at use).
const RAY_DIRECTION: [f64; 3] = [1.0, 0.000_137, 0.000_071];

/// Default cap on the number of cells a single voxelization may sample.
pub const DEFAULT_MAX_GRID_CELLS: u64 = 1 << 26;

/// Placement of the voxel grid in mesh space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridExtents {
    /// Mesh-space corner of cell `(0, 0, 0)`.
    pub origin: [f64; 3],
    /// Cell edge length.
    pub resolution: f64,
    /// Cells along each axis.
    pub dims: [u32; 3],
}

impl GridExtents {
    /// Mesh-space center of a cell.
    pub fn cell_center(&self, pos: GridPos) -> [f64; 3] {
        let c = |o: f64, i: i32| o + (f64::from(i) + 0.5) * self.resolution;
        [
            c(self.origin[0], pos.x),
            c(self.origin[1], pos.y),
            c(self.origin[2], pos.z),
        ]
    }

    /// Total cells sampled.
    pub fn cell_count(&self) -> u64 {
        self.dims.iter().map(|&d| u64::from(d)).product()
    }
}

/// Voxelization result.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelizeOutput {
    /// Occupied cells.
    pub cloud: VoxelCloud,
    /// Grid placement. `None` for an empty mesh.
    pub extents: Option<GridExtents>,
}

/// A triangle prepared for repeated ray and distance queries.
#[derive(Debug, Clone)]
struct Triangle {
    face: usize,
    v0: Point3<f64>,
    v1: Point3<f64>,
    v2: Point3<f64>,
    edge1: Vector3<f64>,
    edge2: Vector3<f64>,
    center: Point3<f64>,
    radius: f64,
}

impl Triangle {
    fn new(face: usize, [a, b, c]: [[f64; 3]; 3]) -> Option<Self> {
        let v0 = Point3::from(a);
        let v1 = Point3::from(b);
        let v2 = Point3::from(c);
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;
        if edge1.cross(&edge2).norm() <= EPSILON {
            return None;
        }
        let center = Point3::from((v0.coords + v1.coords + v2.coords) / 3.0);
        let radius = [v0, v1, v2]
            .iter()
            .map(|v| (v - center).norm())
            .fold(0.0, f64::max);
        Some(Self {
            face,
            v0,
            v1,
            v2,
            edge1,
            edge2,
            center,
            radius,
        })
    }

    /// Whether a ray can possibly reach this triangle's bounding sphere.
    fn ray_may_hit(&self, origin: &Point3<f64>, dir: &Vector3<f64>) -> bool {
        let to_center = self.center - origin;
        let along = to_center.dot(dir);
        let r = self.radius + EPSILON;
        if along < -r {
            return false;
        }
        let dist_sq = to_center.norm_squared() - along.max(0.0).powi(2);
        dist_sq <= r * r
    }

    fn ray_hit(&self, origin: &Point3<f64>, dir: &Vector3<f64>) -> Option<f64> {
        ray_triangle_intersect(origin, dir, &self.v0, &self.edge1, &self.edge2)
    }
}

/// Möller–Trumbore ray-triangle intersection.
///
/// Returns the forward distance `t` along `dir`, or `None` for parallel rays,
/// hits outside the triangle, and hits at or behind the origin.
pub fn ray_triangle_intersect(
    origin: &Point3<f64>,
    dir: &Vector3<f64>,
    v0: &Point3<f64>,
    edge1: &Vector3<f64>,
    edge2: &Vector3<f64>,
) -> Option<f64> {
    let p = dir.cross(edge2);
    let det = edge1.dot(&p);
    if det.abs() < EPSILON {
        return None;
    }

    let inv_det = 1.0 / det;
    let s = origin - v0;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = dir.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = edge2.dot(&q) * inv_det;
    (t > EPSILON).then_some(t)
}

/// Closest point on triangle `abc` to `p`, with its barycentric weights.
fn closest_point(p: &Point3<f64>, tri: &Triangle) -> (Point3<f64>, [f64; 3]) {
    let (a, b, c) = (tri.v0, tri.v1, tri.v2);
    let ab = tri.edge1;
    let ac = tri.edge2;

    let ap = p - a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (a, [1.0, 0.0, 0.0]);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (b, [0.0, 1.0, 0.0]);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let t = d1 / (d1 - d3);
        return (a + ab * t, [1.0 - t, t, 0.0]);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (c, [0.0, 0.0, 1.0]);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let t = d2 / (d2 - d6);
        return (a + ac * t, [1.0 - t, 0.0, t]);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let t = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return (b + (c - b) * t, [0.0, 1.0 - t, t]);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    (a + ab * v + ac * w, [1.0 - v - w, v, w])
}

/// Converts meshes to voxel clouds.
#[derive(Debug, Clone)]
pub struct MeshVoxelizer {
    palette: Palette,
    default_color: ColorId,
    parallel: bool,
    max_cells: u64,
}

impl MeshVoxelizer {
    /// Create a voxelizer. Uncolored meshes get `default_color`.
    pub fn new(palette: Palette, default_color: ColorId) -> Self {
        Self {
            palette,
            default_color,
            parallel: true,
            max_cells: DEFAULT_MAX_GRID_CELLS,
        }
    }

    /// Cap the total number of cells sampled per mesh.
    pub fn with_max_cells(mut self, max_cells: u64) -> Self {
        self.max_cells = max_cells;
        self
    }

    /// Enable or disable slab-parallel sampling.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Palette used for color quantization.
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Voxelize a mesh.
    ///
    /// An empty mesh (no vertices, no faces) yields an empty cloud without
    /// error.
    pub fn voxelize(&self, mesh: &Mesh, resolution: f64) -> Result<VoxelizeOutput, GeometryError> {
        validate_resolution(resolution)?;
        mesh.validate()?;

        if mesh.is_empty() {
            tracing::info!("Empty mesh, nothing to voxelize");
            return Ok(VoxelizeOutput {
                cloud: VoxelCloud::new(),
                extents: None,
            });
        }

        let triangles: Vec<Triangle> = (0..mesh.faces.len())
            .filter_map(|face| Triangle::new(face, mesh.triangle(face)))
            .collect();
        let skipped = mesh.faces.len() - triangles.len();
        if skipped > 0 {
            tracing::debug!(skipped, "Skipped degenerate triangles");
        }

        let (min, max) = bounding_box(&mesh.vertices);
        let dims = grid_dims(min, max, resolution, self.max_cells)?;
        let extents = GridExtents {
            origin: min,
            resolution,
            dims,
        };

        let sphere_center = Point3::from([0, 1, 2].map(|a| (min[a] + max[a]) / 2.0));
        let sphere_radius = [0, 1, 2]
            .map(|a| (max[a] - min[a]) / 2.0)
            .iter()
            .map(|h| h * h)
            .sum::<f64>()
            .sqrt()
            + resolution;

        let dir = Vector3::from(RAY_DIRECTION).normalize();
        let sample_slab = |k: u32| -> Vec<Voxel> {
            let mut out = Vec::new();
            if triangles.is_empty() {
                return out;
            }
            for j in 0..dims[1] {
                for i in 0..dims[0] {
                    // Axes are bounded by COORD_LIMIT in grid_dims.
                    let pos = GridPos::new(i as i32, j as i32, k as i32);
                    let center = Point3::from(extents.cell_center(pos));
                    if (center - sphere_center).norm() > sphere_radius {
                        continue;
                    }
                    if self.is_inside(&center, &dir, &triangles) {
                        let color = self.sample_color(mesh, &center, &triangles);
                        out.push(Voxel { pos, color });
                    }
                }
            }
            out
        };

        let slabs: Vec<Vec<Voxel>> = if self.parallel {
            (0..dims[2]).into_par_iter().map(sample_slab).collect()
        } else {
            (0..dims[2]).map(sample_slab).collect()
        };
        let cloud: VoxelCloud = slabs.into_iter().flatten().collect();

        tracing::info!(
            triangles = triangles.len(),
            cells_sampled = extents.cell_count(),
            voxels = cloud.len(),
            resolution,
            "Voxelization complete"
        );

        Ok(VoxelizeOutput {
            cloud,
            extents: Some(extents),
        })
    }

    fn is_inside(&self, origin: &Point3<f64>, dir: &Vector3<f64>, triangles: &[Triangle]) -> bool {
        let hits = triangles
            .iter()
            .filter(|t| t.ray_may_hit(origin, dir))
            .filter(|t| t.ray_hit(origin, dir).is_some())
            .count();
        hits % 2 == 1
    }

    fn sample_color(&self, mesh: &Mesh, p: &Point3<f64>, triangles: &[Triangle]) -> ColorId {
        let rgb = match &mesh.colors {
            MeshColors::None => None,
            MeshColors::PerFace(c) => nearest_triangle(p, triangles).map(|(tri, _)| c[tri.face]),
            MeshColors::PerVertex(c) => nearest_triangle(p, triangles).map(|(tri, weights)| {
                let [a, b, d] = mesh.faces[tri.face];
                Rgb::blend(&[
                    (c[a as usize], weights[0]),
                    (c[b as usize], weights[1]),
                    (c[d as usize], weights[2]),
                ])
            }),
        };
        rgb.and_then(|rgb| self.palette.nearest(rgb))
            .unwrap_or(self.default_color)
    }
}

impl Default for MeshVoxelizer {
    fn default() -> Self {
        Self::new(Palette::standard(), ColorId(15))
    }
}

/// Nearest triangle to `p` (lowest face index on ties) with barycentric
/// weights of the closest point.
fn nearest_triangle<'a>(p: &Point3<f64>, triangles: &'a [Triangle]) -> Option<(&'a Triangle, [f64; 3])> {
    let mut best: Option<(&Triangle, [f64; 3], f64)> = None;
    for tri in triangles {
        let (q, weights) = closest_point(p, tri);
        let d = (q - p).norm_squared();
        if best.as_ref().map_or(true, |(_, _, bd)| d < *bd) {
            best = Some((tri, weights, d));
        }
    }
    best.map(|(t, w, _)| (t, w))
}

/// Cells per axis covering `[min, max]`, at least one each.
fn grid_dims(
    min: [f64; 3],
    max: [f64; 3],
    resolution: f64,
    max_cells: u64,
) -> Result<[u32; 3], GeometryError> {
    let cells = [0, 1, 2].map(|axis| ((max[axis] - min[axis]) / resolution).ceil().max(1.0));
    // Float to int casts saturate, and infinity lands on u64::MAX.
    let wide = cells.map(|c| c as u64);
    let total = wide.iter().fold(1u64, |acc, &d| acc.saturating_mul(d));
    let axis_limit = COORD_LIMIT as u64;
    if wide.iter().any(|&d| d > axis_limit) || total > max_cells {
        return Err(GeometryError::GridTooLarge {
            dims: wide,
            max_cells,
        });
    }
    Ok(wide.map(|d| d as u32))
}

fn bounding_box(vertices: &[[f64; 3]]) -> ([f64; 3], [f64; 3]) {
    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for v in vertices {
        for axis in 0..3 {
            min[axis] = min[axis].min(v[axis]);
            max[axis] = max[axis].max(v[axis]);
        }
    }
    (min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uv_sphere(radius: f64, stacks: u32, slices: u32) -> Mesh {
        let mut vertices = vec![[0.0, 0.0, radius]];
        for i in 1..stacks {
            let phi = std::f64::consts::PI * f64::from(i) / f64::from(stacks);
            for j in 0..slices {
                let theta = 2.0 * std::f64::consts::PI * f64::from(j) / f64::from(slices);
                vertices.push([
                    radius * phi.sin() * theta.cos(),
                    radius * phi.sin() * theta.sin(),
                    radius * phi.cos(),
                ]);
            }
        }
        vertices.push([0.0, 0.0, -radius]);
        let bottom = (vertices.len() - 1) as u32;
        let ring = |i: u32, j: u32| 1 + (i - 1) * slices + (j % slices);

        let mut faces = Vec::new();
        for j in 0..slices {
            faces.push([0, ring(1, j), ring(1, j + 1)]);
            faces.push([bottom, ring(stacks - 1, j + 1), ring(stacks - 1, j)]);
        }
        for i in 1..stacks - 1 {
            for j in 0..slices {
                faces.push([ring(i, j), ring(i + 1, j), ring(i + 1, j + 1)]);
                faces.push([ring(i, j), ring(i + 1, j + 1), ring(i, j + 1)]);
            }
        }
        Mesh::new(vertices, faces)
    }

    #[test]
    fn test_ray_hits_triangle_in_front() {
        let v0 = Point3::new(2.0, -1.0, -1.0);
        let e1 = Vector3::new(0.0, 2.0, 0.0);
        let e2 = Vector3::new(0.0, 0.0, 2.0);
        let dir = Vector3::new(1.0, 0.0, 0.0);

        let t = ray_triangle_intersect(&Point3::new(0.0, -0.5, -0.5), &dir, &v0, &e1, &e2);
        assert!((t.unwrap() - 2.0).abs() < 1e-9);

        // Behind the origin.
        assert!(ray_triangle_intersect(&Point3::new(3.0, -0.5, -0.5), &dir, &v0, &e1, &e2).is_none());
        // Parallel to the plane.
        let along = Vector3::new(0.0, 1.0, 0.0);
        assert!(ray_triangle_intersect(&Point3::new(0.0, 0.0, 0.0), &along, &v0, &e1, &e2).is_none());
        // Outside the barycentric bounds.
        assert!(ray_triangle_intersect(&Point3::new(0.0, 0.9, 0.9), &dir, &v0, &e1, &e2).is_none());
    }

    #[test]
    fn test_box_fills_every_cell() {
        let mesh = Mesh::axis_aligned_box([0.0; 3], [8.0, 4.0, 1.0]);
        let out = MeshVoxelizer::default().voxelize(&mesh, 1.0).unwrap();
        let extents = out.extents.unwrap();
        assert_eq!(extents.dims, [8, 4, 1]);
        assert_eq!(out.cloud.len(), 32);
        assert!(out.cloud.iter().all(|v| v.color == ColorId(15)));
    }

    #[test]
    fn test_half_resolution_box() {
        let mesh = Mesh::axis_aligned_box([-1.0; 3], [1.0; 3]);
        let out = MeshVoxelizer::default().voxelize(&mesh, 0.5).unwrap();
        assert_eq!(out.cloud.len(), 64);
    }

    #[test]
    fn test_sphere_volume_is_plausible() {
        let mesh = uv_sphere(5.0, 24, 32);
        let out = MeshVoxelizer::default().voxelize(&mesh, 1.0).unwrap();
        let expected = 4.0 / 3.0 * std::f64::consts::PI * 125.0;
        let actual = out.cloud.len() as f64;
        assert!((actual - expected).abs() / expected < 0.15, "got {actual} voxels");
        assert!(out.cloud.contains(GridPos::new(5, 5, 5)));
        assert!(!out.cloud.contains(GridPos::new(0, 0, 0)));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mesh = uv_sphere(3.0, 12, 16);
        let par = MeshVoxelizer::default().voxelize(&mesh, 0.5).unwrap();
        let seq = MeshVoxelizer::default()
            .with_parallel(false)
            .voxelize(&mesh, 0.5)
            .unwrap();
        assert_eq!(par, seq);
    }

    #[test]
    fn test_empty_mesh_yields_empty_cloud() {
        let out = MeshVoxelizer::default().voxelize(&Mesh::default(), 1.0).unwrap();
        assert!(out.cloud.is_empty());
        assert!(out.extents.is_none());
    }

    #[test]
    fn test_degenerate_triangles_are_skipped() {
        let mut mesh = Mesh::axis_aligned_box([0.0; 3], [2.0; 3]);
        mesh.faces.push([0, 0, 1]);
        mesh.faces.push([0, 1, 1]);
        let out = MeshVoxelizer::default().voxelize(&mesh, 1.0).unwrap();
        assert_eq!(out.cloud.len(), 8);
    }

    #[test]
    fn test_rejects_bad_input() {
        let mesh = Mesh::axis_aligned_box([0.0; 3], [1.0; 3]);
        assert!(matches!(
            MeshVoxelizer::default().voxelize(&mesh, 0.0),
            Err(GeometryError::InvalidResolution(_))
        ));

        let mut bad = mesh.clone();
        bad.vertices[0][0] = f64::INFINITY;
        assert!(matches!(
            MeshVoxelizer::default().voxelize(&bad, 1.0),
            Err(GeometryError::NonFiniteVertex { .. })
        ));
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let mesh = Mesh::axis_aligned_box([0.0; 3], [1.0; 3]);
        match MeshVoxelizer::default().voxelize(&mesh, 1e-12) {
            Err(GeometryError::GridTooLarge { dims, max_cells }) => {
                assert!(dims.iter().all(|&d| d > COORD_LIMIT as u64));
                assert_eq!(max_cells, DEFAULT_MAX_GRID_CELLS);
            }
            other => panic!("unexpected result {other:?}"),
        }

        // 4 x 4 x 1 cells against a cap of 10.
        let slab = Mesh::axis_aligned_box([0.0; 3], [4.0, 4.0, 1.0]);
        let capped = MeshVoxelizer::default().with_max_cells(10);
        assert_eq!(
            capped.voxelize(&slab, 1.0),
            Err(GeometryError::GridTooLarge {
                dims: [4, 4, 1],
                max_cells: 10
            })
        );
        assert_eq!(
            MeshVoxelizer::default()
                .with_max_cells(16)
                .voxelize(&slab, 1.0)
                .unwrap()
                .cloud
                .len(),
            16
        );
    }

    #[test]
    fn test_per_face_colors() {
        let mesh = Mesh::axis_aligned_box([0.0; 3], [2.0; 3])
            .with_colors(MeshColors::PerFace(vec![Rgb::new(255, 0, 0); 12]));
        let out = MeshVoxelizer::default().voxelize(&mesh, 1.0).unwrap();
        assert!(out.cloud.iter().all(|v| v.color == ColorId(4)));
    }

    #[test]
    fn test_per_vertex_colors_interpolate() {
        let red = Rgb::new(255, 0, 0);
        let blue = Rgb::new(0, 0, 255);
        let mesh = Mesh::axis_aligned_box([0.0; 3], [1.0, 1.0, 4.0])
            .with_colors(MeshColors::PerVertex(vec![red, red, red, red, blue, blue, blue, blue]));
        let out = MeshVoxelizer::default().voxelize(&mesh, 1.0).unwrap();
        assert_eq!(out.cloud.get(GridPos::new(0, 0, 0)), Some(ColorId(4)));
        assert_eq!(out.cloud.get(GridPos::new(0, 0, 3)), Some(ColorId(1)));
    }

    #[test]
    fn test_cell_center() {
        let extents = GridExtents {
            origin: [1.0, 2.0, 3.0],
            resolution: 0.5,
            dims: [2, 2, 2],
        };
        assert_eq!(extents.cell_center(GridPos::new(1, 0, 1)), [1.75, 2.25, 3.75]);
        assert_eq!(extents.cell_count(), 8);
    }
}
