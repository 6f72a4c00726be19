//! Sphere patch geometry for a tile.

use super::{Tile, MICRODEGREES_PER_DEGREE};
use crate::math::{Angle, LatLon};

/// Vertex data of one tile: an `(N+1)²` grid of points on the sphere.
///
/// `positions` holds `x, y, z` triples and `texcoords` holds `u, v` pairs,
/// both row by row from the tile's south-west corner. Texture rows are
/// flipped (`v = 1 − j/N`) so image row 0 maps to the northern edge.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMesh {
    pub positions: Vec<f32>,
    pub texcoords: Vec<f32>,
    resolution: u32,
}

impl TileMesh {
    /// Tessellates `tile` into `resolution` × `resolution` quads on a sphere.
    /// A resolution of 0 is treated as 1.
    pub fn build(tile: &Tile, resolution: u32, radius: f64) -> Self {
        let n = resolution.max(1);
        let vertices = ((n + 1) * (n + 1)) as usize;
        let mut positions = Vec::with_capacity(vertices * 3);
        let mut texcoords = Vec::with_capacity(vertices * 2);

        let step_lon = tile.width() as f64 / n as f64;
        let step_lat = tile.height() as f64 / n as f64;
        let to_degrees = |microdegrees: f64| microdegrees / MICRODEGREES_PER_DEGREE as f64;

        for j in 0..=n {
            let lat = Angle::from_degrees(to_degrees(tile.lat() as f64 + j as f64 * step_lat));
            for i in 0..=n {
                let lon =
                    Angle::from_degrees(to_degrees(tile.lon() as f64 + i as f64 * step_lon));
                let point = LatLon::new(lat, lon).to_cartesian(radius);
                positions.extend_from_slice(&[point.x as f32, point.y as f32, point.z as f32]);
                texcoords.extend_from_slice(&[i as f32 / n as f32, 1.0 - j as f32 / n as f32]);
            }
        }

        Self {
            positions,
            texcoords,
            resolution: n,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }
}

/// Triangle indices shared by every tile mesh of the given resolution.
///
/// Each quad `(i0, i1, i2, i3)` with `i0` at the lower-left is split into
/// `(i0, i1, i2)` and `(i2, i1, i3)`.
pub fn grid_indices(resolution: u32) -> Vec<u32> {
    let n = resolution.max(1);
    let stride = n + 1;
    let mut indices = Vec::with_capacity((n * n * 6) as usize);
    for j in 0..n {
        for i in 0..n {
            let i0 = j * stride + i;
            let i1 = i0 + 1;
            let i2 = i0 + stride;
            let i3 = i2 + 1;
            indices.extend_from_slice(&[i0, i1, i2, i2, i1, i3]);
        }
    }
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{degrees_to_microdegrees as deg, Level, TileKey, TileRegistry};

    struct NoopRegistry;

    impl TileRegistry for NoopRegistry {
        fn reference(&mut self, _key: &TileKey) {}
    }

    fn first_tile(tile_degrees: f64) -> Tile {
        let mut level = Level::new(0, deg(tile_degrees), deg(tile_degrees)).unwrap();
        level.update(&mut NoopRegistry);
        let tile = *level.visible_tiles().next().unwrap();
        tile
    }

    #[test]
    fn test_mesh_sizes() {
        let mesh = TileMesh::build(&first_tile(45.0), 4, 1.0);
        assert_eq!(mesh.vertex_count(), 25);
        assert_eq!(mesh.positions.len(), 75);
        assert_eq!(mesh.texcoords.len(), 50);
        assert_eq!(mesh.resolution(), 4);
    }

    #[test]
    fn test_vertices_lie_on_sphere() {
        let mesh = TileMesh::build(&first_tile(45.0), 8, 100.0);
        for point in mesh.positions.chunks(3) {
            let length = (point[0] * point[0] + point[1] * point[1] + point[2] * point[2]).sqrt();
            assert!((length - 100.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_corners_and_uv_flip() {
        // 45° level at centre (0, 0): first visible tile starts at (-180°, -90°).
        let tile = first_tile(45.0);
        assert_eq!((tile.lon(), tile.lat()), (deg(-180.0), deg(-90.0)));

        let mesh = TileMesh::build(&tile, 2, 1.0);
        assert_eq!(&mesh.texcoords[0..2], &[0.0, 1.0]);
        let last = mesh.texcoords.len() - 2;
        assert_eq!(&mesh.texcoords[last..], &[1.0, 0.0]);

        // South pole first.
        assert!((mesh.positions[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_resolution_is_one_quad() {
        let mesh = TileMesh::build(&first_tile(45.0), 0, 1.0);
        assert_eq!(mesh.vertex_count(), 4);
        assert_eq!(grid_indices(0).len(), 6);
    }

    #[test]
    fn test_grid_indices() {
        let indices = grid_indices(3);
        assert_eq!(indices.len(), 3 * 3 * 6);
        assert_eq!(&indices[0..6], &[0, 1, 4, 4, 1, 5]);
        assert!(indices.iter().all(|&index| index < 16));
    }
}
