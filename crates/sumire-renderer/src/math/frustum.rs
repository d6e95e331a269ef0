//! Tile frustum planes for light culling.

use glam::Vec3;

/// A plane through view space, `dot(normal, p) == distance` on the plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Plane {
    pub normal: Vec3,
    pub distance: f32,
}

impl Plane {
    /// Triangulate a plane from three points with positive winding.
    ///
    /// For tile frusta `p0` is the eye, so the resulting normal points out of
    /// the frustum when the corners are passed counter-clockwise as seen from
    /// outside.
    pub fn from_points(p0: Vec3, p1: Vec3, p2: Vec3) -> Self {
        let normal = (p1 - p0).cross(p2 - p0).normalize();
        Self {
            normal,
            distance: normal.dot(p0),
        }
    }

    /// Signed distance from the plane along its normal.
    #[inline]
    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.distance
    }

    /// True unless the sphere lies entirely on the positive (outer) side.
    #[inline]
    pub fn sphere_inside(&self, center: Vec3, radius: f32) -> bool {
        self.signed_distance(center) - radius < 0.0
    }
}

/// Four side planes of a screen tile's sub-frustum, all passing through the eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileFrustum {
    pub top: Plane,
    pub bottom: Plane,
    pub left: Plane,
    pub right: Plane,
}

impl TileFrustum {
    /// Build from the view-space positions of the tile's four corners.
    pub fn from_corners(top_left: Vec3, top_right: Vec3, bottom_left: Vec3, bottom_right: Vec3) -> Self {
        let origin = Vec3::ZERO;
        Self {
            top: Plane::from_points(origin, top_right, top_left),
            bottom: Plane::from_points(origin, bottom_left, bottom_right),
            right: Plane::from_points(origin, bottom_right, top_right),
            left: Plane::from_points(origin, top_left, bottom_left),
        }
    }

    /// Sphere against all four side planes.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.top.sphere_inside(center, radius)
            && self.bottom.sphere_inside(center, radius)
            && self.left.sphere_inside(center, radius)
            && self.right.sphere_inside(center, radius)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tile() -> TileFrustum {
        // 90 degree tile looking down -z
        TileFrustum::from_corners(
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
        )
    }

    #[test]
    fn test_plane_from_points_passes_through_points() {
        let p0 = Vec3::new(1.0, 2.0, 3.0);
        let p1 = Vec3::new(4.0, 2.0, 3.0);
        let p2 = Vec3::new(1.0, 5.0, 3.0);
        let plane = Plane::from_points(p0, p1, p2);
        assert!((plane.normal - Vec3::Z).length() < 1e-6);
        for p in [p0, p1, p2] {
            assert!(plane.signed_distance(p).abs() < 1e-5);
        }
    }

    #[test]
    fn test_tile_plane_normals_point_outward() {
        let tile = unit_tile();
        assert!(tile.top.normal.y > 0.0);
        assert!(tile.bottom.normal.y < 0.0);
        assert!(tile.right.normal.x > 0.0);
        assert!(tile.left.normal.x < 0.0);
    }

    #[test]
    fn test_sphere_on_axis_is_inside() {
        let tile = unit_tile();
        assert!(tile.intersects_sphere(Vec3::new(0.0, 0.0, -10.0), 0.1));
    }

    #[test]
    fn test_sphere_outside_side_plane() {
        let tile = unit_tile();
        // Far to the right: distance to right plane is (20 - 10) / sqrt(2)
        let center = Vec3::new(20.0, 0.0, -10.0);
        let dist = tile.right.signed_distance(center);
        assert!((dist - 10.0 / 2f32.sqrt()).abs() < 1e-4);
        assert!(!tile.intersects_sphere(center, dist - 0.01));
        assert!(tile.intersects_sphere(center, dist + 0.01));
    }

    #[test]
    fn test_sphere_behind_eye_rejected() {
        let tile = unit_tile();
        // Behind the camera the side planes exclude everything off-axis
        assert!(!tile.intersects_sphere(Vec3::new(0.0, 5.0, 10.0), 1.0));
    }
}
