use glam::{Mat4, Vec3, Vec4Swizzles};

/// Depth of a world-space point along the camera's forward axis.
///
/// Returns `(depth, view_space_position)`. The view looks down -z, so points
/// in front of the camera have positive depth.
pub fn orthogonal_view_space_depth(world_pos: Vec3, view: Mat4) -> (f32, Vec3) {
    let view_pos = view * world_pos.extend(1.0);
    let view_pos = view_pos.xyz() / view_pos.w;
    (-view_pos.z, view_pos)
}

/// Distance from the near plane to a point along the eye ray through it.
///
/// Negative for points behind the near plane. Undefined for points lying in
/// the eye plane (z == 0).
pub fn perspective_view_space_depth(world_pos: Vec3, view: Mat4, near: f32) -> (f32, Vec3) {
    let view_pos = view * world_pos.extend(1.0);
    let view_pos = view_pos.xyz() / view_pos.w;

    let t = near / Vec3::NEG_Z.dot(view_pos);
    let near_hit = view_pos * t;

    (t.signum() * (view_pos - near_hit).length(), view_pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orthogonal_depth_in_front_is_positive() {
        let view = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let (depth, pos) = orthogonal_view_space_depth(Vec3::new(3.0, 4.0, -25.0), view);
        assert!((depth - 25.0).abs() < 1e-5);
        assert!((pos - Vec3::new(3.0, 4.0, -25.0)).length() < 1e-5);
    }

    #[test]
    fn test_orthogonal_depth_follows_camera() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let (depth, _) = orthogonal_view_space_depth(Vec3::new(0.0, 0.0, -5.0), view);
        assert!((depth - 15.0).abs() < 1e-4);
        let (behind, _) = orthogonal_view_space_depth(Vec3::new(0.0, 0.0, 20.0), view);
        assert!(behind < 0.0);
    }

    #[test]
    fn test_perspective_depth_on_axis_subtracts_near() {
        let view = Mat4::IDENTITY;
        let (depth, _) = perspective_view_space_depth(Vec3::new(0.0, 0.0, -10.0), view, 0.5);
        assert!((depth - 9.5).abs() < 1e-5);
    }
}
