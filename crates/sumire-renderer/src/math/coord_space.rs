use glam::{Mat4, Vec2, Vec4, Vec4Swizzles};

/// Unproject a clip-space point into view space.
pub fn clip_to_view(clip: Vec4, inv_projection: Mat4) -> Vec4 {
    let view = inv_projection * clip;
    view / view.w
}

/// Unproject a screen-space pixel position into view space.
///
/// `screen.xy` is in pixels with the origin at the top-left corner,
/// `screen.zw` are passed through as clip depth and w. Screen y grows
/// downward while clip y grows upward (the renderer flips the viewport).
pub fn screen_to_view(screen: Vec4, screen_dim: Vec2, inv_projection: Mat4) -> Vec4 {
    let ndc = screen.xy() / screen_dim;
    let flipped = Vec2::new(ndc.x, 1.0 - ndc.y) * 2.0 - 1.0;
    let clip = Vec4::new(flipped.x, flipped.y, screen.z, screen.w);

    clip_to_view(clip, inv_projection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_center_unprojects_onto_view_axis() {
        let proj = Mat4::perspective_rh(50f32.to_radians(), 16.0 / 9.0, 0.1, 1000.0);
        let dim = Vec2::new(1920.0, 1080.0);
        let p = screen_to_view(Vec4::new(960.0, 540.0, 0.5, 1.0), dim, proj.inverse());
        assert!(p.x.abs() < 1e-4);
        assert!(p.y.abs() < 1e-4);
        assert!(p.z < 0.0, "camera looks down -z, got {}", p.z);
    }

    #[test]
    fn test_screen_top_left_is_up_and_left() {
        let proj = Mat4::perspective_rh(50f32.to_radians(), 1.0, 0.1, 1000.0);
        let dim = Vec2::new(512.0, 512.0);
        let p = screen_to_view(Vec4::new(0.0, 0.0, -1.0, 1.0), dim, proj.inverse());
        assert!(p.x < 0.0);
        assert!(p.y > 0.0);
        assert!(p.z < 0.0);
        // Symmetric frustum: corner ray has equal x and y magnitude
        assert!((p.x.abs() - p.y.abs()).abs() < 1e-4);
    }

    #[test]
    fn test_clip_to_view_round_trips_projection() {
        let proj = Mat4::perspective_rh(60f32.to_radians(), 1.5, 0.5, 200.0);
        let view_point = Vec4::new(3.0, -2.0, -40.0, 1.0);
        let clip = proj * view_point;
        let back = clip_to_view(clip, proj.inverse());
        assert!((back.xyz() - view_point.xyz()).length() < 1e-3);
        assert!((back.w - 1.0).abs() < 1e-6);
    }
}
