//! Camera consumed read-only by light binning.

use glam::{Mat4, Vec3};

pub const DEFAULT_FOVY_DEGREES: f32 = 50.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective { fovy: f32, aspect: f32 },
    Orthographic { left: f32, right: f32, top: f32, bottom: f32 },
}

/// View and projection state for one viewpoint.
///
/// Uses a right-handed view looking down -z and a [0, 1] depth projection.
/// Clip-space y points up; the renderer flips the viewport to match Vulkan.
#[derive(Debug, Clone)]
pub struct Camera {
    projection_kind: Projection,
    near: f32,
    far: f32,
    view: Mat4,
    projection: Mat4,
    inverse_projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(DEFAULT_FOVY_DEGREES.to_radians(), 16.0 / 9.0, DEFAULT_NEAR, DEFAULT_FAR)
    }
}

impl Camera {
    pub fn perspective(fovy: f32, aspect: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            projection_kind: Projection::Perspective { fovy, aspect },
            near,
            far,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            inverse_projection: Mat4::IDENTITY,
        };
        camera.rebuild_projection();
        camera
    }

    pub fn orthographic(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        let mut camera = Self {
            projection_kind: Projection::Orthographic { left, right, top, bottom },
            near,
            far,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            inverse_projection: Mat4::IDENTITY,
        };
        camera.rebuild_projection();
        camera
    }

    fn rebuild_projection(&mut self) {
        self.projection = match self.projection_kind {
            Projection::Perspective { fovy, aspect } => {
                debug_assert!(aspect.abs() > f32::EPSILON, "aspect ratio must be non-zero");
                Mat4::perspective_rh(fovy, aspect, self.near, self.far)
            }
            Projection::Orthographic { left, right, top, bottom } => {
                Mat4::orthographic_rh(left, right, bottom, top, self.near, self.far)
            }
        };
        self.inverse_projection = self.projection.inverse();
    }

    /// Update the aspect ratio after a resize. No-op for orthographic cameras.
    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { fovy, .. } = self.projection_kind {
            self.projection_kind = Projection::Perspective { fovy, aspect };
            self.rebuild_projection();
        }
    }

    pub fn set_near_far(&mut self, near: f32, far: f32) {
        if self.near == near && self.far == far {
            return;
        }
        self.near = near;
        self.far = far;
        self.rebuild_projection();
    }

    pub fn set_view_target(&mut self, eye: Vec3, target: Vec3, up: Vec3) {
        self.view = Mat4::look_at_rh(eye, target, up);
    }

    pub fn set_view_direction(&mut self, eye: Vec3, direction: Vec3, up: Vec3) {
        self.view = Mat4::look_to_rh(eye, direction, up);
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn inverse_projection(&self) -> Mat4 {
        self.inverse_projection
    }

    pub fn near(&self) -> f32 {
        self.near
    }

    pub fn far(&self) -> f32 {
        self.far
    }

    pub fn projection_kind(&self) -> Projection {
        self.projection_kind
    }
}
