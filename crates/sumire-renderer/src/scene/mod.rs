//! Camera and light collaborators consumed by the shadow mapper.

pub mod camera;
pub mod light;

pub use camera::{Camera, Projection};
pub use light::{Light, LightId, LightKind, LightMap, LightRegistry, LightShaderData};
