//! Coordinate-space conversions, tile frustum planes, and view-space depth.

pub mod coord_space;
pub mod frustum;
pub mod view_space_depth;

pub use coord_space::{clip_to_view, screen_to_view};
pub use frustum::Plane;
pub use view_space_depth::{orthogonal_view_space_depth, perspective_view_space_depth};
