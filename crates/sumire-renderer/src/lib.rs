#![allow(clippy::missing_safety_doc, clippy::too_many_arguments)]
// Sumire: a Vulkan 1.3 deferred renderer with tiled many-light shadows.

pub mod config;
pub mod error;
pub mod math;
pub mod render;
pub mod scene;
pub mod shadow;
pub mod vulkan;
pub mod window;

pub use config::RendererConfig;
pub use error::{RenderError, RenderResult};
pub use render::{FrameContext, Renderer};
pub use scene::{Camera, Light, LightMap, LightRegistry};
pub use shadow::{HighQualityShadowMapper, ShadowInputs};
pub use window::{SumiWindow, WindowProvider};
