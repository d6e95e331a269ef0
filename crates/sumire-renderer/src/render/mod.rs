//! Frame orchestration and the screen-sized resources it renders into.

pub mod attachments;
pub mod frame;
pub mod global;
pub mod ownership;
pub mod render_passes;
pub mod renderer;

pub use attachments::{GBuffer, HZB_FORMAT, INTERMEDIATE_COLOR_FORMAT};
pub use frame::{build_submit_chain, FrameStage, QueueSubmitter, StageSubmit, FRAME_STAGE_COUNT};
pub use global::{GlobalResources, GlobalUniforms};
pub use ownership::{OwnershipBarrier, QueueOwnershipTransfer, ShadowInput, ShadowInputHandoff};
pub use render_passes::{flipped_viewport, RenderPass, RenderPassDesc};
pub use renderer::{FrameContext, Renderer};
