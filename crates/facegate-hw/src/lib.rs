//! facegate-hw: camera capture, operator overlays and preview export.
//!
//! Cameras are opened per capture session through [`CameraOpener`] and
//! released when the returned [`FrameSource`] is dropped.

pub mod camera;
pub mod frame;
pub mod overlay;

pub use camera::{Camera, CameraError, CameraOpener, FrameSource, PixelFormat, V4lOpener};
pub use frame::Frame;
pub use overlay::{draw_outline, save_preview, FaceOutline, PreviewError};
