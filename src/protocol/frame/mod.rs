//! Utilities to work with raw WebSocket frames.

pub mod coding;

#[allow(clippy::module_inception)]
mod frame;
mod mask;

pub use self::{
    frame::{CloseFrame, Decoded, Frame, FrameHeader, MAX_CONTROL_PAYLOAD},
    mask::{apply_mask, generate_mask},
};
