pub mod digest;
pub mod image;
pub mod layout;
pub mod manifest;

pub use digest::Digest;
pub use image::{ImageHandle, LayerBlob, LayerRef, StageImage};
pub use layout::OciLayout;
