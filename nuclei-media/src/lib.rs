#![cfg_attr(debug_assertions, allow(warnings))]

pub mod image;
pub mod interpolate;

pub use image::flip::Flip;
pub use image::image::{Image, MediaError};
pub use image::size::ResizeImage;
