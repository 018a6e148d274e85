pub mod flip;
pub mod image;
pub mod size;
