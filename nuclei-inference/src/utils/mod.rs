pub mod graph;
pub mod masks;
