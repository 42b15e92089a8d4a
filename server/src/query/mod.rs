//! Point query module: resolve a pixel to the masks covering it

mod index;
mod resolver;

pub use index::MaskIndex;
pub use resolver::{PointQuery, PointResolver, resolve};
