pub mod error;
pub mod image;
pub mod layers;
pub mod traits;

pub use error::{MemoryError, MemoryResult};
pub use image::{ImageFormat, MemoryImage};
pub use traits::MemoryLayer;
