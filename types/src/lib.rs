pub mod events;
pub mod media;

pub use events::{ClientEvent, ServerEvent};
pub use media::{EncodedMediaChunk, Turn};
