//! Data types shared by the index, the record store and the codec

mod image;
mod key;

pub use image::{checked_pixel_count, ImageRecord};
pub use key::{validate_name, ImageKey, KEY_SIZE, NO_PAYLOAD};
