//! File and asset transforms: Intel-HEX sketches, sprite sheets, title
//! screens, and flashcart image building.

pub mod flashcart;
pub mod hex;
pub mod sprite;
