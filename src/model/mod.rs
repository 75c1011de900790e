//! Model: parameter arena, recurrent cells, encoder, attention decoder.

pub mod attention;
pub mod cell;
pub mod decoder;
pub mod encoder;
pub mod linear;
pub mod nmt;
pub mod ops;
pub mod params;
