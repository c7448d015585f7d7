//! Container export of decoded audio

pub mod wav;
pub mod worker;

pub use wav::{encode_container, export_wav, interleave, WavFormat};
pub use worker::ExporterHandle;
