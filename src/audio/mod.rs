//! Audio graph glue between capture, the codec and metering

pub mod buffer;
pub mod capture;
pub mod meter;
pub mod tone;

pub use buffer::{AudioFrame, RingBuffer};
pub use capture::{CaptureHandle, CaptureSource, CaptureStats, MeterSink};
pub use meter::LevelMeter;
pub use tone::ToneSource;
