//! Synthetic sine capture source

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use super::capture::CaptureSource;

/// Mono sine generator delivered in fixed-size buffers
///
/// Paced to real time by default, like a device callback would be.
pub struct ToneSource {
    name: String,
    frequency: f32,
    amplitude: f32,
    sample_rate: u32,
    buffer_len: usize,
    phase: f32,
    remaining: Option<u64>,
    paced: bool,
    next_deadline: Option<Instant>,
}

impl ToneSource {
    pub fn new(frequency: f32, sample_rate: u32, buffer_len: usize) -> Self {
        Self {
            name: format!("tone-{frequency}hz"),
            frequency,
            amplitude: 0.5,
            sample_rate,
            buffer_len: buffer_len.max(1),
            phase: 0.0,
            remaining: None,
            paced: true,
            next_deadline: None,
        }
    }

    /// Stop after `samples` samples
    pub fn limit(mut self, samples: u64) -> Self {
        self.remaining = Some(samples);
        self
    }

    pub fn amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0);
        self
    }

    /// Produce buffers as fast as they are pulled
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn wait_for_deadline(&mut self, len: usize) {
        let period = Duration::from_secs_f64(len as f64 / self.sample_rate as f64);
        let deadline = match self.next_deadline {
            Some(deadline) => deadline,
            None => Instant::now(),
        };
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + period);
    }
}

impl CaptureSource for ToneSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        1
    }

    fn next_buffer(&mut self) -> Option<Vec<f32>> {
        let len = match self.remaining {
            Some(0) => return None,
            Some(n) => (n as usize).min(self.buffer_len),
            None => self.buffer_len,
        };
        if self.paced {
            self.wait_for_deadline(len);
        }

        let step = TAU * self.frequency / self.sample_rate as f32;
        let buffer = (0..len)
            .map(|_| {
                let sample = self.phase.sin() * self.amplitude;
                self.phase = (self.phase + step) % TAU;
                sample
            })
            .collect();

        if let Some(n) = self.remaining.as_mut() {
            *n -= len as u64;
        }
        Some(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_and_buffer_sizes() {
        let mut tone = ToneSource::new(1000.0, 8000, 300).limit(700).unpaced();
        assert_eq!(tone.next_buffer().unwrap().len(), 300);
        assert_eq!(tone.next_buffer().unwrap().len(), 300);
        assert_eq!(tone.next_buffer().unwrap().len(), 100);
        assert!(tone.next_buffer().is_none());
    }

    #[test]
    fn test_amplitude_bounds() {
        let mut tone = ToneSource::new(440.0, 44100, 4410).amplitude(0.25).unpaced();
        let buffer = tone.next_buffer().unwrap();
        let peak = buffer.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.25 + 1e-6);
        assert!(peak > 0.24);
    }

    #[test]
    fn test_paced_source_takes_real_time() {
        let mut tone = ToneSource::new(440.0, 1000, 20).limit(60);
        let start = Instant::now();
        while tone.next_buffer().is_some() {}
        // the first buffer is immediate, the other two wait 20ms each
        assert!(start.elapsed() >= Duration::from_millis(38));
    }
}
