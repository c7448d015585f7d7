//! WAV container writer

use bytes::Bytes;

use crate::codec::DecodedBlock;
use crate::error::ExportError;

/// Size of the canonical RIFF/WAVE header
pub const HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;

/// Format of the exported file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * (self.bits_per_sample / 8)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.block_align() as u32
    }

    fn check(&self) -> Result<(), ExportError> {
        match self.bits_per_sample {
            8 | 16 | 24 => Ok(()),
            other => Err(ExportError::UnsupportedBitsPerSample(other)),
        }
    }
}

/// Interleave per-channel sample bytes into frame-major order
///
/// 8 and 24-bit blocks carry one sign padding byte per sample which is
/// dropped here; 8-bit samples are also converted to unsigned as WAV
/// expects. A padding byte other than 0x00/0xFF is logged and the sample
/// is kept.
pub fn interleave(
    blocks: &[DecodedBlock],
    channels: usize,
    bits_per_sample: u16,
) -> Result<Vec<u8>, ExportError> {
    let out_width = match bits_per_sample {
        8 => 1,
        16 => 2,
        24 => 3,
        other => return Err(ExportError::UnsupportedBitsPerSample(other)),
    };
    let stored = DecodedBlock::storage_width(bits_per_sample);
    let padded = stored != out_width;

    let total: usize = blocks.iter().map(|b| b.frames()).sum();
    let mut out = Vec::with_capacity(total * channels * out_width);
    let mut bad_padding = 0usize;

    for block in blocks {
        if block.channels.len() < channels {
            return Err(ExportError::MissingChannel(block.channels.len()));
        }
        let frames = block.frames();
        for i in 0..frames {
            for channel in &block.channels[..channels] {
                let sample = &channel[i * stored..(i + 1) * stored];
                if !padded {
                    out.extend_from_slice(sample);
                    continue;
                }

                let pad = sample[out_width];
                if pad != 0x00 && pad != 0xFF {
                    bad_padding += 1;
                }
                if out_width == 1 {
                    out.push(if pad == 0 { sample[0] | 0x80 } else { sample[0] & 0x7F });
                } else {
                    out.extend_from_slice(&sample[..out_width]);
                }
            }
        }
    }

    if bad_padding > 0 {
        tracing::warn!(
            samples = bad_padding,
            bits = bits_per_sample,
            "Unexpected padding bytes while interleaving"
        );
    }
    Ok(out)
}

/// Prefix interleaved sample data with a 44-byte RIFF/WAVE header
pub fn encode_container(samples: &[u8], format: WavFormat) -> Result<Vec<u8>, ExportError> {
    format.check()?;
    if samples.len() > (u32::MAX as usize - 36) {
        return Err(ExportError::TooLarge(samples.len()));
    }
    let data_len = samples.len() as u32;

    let mut out = Vec::with_capacity(HEADER_LEN + samples.len());
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&PCM_FORMAT_TAG.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.byte_rate().to_le_bytes());
    out.extend_from_slice(&format.block_align().to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.extend_from_slice(samples);
    Ok(out)
}

/// Interleave and wrap decoded blocks into a complete WAV file
pub fn export_wav(blocks: &[DecodedBlock], format: WavFormat) -> Result<Bytes, ExportError> {
    format.check()?;
    let samples = interleave(blocks, format.channels as usize, format.bits_per_sample)?;
    Ok(Bytes::from(encode_container(&samples, format)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(data: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([data[at], data[at + 1]])
    }

    fn u32_at(data: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
    }

    fn block(bits: u16, channels: Vec<Vec<u8>>) -> DecodedBlock {
        DecodedBlock {
            sample_rate: 44100,
            bits_per_sample: bits,
            channels: channels.into_iter().map(Bytes::from).collect(),
        }
    }

    #[test]
    fn test_one_second_of_silence() {
        let blocks = vec![block(16, vec![vec![0u8; 88200]])];
        let format = WavFormat {
            sample_rate: 44100,
            channels: 1,
            bits_per_sample: 16,
        };
        let wav = export_wav(&blocks, format).unwrap();

        assert_eq!(wav.len(), 44 + 88200);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32_at(&wav, 4), 88236);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(u32_at(&wav, 16), 16);
        assert_eq!(u16_at(&wav, 20), 1);
        assert_eq!(u16_at(&wav, 22), 1);
        assert_eq!(u32_at(&wav, 24), 44100);
        assert_eq!(u32_at(&wav, 28), 88200);
        assert_eq!(u16_at(&wav, 32), 2);
        assert_eq!(u16_at(&wav, 34), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32_at(&wav, 40), 88200);
        assert!(wav[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_interleave_stereo_16bit() {
        let blocks = vec![
            block(16, vec![vec![1, 0, 2, 0], vec![0xFF, 0xFF, 0xFE, 0xFF]]),
            block(16, vec![vec![3, 0], vec![0xFD, 0xFF]]),
        ];
        let out = interleave(&blocks, 2, 16).unwrap();
        assert_eq!(out, vec![1, 0, 0xFF, 0xFF, 2, 0, 0xFE, 0xFF, 3, 0, 0xFD, 0xFF]);
    }

    #[test]
    fn test_interleave_8bit_to_unsigned() {
        // -128, -1, 0, 127 stored as sign-padded little-endian pairs
        let blocks = vec![block(8, vec![vec![0x80, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x7F, 0x00]])];
        let out = interleave(&blocks, 1, 8).unwrap();
        assert_eq!(out, vec![0x00, 0x7F, 0x80, 0xFF]);
    }

    #[test]
    fn test_interleave_24bit_drops_padding() {
        let blocks = vec![block(24, vec![vec![0x01, 0x02, 0x03, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]])];
        let out = interleave(&blocks, 1, 24).unwrap();
        assert_eq!(out, vec![0x01, 0x02, 0x03, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_bad_padding_is_not_fatal() {
        let blocks = vec![block(24, vec![vec![0x01, 0x02, 0x03, 0x42]])];
        let out = interleave(&blocks, 1, 24).unwrap();
        assert_eq!(out, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_rejects_missing_channel_and_odd_depth() {
        let blocks = vec![block(16, vec![vec![0, 0]])];
        assert_eq!(interleave(&blocks, 2, 16), Err(ExportError::MissingChannel(1)));
        assert_eq!(
            interleave(&blocks, 1, 12),
            Err(ExportError::UnsupportedBitsPerSample(12))
        );
    }

    #[test]
    fn test_empty_export_is_header_only() {
        let format = WavFormat {
            sample_rate: 8000,
            channels: 2,
            bits_per_sample: 24,
        };
        let wav = export_wav(&[], format).unwrap();
        assert_eq!(wav.len(), HEADER_LEN);
        assert_eq!(u32_at(&wav, 4), 36);
        assert_eq!(u32_at(&wav, 28), 8000 * 6);
        assert_eq!(u16_at(&wav, 32), 6);
    }
}
