//! Bit-level I/O and checksums for the lossless stream format

/// Returned when a read runs past the bytes received so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incomplete;

/// MSB-first bit writer
#[derive(Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    acc: u64,
    bits: u32,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            acc: 0,
            bits: 0,
        }
    }

    /// Write the low `n` bits of `value` (n <= 32)
    pub fn write(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        if n == 0 {
            return;
        }
        let masked = if n == 32 {
            value as u64
        } else {
            (value as u64) & ((1u64 << n) - 1)
        };
        self.acc = (self.acc << n) | masked;
        self.bits += n;
        while self.bits >= 8 {
            self.bits -= 8;
            self.bytes.push((self.acc >> self.bits) as u8);
        }
        self.acc &= (1u64 << self.bits) - 1;
    }

    /// Write up to 64 bits
    pub fn write_u64(&mut self, value: u64, n: u32) {
        if n > 32 {
            self.write((value >> 32) as u32, n - 32);
            self.write(value as u32, 32);
        } else {
            self.write(value as u32, n);
        }
    }

    /// Two's complement signed value in `n` bits
    pub fn write_signed(&mut self, value: i64, n: u32) {
        self.write_u64(value as u64 & mask64(n), n);
    }

    /// `q` zero bits followed by a one
    pub fn write_unary(&mut self, mut q: u32) {
        while q >= 32 {
            self.write(0, 32);
            q -= 32;
        }
        self.write(1, q + 1);
    }

    /// Pad with zero bits up to the next byte boundary
    pub fn align(&mut self) {
        if self.bits > 0 {
            self.write(0, 8 - self.bits);
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.bits == 0
    }

    /// Bytes written so far (only complete bytes)
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn push_byte(&mut self, byte: u8) {
        debug_assert!(self.is_aligned());
        self.bytes.push(byte);
    }

    pub fn into_bytes(mut self) -> Vec<u8> {
        self.align();
        self.bytes
    }
}

/// MSB-first bit reader over a byte slice
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Read `n` bits (n <= 32)
    pub fn read(&mut self, n: u32) -> Result<u32, Incomplete> {
        debug_assert!(n <= 32);
        if n == 0 {
            return Ok(0);
        }
        if self.pos + n as usize > self.data.len() * 8 {
            return Err(Incomplete);
        }
        let mut value: u64 = 0;
        let mut remaining = n;
        while remaining > 0 {
            let byte = self.data[self.pos / 8];
            let offset = (self.pos % 8) as u32;
            let available = 8 - offset;
            let take = available.min(remaining);
            let shifted = (byte as u32 >> (available - take)) & ((1u32 << take) - 1);
            value = (value << take) | shifted as u64;
            remaining -= take;
            self.pos += take as usize;
        }
        Ok(value as u32)
    }

    pub fn read_u64(&mut self, n: u32) -> Result<u64, Incomplete> {
        if n > 32 {
            let high = self.read(n - 32)? as u64;
            let low = self.read(32)? as u64;
            Ok((high << 32) | low)
        } else {
            Ok(self.read(n)? as u64)
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, Incomplete> {
        Ok(self.read(1)? == 1)
    }

    pub fn is_aligned(&self) -> bool {
        self.pos % 8 == 0
    }

    /// Current byte position (only meaningful when aligned)
    pub fn byte_pos(&self) -> usize {
        self.pos / 8
    }

    pub fn skip_bytes(&mut self, n: usize) -> Result<(), Incomplete> {
        debug_assert!(self.is_aligned());
        if self.byte_pos() + n > self.data.len() {
            return Err(Incomplete);
        }
        self.pos += n * 8;
        Ok(())
    }
}

fn mask64(n: u32) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// CRC-8, polynomial x^8 + x^2 + x + 1, zero init (frame headers)
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x07
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC-16, polynomial x^16 + x^15 + x^2 + 1, zero init (whole frames)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = Crc16::new();
    crc.update(data);
    crc.value()
}

/// Running CRC-16; reads zero once a frame's own trailer has been fed in
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc16(u16);

impl Crc16 {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.0 ^= (byte as u16) << 8;
            for _ in 0..8 {
                self.0 = if self.0 & 0x8000 != 0 {
                    (self.0 << 1) ^ 0x8005
                } else {
                    self.0 << 1
                };
            }
        }
    }

    pub fn value(&self) -> u16 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_mixed_widths() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3);
        writer.write_signed(-5, 7);
        writer.write_unary(11);
        writer.write(1, 1);
        writer.write_u64(0x1_2345_6789, 36);
        writer.write(0xffff_ffff, 32);
        let bytes = writer.into_bytes();

        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read(3).unwrap(), 0b101);
        // -5 in seven bits
        assert_eq!(reader.read(7).unwrap(), 0b111_1011);
        // eleven zeros, the unary terminator, then the single set bit
        assert_eq!(reader.read(11).unwrap(), 0);
        assert!(reader.read_bit().unwrap());
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_u64(36).unwrap(), 0x1_2345_6789);
        assert_eq!(reader.read(32).unwrap(), 0xffff_ffff);
    }

    #[test]
    fn test_read_past_end_is_incomplete() {
        let data = [0xAB];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read(4).unwrap(), 0xA);
        assert_eq!(reader.read(5), Err(Incomplete));
    }

    #[test]
    fn test_crc_reference_values() {
        // Check values for the ASCII string "123456789"
        assert_eq!(crc8(b"123456789"), 0xF4);
        assert_eq!(crc16(b"123456789"), 0xFEE8);
    }

    #[test]
    fn test_crc16_closes_over_trailer() {
        let mut data = b"frame body".to_vec();
        let crc = crc16(&data);
        data.extend_from_slice(&crc.to_be_bytes());

        let mut running = Crc16::new();
        running.update(&data[..4]);
        running.update(&data[4..]);
        assert_eq!(running.value(), 0);
    }

    #[test]
    fn test_align_pads_with_zeros() {
        let mut writer = BitWriter::new();
        writer.write(1, 1);
        writer.align();
        assert!(writer.is_aligned());
        assert_eq!(writer.bytes(), &[0x80]);
    }
}
