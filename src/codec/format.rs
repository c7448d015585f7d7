//! Lossless stream layout
//!
//! The stream is FLAC-compatible: a `fLaC` marker, a STREAMINFO metadata
//! block, then independent frames. Each frame carries a CRC-8 protected
//! header, one subframe per channel and a CRC-16 trailer.

use super::bitstream::{crc16, crc8, BitReader, BitWriter, Crc16, Incomplete};

/// Stream marker
pub const STREAM_MARKER: &[u8; 4] = b"fLaC";

/// 14-bit frame sync code followed by reserved bit and fixed blocking flag
pub const FRAME_SYNC: u16 = 0xFFF8;

const STREAMINFO_LEN: u32 = 34;
const METADATA_STREAMINFO: u32 = 0;

/// Rice parameters at or above this value use the escape code
const RICE_ESCAPE: u32 = 15;

/// Stream-level parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// 0 when unknown (live streams)
    pub total_samples: u64,
}

impl StreamInfo {
    /// Marker plus the STREAMINFO block, flagged as the last metadata block
    pub fn write_stream_header(&self) -> Vec<u8> {
        let mut w = BitWriter::with_capacity(42);
        for &b in STREAM_MARKER {
            w.write(b as u32, 8);
        }
        w.write(1, 1);
        w.write(METADATA_STREAMINFO, 7);
        w.write(STREAMINFO_LEN, 24);
        w.write(self.min_block_size as u32, 16);
        w.write(self.max_block_size as u32, 16);
        w.write(0, 24);
        w.write(0, 24);
        w.write(self.sample_rate, 20);
        w.write(self.channels as u32 - 1, 3);
        w.write(self.bits_per_sample as u32 - 1, 5);
        w.write_u64(self.total_samples, 36);
        for _ in 0..4 {
            w.write(0, 32);
        }
        w.into_bytes()
    }

    /// The 34-byte STREAMINFO body, without marker or block header
    pub fn streaminfo_body(&self) -> Vec<u8> {
        self.write_stream_header().split_off(8)
    }
}

/// Outcome of parsing the metadata section
pub enum HeaderParse {
    /// Header complete; `consumed` bytes belong to it
    Done { info: StreamInfo, consumed: usize },
    /// Not a stream header
    Invalid(String),
}

/// Parse marker and metadata blocks, keeping STREAMINFO and skipping the rest
pub fn parse_stream_header(data: &[u8]) -> Result<HeaderParse, Incomplete> {
    if data.len() < 4 {
        if STREAM_MARKER.starts_with(data) {
            return Err(Incomplete);
        }
        return Ok(HeaderParse::Invalid("missing stream marker".into()));
    }
    if &data[..4] != STREAM_MARKER {
        return Ok(HeaderParse::Invalid("missing stream marker".into()));
    }

    let mut r = BitReader::new(&data[4..]);
    let mut info = None;
    loop {
        let last = r.read_bit()?;
        let block_type = r.read(7)?;
        let length = r.read(24)? as usize;
        if block_type == METADATA_STREAMINFO {
            if length != STREAMINFO_LEN as usize {
                return Ok(HeaderParse::Invalid(format!("STREAMINFO length {length}")));
            }
            let min_block_size = r.read(16)? as u16;
            let max_block_size = r.read(16)? as u16;
            let _min_frame = r.read(24)?;
            let _max_frame = r.read(24)?;
            let sample_rate = r.read(20)?;
            let channels = r.read(3)? as u16 + 1;
            let bits_per_sample = r.read(5)? as u16 + 1;
            let total_samples = r.read_u64(36)?;
            r.skip_bytes(16)?;
            info = Some(StreamInfo {
                min_block_size,
                max_block_size,
                sample_rate,
                channels,
                bits_per_sample,
                total_samples,
            });
        } else {
            r.skip_bytes(length)?;
        }
        if last {
            break;
        }
    }

    match info {
        Some(info) => Ok(HeaderParse::Done {
            info,
            consumed: 4 + r.byte_pos(),
        }),
        None => Ok(HeaderParse::Invalid("no STREAMINFO block".into())),
    }
}

/// A fully decoded frame, samples per channel
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: Vec<Vec<i32>>,
}

impl Frame {
    pub fn block_size(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
}

/// Fields of a frame header needed to delimit and label the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub frame_number: u64,
    pub block_size: usize,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub channels: u16,
    /// Header length including the CRC-8 byte
    pub len: usize,
}

impl FrameHeader {
    /// Upper bound on the encoded size of a frame with this header
    ///
    /// Generous enough for verbatim subframes plus side-channel bits,
    /// predictor setup and partition headers.
    pub fn max_frame_len(&self) -> usize {
        let per_channel = (self.block_size * (self.bits_per_sample as usize + 1)).div_ceil(8) + 4096;
        self.len + self.channels as usize * per_channel + 2
    }
}

/// Outcome of parsing a frame header at the head of a buffer
#[derive(Debug)]
pub enum FrameParse {
    Header(FrameHeader),
    /// Bytes at the head are not a valid frame header
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encoder search limits derived from the compression level
#[derive(Debug, Clone, Copy)]
pub struct EncodeParams {
    pub max_fixed_order: usize,
    pub max_partition_order: u32,
}

impl EncodeParams {
    pub fn for_level(level: u8) -> Self {
        let max_fixed_order = if level <= 1 { 2 } else { 4 };
        let max_partition_order = match level {
            0 => 0,
            1 | 2 => 3,
            n => (n as u32).min(6),
        };
        Self {
            max_fixed_order,
            max_partition_order,
        }
    }
}

/// Encode one frame with independently coded channels
pub fn encode_frame(
    info: &StreamInfo,
    frame_number: u64,
    channels: &[Vec<i32>],
    params: EncodeParams,
) -> Vec<u8> {
    let block_size = channels.first().map(|c| c.len()).unwrap_or(0);
    debug_assert!(block_size > 0 && block_size <= u16::MAX as usize + 1);
    let bps = info.bits_per_sample as u32;

    let mut w = BitWriter::with_capacity(block_size * channels.len() * 2 + 32);
    write_frame_header(&mut w, info, frame_number, block_size, channels.len() as u16);

    for samples in channels {
        write_subframe(&mut w, samples, bps, params);
    }

    w.align();
    let crc = crc16(w.bytes());
    w.write(crc as u32, 16);
    w.into_bytes()
}

fn write_frame_header(
    w: &mut BitWriter,
    info: &StreamInfo,
    frame_number: u64,
    block_size: usize,
    channels: u16,
) {
    let (block_code, block_extra) = block_size_code(block_size);
    let (rate_code, rate_extra) = sample_rate_code(info.sample_rate);

    w.write(FRAME_SYNC as u32, 16);
    w.write(block_code, 4);
    w.write(rate_code, 4);
    w.write(channels as u32 - 1, 4);
    w.write(sample_size_code(info.bits_per_sample), 3);
    w.write(0, 1);
    write_utf8_number(w, frame_number);
    if let Some((value, bits)) = block_extra {
        w.write(value, bits);
    }
    if let Some((value, bits)) = rate_extra {
        w.write(value, bits);
    }
    let crc = crc8(w.bytes());
    w.write(crc as u32, 8);
}

fn block_size_code(block_size: usize) -> (u32, Option<(u32, u32)>) {
    match block_size {
        192 => (1, None),
        576 => (2, None),
        1152 => (3, None),
        2304 => (4, None),
        4608 => (5, None),
        256 => (8, None),
        512 => (9, None),
        1024 => (10, None),
        2048 => (11, None),
        4096 => (12, None),
        8192 => (13, None),
        16384 => (14, None),
        32768 => (15, None),
        n if n <= 256 => (6, Some(((n - 1) as u32, 8))),
        n => (7, Some(((n - 1) as u32, 16))),
    }
}

fn sample_rate_code(rate: u32) -> (u32, Option<(u32, u32)>) {
    match rate {
        88200 => (1, None),
        176400 => (2, None),
        192000 => (3, None),
        8000 => (4, None),
        16000 => (5, None),
        22050 => (6, None),
        24000 => (7, None),
        32000 => (8, None),
        44100 => (9, None),
        48000 => (10, None),
        96000 => (11, None),
        r if r % 1000 == 0 && r / 1000 <= 255 => (12, Some((r / 1000, 8))),
        r if r <= 65535 => (13, Some((r, 16))),
        r if r % 10 == 0 && r / 10 <= 65535 => (14, Some((r / 10, 16))),
        _ => (0, None),
    }
}

fn sample_size_code(bps: u16) -> u32 {
    match bps {
        8 => 1,
        12 => 2,
        16 => 4,
        20 => 5,
        24 => 6,
        _ => 0,
    }
}

fn write_utf8_number(w: &mut BitWriter, value: u64) {
    if value < 0x80 {
        w.write(value as u32, 8);
        return;
    }
    let continuation = match value {
        v if v < 0x800 => 1,
        v if v < 0x1_0000 => 2,
        v if v < 0x20_0000 => 3,
        v if v < 0x400_0000 => 4,
        v if v < 0x8000_0000 => 5,
        _ => 6,
    };
    let lead_bits = 6 - continuation as u32;
    let lead_marker: u32 = (0xFF00u32 >> (continuation + 1)) & 0xFF;
    let lead_value = (value >> (6 * continuation)) as u32 & ((1 << lead_bits) - 1);
    w.write(lead_marker | lead_value, 8);
    for i in (0..continuation).rev() {
        w.write(0x80 | ((value >> (6 * i)) as u32 & 0x3F), 8);
    }
}

fn write_subframe(w: &mut BitWriter, samples: &[i32], bps: u32, params: EncodeParams) {
    let first = samples[0];
    if samples.iter().all(|&s| s == first) {
        w.write(0, 1);
        w.write(0b000000, 6);
        w.write(0, 1);
        w.write_signed(first as i64, bps);
        return;
    }

    let verbatim_bits = samples.len() as u64 * bps as u64;
    let mut best: Option<(usize, Vec<i64>, RicePlan)> = None;
    let max_order = params.max_fixed_order.min(samples.len() - 1);
    for order in 0..=max_order {
        let residual = fixed_residual(samples, order);
        let plan = plan_rice(&residual, order, samples.len(), params.max_partition_order);
        let bits = plan.bits + order as u64 * bps as u64;
        let better = match &best {
            Some((best_order, _, best_plan)) => {
                bits < best_plan.bits + *best_order as u64 * bps as u64
            }
            None => true,
        };
        if better {
            best = Some((order, residual, plan));
        }
    }

    match best {
        Some((order, residual, plan)) if plan.bits + (order as u64 * bps as u64) < verbatim_bits => {
            w.write(0, 1);
            w.write(0b001000 | order as u32, 6);
            w.write(0, 1);
            for &s in &samples[..order] {
                w.write_signed(s as i64, bps);
            }
            write_residual(w, &residual, order, samples.len(), &plan);
        }
        _ => {
            w.write(0, 1);
            w.write(0b000001, 6);
            w.write(0, 1);
            for &s in samples {
                w.write_signed(s as i64, bps);
            }
        }
    }
}

/// Residual of the fixed polynomial predictor of the given order,
/// one entry per sample after the warm-up
fn fixed_residual(samples: &[i32], order: usize) -> Vec<i64> {
    let s = |i: usize| samples[i] as i64;
    (order..samples.len())
        .map(|i| match order {
            0 => s(i),
            1 => s(i) - s(i - 1),
            2 => s(i) - 2 * s(i - 1) + s(i - 2),
            3 => s(i) - 3 * s(i - 1) + 3 * s(i - 2) - s(i - 3),
            _ => s(i) - 4 * s(i - 1) + 6 * s(i - 2) - 4 * s(i - 3) + s(i - 4),
        })
        .collect()
}

fn zigzag(r: i64) -> u64 {
    ((r << 1) ^ (r >> 63)) as u64
}

struct RicePlan {
    partition_order: u32,
    params: Vec<u32>,
    bits: u64,
}

fn plan_rice(residual: &[i64], order: usize, block_size: usize, max_partition_order: u32) -> RicePlan {
    let mut best: Option<RicePlan> = None;
    for partition_order in 0..=max_partition_order {
        let partitions = 1usize << partition_order;
        if block_size % partitions != 0 || (block_size >> partition_order) <= order {
            break;
        }
        let mut params = Vec::with_capacity(partitions);
        let mut bits = 2 + 4u64;
        let mut start = 0;
        for p in 0..partitions {
            let len = (block_size >> partition_order) - if p == 0 { order } else { 0 };
            let slice = &residual[start..start + len];
            start += len;
            let (param, cost) = best_rice_param(slice);
            params.push(param);
            bits += 4 + cost;
        }
        if best.as_ref().map_or(true, |b| bits < b.bits) {
            best = Some(RicePlan {
                partition_order,
                params,
                bits,
            });
        }
    }
    best.unwrap_or_else(|| {
        let (param, cost) = best_rice_param(residual);
        RicePlan {
            partition_order: 0,
            params: vec![param],
            bits: 2 + 4 + 4 + cost,
        }
    })
}

/// Cheapest Rice parameter for a partition; the escape code stores raw bits
fn best_rice_param(residual: &[i64]) -> (u32, u64) {
    let folded: Vec<u64> = residual.iter().map(|&r| zigzag(r)).collect();
    let mut best_param = 0;
    let mut best_bits = u64::MAX;
    for k in 0..RICE_ESCAPE {
        let bits: u64 = folded
            .iter()
            .map(|&u| (u >> k) + 1 + k as u64)
            .sum();
        if bits < best_bits {
            best_bits = bits;
            best_param = k;
        }
    }

    let raw_width = residual
        .iter()
        .map(|&r| signed_width(r))
        .max()
        .unwrap_or(0);
    let escape_bits = 5 + raw_width as u64 * residual.len() as u64;
    if escape_bits < best_bits {
        (RICE_ESCAPE + raw_width, escape_bits)
    } else {
        (best_param, best_bits)
    }
}

/// Bits needed to hold `r` in two's complement
fn signed_width(r: i64) -> u32 {
    if r == 0 {
        0
    } else if r > 0 {
        65 - r.leading_zeros()
    } else {
        65 - (!r).leading_zeros()
    }
}

fn write_residual(w: &mut BitWriter, residual: &[i64], order: usize, block_size: usize, plan: &RicePlan) {
    w.write(0, 2);
    w.write(plan.partition_order, 4);
    let mut start = 0;
    for (p, &param) in plan.params.iter().enumerate() {
        let len = (block_size >> plan.partition_order) - if p == 0 { order } else { 0 };
        let slice = &residual[start..start + len];
        start += len;
        if param >= RICE_ESCAPE {
            let raw_width = param - RICE_ESCAPE;
            w.write(RICE_ESCAPE, 4);
            w.write(raw_width, 5);
            for &r in slice {
                w.write_signed(r, raw_width);
            }
        } else {
            w.write(param, 4);
            for &r in slice {
                let u = zigzag(r);
                w.write_unary((u >> param) as u32);
                w.write_u64(u & ((1u64 << param) - 1), param);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame splitting
// ---------------------------------------------------------------------------

/// Parse and CRC-check the frame header at the head of `data`
pub fn parse_frame_header(data: &[u8], info: &StreamInfo) -> Result<FrameParse, Incomplete> {
    let mut r = BitReader::new(data);

    let sync = r.read(15)?;
    if sync != (FRAME_SYNC as u32 >> 1) {
        return Ok(FrameParse::Corrupt("missing frame sync".into()));
    }
    let _variable_blocking = r.read_bit()?;
    let block_code = r.read(4)?;
    let rate_code = r.read(4)?;
    let channel_code = r.read(4)?;
    let size_code = r.read(3)?;
    if r.read_bit()? {
        return Ok(FrameParse::Corrupt("reserved header bit set".into()));
    }

    let frame_number = match read_utf8_number(&mut r)? {
        Some(n) => n,
        None => return Ok(FrameParse::Corrupt("bad frame number".into())),
    };

    let block_size = match block_code {
        0 => return Ok(FrameParse::Corrupt("reserved block size".into())),
        1 => 192,
        2..=5 => 576 << (block_code - 2),
        6 => r.read(8)? as usize + 1,
        7 => r.read(16)? as usize + 1,
        _ => 256 << (block_code - 8),
    };
    if block_size > u16::MAX as usize {
        return Ok(FrameParse::Corrupt(format!("block size {block_size} too large")));
    }

    let sample_rate = match rate_code {
        0 => info.sample_rate,
        1 => 88200,
        2 => 176400,
        3 => 192000,
        4 => 8000,
        5 => 16000,
        6 => 22050,
        7 => 24000,
        8 => 32000,
        9 => 44100,
        10 => 48000,
        11 => 96000,
        12 => r.read(8)? * 1000,
        13 => r.read(16)?,
        14 => r.read(16)? * 10,
        _ => return Ok(FrameParse::Corrupt("invalid sample rate code".into())),
    };

    let bits_per_sample: u16 = match size_code {
        0 => info.bits_per_sample,
        1 => 8,
        2 => 12,
        4 => 16,
        5 => 20,
        6 => 24,
        7 => 32,
        _ => return Ok(FrameParse::Corrupt("reserved sample size".into())),
    };

    let channels = match channel_code {
        0..=7 => channel_code as u16 + 1,
        8..=10 => 2,
        _ => return Ok(FrameParse::Corrupt("reserved channel assignment".into())),
    };
    if channels != info.channels {
        return Ok(FrameParse::Corrupt(format!(
            "{channels} channels in a {}-channel stream",
            info.channels
        )));
    }

    let crc_pos = r.byte_pos();
    let expected_crc8 = r.read(8)? as u8;
    if crc8(&data[..crc_pos]) != expected_crc8 {
        return Ok(FrameParse::Corrupt("header CRC mismatch".into()));
    }

    Ok(FrameParse::Header(FrameHeader {
        frame_number,
        block_size,
        sample_rate,
        bits_per_sample,
        channels,
        len: crc_pos + 1,
    }))
}

/// Where the frame starting at the head of `data` ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// CRC-16 closes at this length and the next frame's sync follows
    Delimited(usize),
    /// CRC-16 closes exactly at the end of the available data
    Tail(usize),
    /// No closing CRC-16 yet
    Open,
}

/// Locate the end of the frame whose header was already parsed
///
/// A frame ends where the running CRC-16 over it, trailer included, is
/// zero. Positions that are not followed by another sync code are only
/// accepted at the very end of `data`.
pub fn find_frame_end(data: &[u8], header: &FrameHeader) -> FrameEnd {
    let limit = data.len().min(header.max_frame_len());
    let mut crc = Crc16::new();
    crc.update(&data[..header.len.min(limit)]);
    for end in header.len + 1..=limit {
        crc.update(&data[end - 1..end]);
        if crc.value() != 0 || end < header.len + 3 {
            continue;
        }
        if end == data.len() {
            return FrameEnd::Tail(end);
        }
        if is_sync(data, end) {
            return FrameEnd::Delimited(end);
        }
    }
    FrameEnd::Open
}

fn is_sync(data: &[u8], at: usize) -> bool {
    at + 1 < data.len() && data[at] == 0xFF && (data[at + 1] & 0xFE) == 0xF8
}

/// Position of the next plausible frame sync code at or after `from`
pub fn find_sync(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(1)).find(|&i| is_sync(data, i))
}

fn read_utf8_number(r: &mut BitReader<'_>) -> Result<Option<u64>, Incomplete> {
    let lead = r.read(8)?;
    let continuation = match lead {
        b if b & 0x80 == 0 => return Ok(Some(b as u64)),
        b if b & 0xE0 == 0xC0 => 1,
        b if b & 0xF0 == 0xE0 => 2,
        b if b & 0xF8 == 0xF0 => 3,
        b if b & 0xFC == 0xF8 => 4,
        b if b & 0xFE == 0xFC => 5,
        0xFE => 6,
        _ => return Ok(None),
    };
    let lead_bits = 6 - continuation;
    let mut value = (lead & ((1 << lead_bits) - 1)) as u64;
    for _ in 0..continuation {
        let byte = r.read(8)?;
        if byte & 0xC0 != 0x80 {
            return Ok(None);
        }
        value = (value << 6) | (byte & 0x3F) as u64;
    }
    Ok(Some(value))
}
