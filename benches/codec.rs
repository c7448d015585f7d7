//! Benchmarks for the lossless codec and WAV export.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use peer_mixer::codec::{DecodeSession, StreamEncoder};
use peer_mixer::config::EncoderConfig;
use peer_mixer::export::{export_wav, WavFormat};

const SECONDS: usize = 2;

fn sine(sample_rate: u32) -> Vec<f32> {
    (0..sample_rate as usize * SECONDS)
        .map(|i| 0.5 * (i as f32 * 440.0 * std::f32::consts::TAU / sample_rate as f32).sin())
        .collect()
}

fn encode_all(config: EncoderConfig, pcm: &[f32]) -> Vec<Bytes> {
    let mut encoder = StreamEncoder::new(config).unwrap();
    let mut chunks = Vec::new();
    for frame in pcm.chunks(1024) {
        chunks.extend(encoder.encode(frame).unwrap());
    }
    chunks.extend(encoder.finish());
    chunks
}

fn encode(c: &mut Criterion) {
    let pcm = sine(44100);
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(pcm.len() as u64));

    for level in [0u8, 5, 8] {
        let config = EncoderConfig {
            compression_level: level,
            ..EncoderConfig::default()
        };
        group.bench_with_input(BenchmarkId::new("level", level), &config, |b, config| {
            b.iter(|| encode_all(*config, black_box(&pcm)))
        });
    }
    group.finish();
}

fn decode(c: &mut Criterion) {
    let pcm = sine(44100);
    let chunks = encode_all(EncoderConfig::default(), &pcm);
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(pcm.len() as u64));

    group.bench_function("stream", |b| {
        b.iter(|| {
            let mut session = DecodeSession::new();
            for chunk in &chunks {
                black_box(session.push(chunk.clone()));
            }
            black_box(session.flush())
        })
    });
    group.finish();
}

fn export(c: &mut Criterion) {
    let pcm = sine(44100);
    let chunks = encode_all(EncoderConfig::default(), &pcm);
    let mut session = DecodeSession::new();
    for chunk in &chunks {
        session.push(chunk.clone());
    }
    session.flush();
    let blocks = session.decoded().to_vec();
    let format = WavFormat {
        sample_rate: 44100,
        channels: 1,
        bits_per_sample: 16,
    };

    c.bench_function("export_wav", |b| {
        b.iter(|| export_wav(black_box(&blocks), format).unwrap())
    });
}

criterion_group!(benches, encode, decode, export);
criterion_main!(benches);
