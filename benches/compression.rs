//! Compression tier benchmarks
//!
//! Benchmarked:
//! - compression per tier on a 4096-byte PCM chunk
//! - decompression per tier
//! - packet framing and reordering of a shuffled window

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use adaptive_audio_streamer::{
    audio::AudioFrame,
    codec::{CompressionAlgorithm, CompressionEngine},
    config::ReorderConfig,
    constants::MAX_PACKET_SIZE,
    network::{PacketMeta, Packetizer, ReorderWindow},
    protocol::AudioPacket,
};

fn speech_like_chunk(samples: usize) -> Vec<u8> {
    let data = (0..samples)
        .map(|i| {
            let t = i as f32 / 16000.0;
            let voiced = (t * 2.0 * std::f32::consts::PI * 180.0).sin() * 0.4
                + (t * 2.0 * std::f32::consts::PI * 720.0).sin() * 0.1;
            (voiced * 2048.0).round() / 2048.0
        })
        .collect();
    AudioFrame::new(data, 16000, 1, 0).to_pcm_bytes().to_vec()
}

// ─── Compression ─────────────────────────────────────────────────────────────

fn bench_compress(c: &mut Criterion) {
    let engine = CompressionEngine::default();
    let chunk = speech_like_chunk(1024);

    let mut group = c.benchmark_group("compress");
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    for algorithm in CompressionAlgorithm::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(algorithm), &chunk, |b, chunk| {
            b.iter(|| black_box(engine.compress_with(black_box(chunk), algorithm)));
        });
    }
    group.finish();
}

fn bench_decompress(c: &mut Criterion) {
    let engine = CompressionEngine::default();
    let chunk = speech_like_chunk(1024);

    let mut group = c.benchmark_group("decompress");
    group.throughput(Throughput::Bytes(chunk.len() as u64));
    for algorithm in CompressionAlgorithm::ALL {
        let compressed = engine.compress_with(&chunk, algorithm);
        group.bench_with_input(BenchmarkId::from_parameter(algorithm), &compressed, |b, compressed| {
            b.iter(|| black_box(engine.decompress(black_box(compressed))));
        });
    }
    group.finish();
}

// ─── Framing and reordering ──────────────────────────────────────────────────

fn bench_reorder(c: &mut Criterion) {
    let engine = CompressionEngine::default();
    let chunk = speech_like_chunk(1024);
    let meta = PacketMeta {
        captured_at_us: 0,
        sample_rate: 16000,
        channels: 1,
    };
    let mut packetizer = Packetizer::new();
    let frames: Vec<_> = (0..64)
        .map(|_| {
            let result = engine.compress_with(&chunk, CompressionAlgorithm::Fast);
            packetizer.packetize(result, &meta).encode(MAX_PACKET_SIZE)
        })
        .collect::<Result<_, _>>()
        .unwrap_or_default();
    // swap neighbours: 1,0,3,2,...
    let order: Vec<usize> = (0..frames.len()).map(|i| i ^ 1).collect();

    c.bench_function("reorder/decode_and_release_64", |b| {
        b.iter(|| {
            let mut window = ReorderWindow::new(&ReorderConfig::default());
            let mut released = 0;
            for &i in &order {
                if let Ok(packet) = AudioPacket::decode(&frames[i], MAX_PACKET_SIZE) {
                    released += window.accept(packet).len();
                }
            }
            black_box(released)
        });
    });
}

criterion_group!(benches, bench_compress, bench_decompress, bench_reorder);
criterion_main!(benches);
