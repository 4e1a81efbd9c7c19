// Hot-path benchmarks: per-packet receive work and ring buffer transfer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dac_live_stream::audio::{AudioFormat, OutputLine, RingBuffer};
use dac_live_stream::error::AudioError;
use dac_live_stream::network::{demultiplex, SequenceValidator};
use dac_live_stream::protocol::{PacketHeader, DATA_PAYLOAD_SIZE, PACKET_SIZE};

/// Accepts and discards everything
struct SinkLine;

impl OutputLine for SinkLine {
    fn open(&mut self, _format: &AudioFormat) -> Result<(), AudioError> {
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        black_box(data);
        Ok(data.len())
    }

    fn available(&self) -> usize {
        usize::MAX
    }

    fn buffer_size(&self) -> usize {
        usize::MAX
    }

    fn start(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn close(&mut self) {}

    fn is_open(&self) -> bool {
        true
    }
}

fn bench_ring_transfer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer_transfer");
    let payload = vec![0x55u8; DATA_PAYLOAD_SIZE];

    for capacity in [800usize, 4000, 16000] {
        let buffer = RingBuffer::with_fill(capacity, 0xFF);
        let mut line = SinkLine;
        group.bench_with_input(BenchmarkId::from_parameter(capacity), &capacity, |b, _| {
            b.iter(|| {
                buffer.add_data(black_box(&payload)).unwrap();
                black_box(buffer.write_to_line(&mut line, capacity).unwrap())
            });
        });
    }
    group.finish();
}

fn bench_packet_path(c: &mut Criterion) {
    let mut packet = vec![0x11u8; PACKET_SIZE];
    packet[..12].copy_from_slice(&PacketHeader::default().to_bytes());

    c.bench_function("parse_classify_demux", |b| {
        let mut validator = SequenceValidator::new();
        let mut sequence = 0u16;
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            packet[2..4].copy_from_slice(&sequence.to_be_bytes());
            let header = PacketHeader::parse(black_box(&packet)).unwrap();
            let class = validator.classify(header.sequence_number, header.contributing_source);
            black_box(class);
            black_box(demultiplex(&packet, header.sequence_number))
        });
    });
}

criterion_group!(benches, bench_ring_transfer, bench_packet_path);
criterion_main!(benches);
