use downlink::block::Block;
use downlink::dsp::{CarrierPll, PllConfig};
use downlink::fec::{Code, ConvolutionalDecoder, Encoder, Viterbi, ViterbiConfig};
use downlink::framing::{Deframer, DeframerConfig, ASM};
use num_complex::Complex32;
use rand::Rng;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

fn random_bits(n: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(0..=1u8)).collect()
}

fn bench_viterbi(c: &mut Criterion) {
    let bits = random_bits(8192);
    let coded = Encoder::new(Code::CCSDS).encode(&bits);
    let symbols: Vec<f32> = coded
        .iter()
        .map(|b| if *b == 1 { 1.0 } else { -1.0 })
        .collect();

    let mut group = c.benchmark_group("viterbi");
    group.throughput(Throughput::Elements(bits.len() as u64));
    group.bench_function("trellis", |b| {
        b.iter(|| {
            let mut viterbi = Viterbi::new(Code::CCSDS, 30);
            for pair in coded.chunks_exact(2) {
                viterbi.push([pair[0], pair[1]]);
            }
            viterbi.flush()
        });
    });
    group.bench_function("decoder", |b| {
        b.iter(|| {
            let mut decoder = ConvolutionalDecoder::new(&ViterbiConfig::default()).unwrap();
            let mut out = Vec::with_capacity(bits.len());
            decoder.work(&symbols, &mut out);
            decoder.flush(&mut out);
            out
        });
    });
    group.finish();
}

fn bench_deframer(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let mut stream = Vec::new();
    for _ in 0..32 {
        stream.extend_from_slice(&ASM);
        stream.extend((0..1020).map(|_| rng.gen::<u8>()));
    }
    let bits: Vec<u8> = stream
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1))
        .collect();

    let mut group = c.benchmark_group("deframer");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("locked", |b| {
        b.iter(|| {
            let mut deframer = Deframer::new(&DeframerConfig::default()).unwrap();
            let mut frames = Vec::new();
            deframer.work(&bits, &mut frames);
            assert_eq!(frames.len(), 32);
        });
    });
    group.finish();
}

fn bench_pll(c: &mut Criterion) {
    let mut rng = rand::thread_rng();
    let samples: Vec<Complex32> = (0..16384)
        .map(|i| {
            let s = if rng.gen::<bool>() { 1.0 } else { -1.0 };
            Complex32::from_polar(s, 0.3 + 0.001 * i as f32)
        })
        .collect();

    let mut group = c.benchmark_group("pll");
    group.throughput(Throughput::Elements(samples.len() as u64));
    group.bench_function("track", |b| {
        b.iter(|| {
            let mut pll = CarrierPll::new(PllConfig::default());
            let mut out = Vec::with_capacity(samples.len());
            pll.work(&samples, &mut out);
            out
        });
    });
    group.finish();
}

criterion_group!(benches, bench_viterbi, bench_deframer, bench_pll);
criterion_main!(benches);
