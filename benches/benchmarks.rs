use criterion::{black_box, criterion_group, criterion_main, Criterion};

use galign::index::{self, partition, sa};
use galign::io::reads::Read;
use galign::search::cpu::CpuKernel;
use galign::search::{MismatchBudget, SearchConfig, SearchKernel};
use galign::util::dna;

fn make_reference(len: usize) -> Vec<u8> {
    let bases = [b'A', b'C', b'G', b'T'];
    let mut seq = Vec::with_capacity(len);
    let mut x: u32 = 42;
    for _ in 0..len {
        x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        seq.push(bases[(x >> 16) as usize % 4]);
    }
    seq
}

fn bench_build_suffix_array(c: &mut Criterion) {
    let text = dna::encode_seq(&make_reference(10_000));

    c.bench_function("build_suffix_array_10k", |b| {
        b.iter(|| {
            black_box(sa::build_suffix_array(black_box(&text)).unwrap());
        })
    });
}

fn bench_partition_reference(c: &mut Criterion) {
    let text = dna::encode_seq(&make_reference(100_000));

    c.bench_function("partition_reference_100k", |b| {
        b.iter(|| {
            black_box(partition::partition_reference(black_box(&text), 8_192, 256).unwrap());
        })
    });
}

fn bench_exact_search(c: &mut Criterion) {
    let reference = make_reference(50_000);
    let index = index::build_index("bench", &reference, 8_192, 256).unwrap();
    let reads: Vec<Read> = (0..100)
        .map(|i| Read::new(format!("r{i}"), reference[i * 400..i * 400 + 36].to_vec()))
        .collect();
    let kernel = CpuKernel::new();
    let cfg = SearchConfig {
        budget: MismatchBudget::Absolute(0),
        search_revcomp: false,
        best_only: false,
    };

    c.bench_function("exact_search_100x36bp", |b| {
        b.iter(|| {
            for p in &index.partitions {
                black_box(kernel.search(black_box(p), black_box(&reads), &cfg).unwrap());
            }
        })
    });
}

fn bench_mismatch_search(c: &mut Criterion) {
    let reference = make_reference(50_000);
    let index = index::build_index("bench", &reference, 8_192, 256).unwrap();
    let reads: Vec<Read> = (0..100)
        .map(|i| {
            let mut seq = reference[i * 400..i * 400 + 36].to_vec();
            seq[18] = match seq[18] {
                b'A' => b'C',
                b'C' => b'G',
                b'G' => b'T',
                _ => b'A',
            };
            Read::new(format!("r{i}"), seq)
        })
        .collect();
    let kernel = CpuKernel::new();
    let cfg = SearchConfig {
        budget: MismatchBudget::Absolute(2),
        search_revcomp: false,
        best_only: false,
    };

    c.bench_function("mismatch_search_k2_100x36bp", |b| {
        b.iter(|| {
            for p in &index.partitions {
                black_box(kernel.search(black_box(p), black_box(&reads), &cfg).unwrap());
            }
        })
    });
}

criterion_group!(
    benches,
    bench_build_suffix_array,
    bench_partition_reference,
    bench_exact_search,
    bench_mismatch_search
);
criterion_main!(benches);
