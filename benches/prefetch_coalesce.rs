use criterion::{criterion_group, criterion_main, Criterion};

use vcnpu_sim::dma::{DmaEngine, RequestKind};
use vcnpu_sim::prefetch::Prefetcher;

fn bench_coalesce_adjacent_run(c: &mut Criterion) {
    c.bench_function("coalesce_128_adjacent_requests", |b| {
        b.iter(|| {
            let mut pf = Prefetcher::new(256, 16384, 4096, 8);
            let mut dma = DmaEngine::new(800, 1024);
            for i in 0..128u64 {
                pf.submit(i * 4096, 4096, RequestKind::Reference, (0, 0), i);
                if i % 4 == 0 {
                    pf.step(&mut dma);
                    dma.step();
                    for req in dma.collect_completed() {
                        pf.complete(req.tag);
                    }
                }
            }
        })
    });
}

criterion_group!(benches, bench_coalesce_adjacent_run);
criterion_main!(benches);
