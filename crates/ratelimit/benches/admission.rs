use criterion::{Criterion, black_box, criterion_group, criterion_main};

use shopops_core::TenantId;
use shopops_ratelimit::{InMemoryRateLimitStore, RateLimitPolicy, RateLimitStore};

fn bench_check_and_increment(c: &mut Criterion) {
    let store = InMemoryRateLimitStore::new();
    let tenant = TenantId::new();
    let policy = RateLimitPolicy::per_minutes(u32::MAX, 60);

    c.bench_function("check_and_increment_hot_key", |b| {
        b.iter(|| {
            let d = store
                .check_and_increment(black_box(tenant), "import.product", &policy)
                .unwrap();
            black_box(d.allowed)
        })
    });

    c.bench_function("peek_hot_key", |b| {
        b.iter(|| {
            let d = store
                .peek(black_box(tenant), "import.product", &policy)
                .unwrap();
            black_box(d.current_count)
        })
    });
}

criterion_group!(benches, bench_check_and_increment);
criterion_main!(benches);
