use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use thrtimer::timer::TimerService;

fn arm_disarm(c: &mut Criterion) {
    let service = TimerService::with_capacity(4096).unwrap();
    let timers: Vec<_> = (0..1024).map(|_| service.create_timer(|| {})).collect();

    c.bench_function("arm_disarm_1024", |b| {
        b.iter_batched(
            || {
                (0..timers.len())
                    .map(|_| rand::random_range(1_000_000..60_000_000u64))
                    .collect::<Vec<_>>()
            },
            |delays| {
                for (timer, delay) in timers.iter().zip(&delays) {
                    timer.arm(black_box(*delay)).unwrap();
                }
                for timer in &timers {
                    timer.disarm();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn fire_burst(c: &mut Criterion) {
    let service = TimerService::with_capacity(1024).unwrap();
    let fired = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let timers: Vec<_> = (0..256)
        .map(|_| {
            let f = std::sync::Arc::clone(&fired);
            service.create_timer(move || {
                f.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            })
        })
        .collect();

    c.bench_function("fire_burst_256", |b| {
        b.iter(|| {
            let target = fired.load(std::sync::atomic::Ordering::Relaxed) + timers.len();
            for timer in &timers {
                timer.arm(0).unwrap();
            }
            while fired.load(std::sync::atomic::Ordering::Relaxed) < target {
                std::hint::spin_loop();
            }
        })
    });
}

criterion_group!(benches, arm_disarm, fire_burst);
criterion_main!(benches);
