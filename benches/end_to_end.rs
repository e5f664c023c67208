use core_affinity::CoreId;
use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::{Arc, Barrier};

// x10000 everywhere to amortize the startup cost of each benchmark (e.g. spawning threads).

const TX_THREADS: usize = 4;

fn faaq_mpsc_x10000(c: &mut Criterion, segment_capacity: usize) {
    assert_eq!(10000 % TX_THREADS, 0);

    let queue = Arc::new(faaq::FaaQueue::<usize>::new(segment_capacity).unwrap());
    let barrier = Arc::new(Barrier::new(TX_THREADS + 1));

    for thread_id in 0..TX_THREADS {
        let queue = queue.clone();
        let barrier = barrier.clone();

        std::thread::spawn(move || {
            core_affinity::set_for_current(CoreId { id: thread_id + 1 });

            loop {
                barrier.wait();

                for _ in 0..10000 / TX_THREADS {
                    queue.enqueue(42).unwrap();
                }
            }
        });
    }

    core_affinity::set_for_current(CoreId { id: 0 });

    let name = format!("faaq mpsc x10000 (segment {})", segment_capacity);
    c.bench_function(&name, |b| {
        b.iter(|| {
            barrier.wait();

            let mut progress = 0;
            while progress < 10000 {
                if let Some(r) = queue.dequeue() {
                    assert_eq!(r, 42);
                    progress += 1;
                }
            }
        })
    });
}

fn faaq_small_segments(c: &mut Criterion) {
    faaq_mpsc_x10000(c, faaq::DEFAULT_SEGMENT_CAPACITY);
}

fn faaq_large_segments(c: &mut Criterion) {
    faaq_mpsc_x10000(c, 1024);
}

fn flume_mpsc_x10000(c: &mut Criterion) {
    assert_eq!(10000 % TX_THREADS, 0);

    let (tx, rx) = flume::unbounded::<usize>();
    let barrier = Arc::new(Barrier::new(TX_THREADS + 1));

    for thread_id in 0..TX_THREADS {
        let tx = tx.clone();
        let barrier = barrier.clone();

        std::thread::spawn(move || {
            core_affinity::set_for_current(CoreId { id: thread_id + 1 });

            loop {
                barrier.wait();

                for _ in 0..10000 / TX_THREADS {
                    tx.send(42).unwrap();
                }
            }
        });
    }

    core_affinity::set_for_current(CoreId { id: 0 });

    c.bench_function("flume mpsc x10000", |b| {
        b.iter(|| {
            barrier.wait();

            let mut progress = 0;
            while progress < 10000 {
                if let Ok(r) = rx.try_recv() {
                    assert_eq!(r, 42);
                    progress += 1;
                }
            }
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = faaq_small_segments, faaq_large_segments, flume_mpsc_x10000
}
criterion_main!(benches);
