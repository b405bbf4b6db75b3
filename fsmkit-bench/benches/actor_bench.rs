//! Concurrent driver benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use fsmkit_core::{MachineBuilder, NoopState, Signal, Target};
use fsmkit_runtime::{
    rayon_pool, ActorConfig, Command, MachineActor, MachineHandle, PoolActor, QueueKind,
    SynchronizedMachine,
};
use std::sync::Arc;

type Sig = Signal<u32>;

fn toggle() -> MachineBuilder<Sig> {
    MachineBuilder::new("toggle")
        .state("off", || NoopState)
        .state("on", || NoopState)
        .transition("off", 0, Target::node("on"))
        .transition("on", 0, Target::node("off"))
        .initial("off")
}

const BATCH: u64 = 256;

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_round_trip");
    group.throughput(Throughput::Elements(1));

    let sync = SynchronizedMachine::new(toggle().build().unwrap()).unwrap();
    group.bench_function("synchronized", |b| {
        b.iter(|| black_box(sync.transit(Signal(0)).unwrap()))
    });

    let actor = MachineActor::spawn(toggle().build().unwrap(), &ActorConfig::default()).unwrap();
    group.bench_function("actor", |b| {
        b.iter(|| black_box(actor.transit(Signal(0)).unwrap()))
    });

    let pool = PoolActor::new(toggle().build().unwrap(), rayon_pool(4).unwrap(), None).unwrap();
    group.bench_function("pool", |b| {
        b.iter(|| black_box(pool.transit(Signal(0)).unwrap()))
    });

    group.finish();
}

fn bench_pipelined(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver_pipelined");
    group.throughput(Throughput::Elements(BATCH));

    for queue in [QueueKind::Unbounded, QueueKind::Blocking] {
        let config = ActorConfig {
            queue,
            ..ActorConfig::default()
        };
        let actor = MachineActor::spawn(toggle().build().unwrap(), &config).unwrap();
        group.bench_function(format!("actor_{:?}", queue).to_lowercase(), |b| {
            b.iter(|| {
                let futures: Vec<_> = (0..BATCH)
                    .map(|_| actor.submit(Command::Transit(Signal(0))))
                    .collect();
                for f in futures {
                    black_box(f.wait().unwrap());
                }
            })
        });
    }

    let pool = PoolActor::new(toggle().build().unwrap(), rayon_pool(4).unwrap(), None).unwrap();
    group.bench_function("pool", |b| {
        b.iter(|| {
            let futures: Vec<_> = (0..BATCH)
                .map(|_| pool.submit(Command::Transit(Signal(0))))
                .collect();
            for f in futures {
                black_box(f.wait().unwrap());
            }
        })
    });

    group.finish();
}

fn bench_async(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let pool = Arc::new(
        PoolActor::new(
            toggle().build().unwrap(),
            Arc::new(rt.handle().clone()),
            None,
        )
        .unwrap(),
    );

    c.bench_function("pool_await_tokio", |b| {
        b.to_async(&rt).iter(|| {
            let pool = pool.clone();
            async move { black_box(pool.submit(Command::Transit(Signal(0))).await.unwrap()) }
        })
    });
}

criterion_group!(benches, bench_round_trip, bench_pipelined, bench_async);
criterion_main!(benches);
