//! Throughput of the vector generator + interpolator under a continuous
//! stream of blocks, with the consumer drained inline the way the stepper
//! interrupt would.

use criterion::{criterion_group, criterion_main, Criterion};

use ftm_core::ring::StepperChannel;
use ftm_core::{Block, FtConfig, FtMotion, FtMotionMode, PlannerQueue, PlannerSettings, NUM_AXES};

fn x_block(settings: &PlannerSettings, mm: f32) -> Block {
    let steps = (mm * settings.axis_steps_per_mm[0]) as u32;
    Block {
        steps: [steps, 0, 0, 0],
        millimeters: mm,
        step_event_count: steps,
        nominal_speed: 100.0,
        acceleration: 2000.0,
        ..Block::default()
    }
}

fn bench_pipeline(c: &mut Criterion) {
    c.bench_function("generate_and_interpolate_10mm_block_zv", |b| {
        let settings = PlannerSettings::default();
        let mut channel = StepperChannel::new();
        let (producer, mut consumer) = channel.split();
        let mut ftm = FtMotion::new(
            FtConfig {
                mode: FtMotionMode::Zv,
                ..FtConfig::default()
            },
            producer,
        );
        ftm.init();

        b.iter(|| {
            let mut planner = PlannerQueue::new();
            planner.push(x_block(&settings, 10.0)).unwrap();
            let mut pos = [0i64; NUM_AXES];
            loop {
                ftm.loop_tick(&mut planner, &settings, false);
                while let Some(word) = consumer.pop() {
                    pos[0] += (word & 1) as i64;
                }
                if !ftm.busy() && planner.is_empty() {
                    break;
                }
            }
            pos
        });
    });
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
