//! Pipeline-level tests driving the public API: blocks in, command words
//! out, with the consumer side played by the test.

use ftm_core::ring::{
    StepperChannel, StepperConsumer, FTM_STEPPERCMD_BUFF_SIZE, FT_BIT_SYNC_BLOCK_INFO,
    FT_BIT_SYNC_POS, FT_BIT_SYNC_POS_E, FT_DIR_BITS, FT_STEP_BITS,
};
use ftm_core::{
    Block, FtConfig, FtMotion, FtMotionMode, PlannerQueue, PlannerSettings, E_AXIS, NUM_AXES,
    X_AXIS, Y_AXIS, Z_AXIS,
};

const SYNC_BITS: u32 = FT_BIT_SYNC_POS | FT_BIT_SYNC_POS_E | FT_BIT_SYNC_BLOCK_INFO;

fn move_block(settings: &PlannerSettings, delta_mm: [f32; NUM_AXES], nominal: f32) -> Block {
    let mut steps = [0u32; NUM_AXES];
    let mut direction_bits = 0u8;
    let mut length_sq = 0.0f32;
    for a in 0..NUM_AXES {
        steps[a] = (delta_mm[a].abs() * settings.axis_steps_per_mm[a] + 0.5) as u32;
        if delta_mm[a] < 0.0 {
            direction_bits |= 1 << a;
        }
        if a != E_AXIS {
            length_sq += delta_mm[a] * delta_mm[a];
        }
    }
    let millimeters = if length_sq > 0.0 {
        length_sq.sqrt()
    } else {
        delta_mm[E_AXIS].abs()
    };
    Block {
        steps,
        direction_bits,
        millimeters,
        step_event_count: *steps.iter().max().unwrap(),
        initial_rate: 0,
        final_rate: 0,
        nominal_speed: nominal,
        acceleration: 1000.0,
        ..Block::default()
    }
}

fn apply_word(word: u32, pos: &mut [i64; NUM_AXES]) {
    if word & SYNC_BITS != 0 {
        return;
    }
    for a in 0..NUM_AXES {
        if word & FT_STEP_BITS[a] != 0 {
            pos[a] += if word & FT_DIR_BITS[a] != 0 { -1 } else { 1 };
        }
    }
}

fn run_to_idle(
    ftm: &mut FtMotion<'_>,
    consumer: &mut StepperConsumer<'_>,
    planner: &mut PlannerQueue,
    settings: &PlannerSettings,
    pos: &mut [i64; NUM_AXES],
) {
    for _ in 0..200_000 {
        ftm.loop_tick(planner, settings, false);
        while let Some(word) = consumer.pop() {
            apply_word(word, pos);
        }
        if !ftm.busy() && planner.is_empty() {
            return;
        }
    }
    panic!("pipeline failed to go idle");
}

#[test]
fn coast_only_block_delivers_expected_steps() {
    let settings = PlannerSettings::default();
    let mut channel = StepperChannel::new();
    let (producer, mut consumer) = channel.split();
    let mut ftm = FtMotion::new(
        FtConfig {
            mode: FtMotionMode::Enabled,
            ..FtConfig::default()
        },
        producer,
    );
    ftm.init();

    // Entry, exit and nominal feedrate all equal: a pure coast.
    let mut block = move_block(&settings, [50.0, 0.0, 0.0, 0.0], 50.0);
    block.initial_rate = 4000;
    block.final_rate = 4000;

    let mut planner = PlannerQueue::new();
    planner.push(block).unwrap();
    let mut pos = [0i64; NUM_AXES];
    run_to_idle(&mut ftm, &mut consumer, &mut planner, &settings, &mut pos);

    assert!((pos[X_AXIS] - 4000).abs() <= 1, "X steps {}", pos[X_AXIS]);
}

#[test]
fn multi_block_sequence_accumulates_positions() {
    let settings = PlannerSettings::default();
    let mut channel = StepperChannel::new();
    let (producer, mut consumer) = channel.split();
    let mut ftm = FtMotion::new(
        FtConfig {
            mode: FtMotionMode::Enabled,
            ..FtConfig::default()
        },
        producer,
    );
    ftm.init();

    // Out, sideways with retraction, and back: per-axis nets must agree
    // with the commanded deltas, not just per-block totals.
    let moves: [[f32; NUM_AXES]; 3] = [
        [20.0, 0.0, 0.0, 1.0],
        [0.0, 15.0, 0.5, -0.2],
        [-20.0, -15.0, 0.0, 0.8],
    ];
    let mut planner = PlannerQueue::new();
    for delta in moves {
        planner.push(move_block(&settings, delta, 80.0)).unwrap();
    }
    let mut pos = [0i64; NUM_AXES];
    run_to_idle(&mut ftm, &mut consumer, &mut planner, &settings, &mut pos);

    let mut expect = [0.0f32; NUM_AXES];
    for delta in moves {
        for a in 0..NUM_AXES {
            expect[a] += delta[a];
        }
    }
    for a in 0..NUM_AXES {
        let steps = (expect[a] * settings.axis_steps_per_mm[a]).round() as i64;
        assert!(
            (pos[a] - steps).abs() <= 1,
            "axis {a}: got {} want {steps}",
            pos[a]
        );
    }
    let end = ftm.generated_end_position();
    assert!((end[X_AXIS] - 0.0).abs() < 1e-3);
    assert!((end[Y_AXIS] - 0.0).abs() < 1e-3);
}

#[test]
fn tiny_block_still_round_trips_within_one_step() {
    let settings = PlannerSettings::default();
    let mut channel = StepperChannel::new();
    let (producer, mut consumer) = channel.split();
    let mut ftm = FtMotion::new(
        FtConfig {
            mode: FtMotionMode::Enabled,
            ..FtConfig::default()
        },
        producer,
    );
    ftm.init();

    // One Z step's worth of travel: a sub-millimeter, few-sample block.
    let delta = 1.0 / settings.axis_steps_per_mm[Z_AXIS];
    let mut planner = PlannerQueue::new();
    planner
        .push(move_block(&settings, [0.0, 0.0, delta, 0.0], 5.0))
        .unwrap();
    let mut pos = [0i64; NUM_AXES];
    run_to_idle(&mut ftm, &mut consumer, &mut planner, &settings, &mut pos);

    assert!((pos[Z_AXIS] - 1).abs() <= 1, "Z steps {}", pos[Z_AXIS]);
}

#[test]
fn backpressure_defers_interpolation_without_losing_commands() {
    let settings = PlannerSettings::default();
    let mut channel = StepperChannel::new();
    let (producer, mut consumer) = channel.split();
    let mut ftm = FtMotion::new(
        FtConfig {
            mode: FtMotionMode::Enabled,
            ..FtConfig::default()
        },
        producer,
    );
    ftm.init();

    // 50 mm generates 12k command words, several times the ring capacity.
    let mut planner = PlannerQueue::new();
    planner
        .push(move_block(&settings, [50.0, 0.0, 0.0, 0.0], 100.0))
        .unwrap();

    // Let the ring fill with no consumer running.
    let mut max_items = 0;
    for _ in 0..500 {
        ftm.loop_tick(&mut planner, &settings, false);
        max_items = max_items.max(consumer.items());
    }
    assert!(max_items <= FTM_STEPPERCMD_BUFF_SIZE - 1);
    assert!(max_items > FTM_STEPPERCMD_BUFF_SIZE / 2, "ring never filled");

    // Now drain slowly; every generated word must come through in order
    // and land on the commanded position.
    let mut pos = [0i64; NUM_AXES];
    for _ in 0..200_000 {
        ftm.loop_tick(&mut planner, &settings, false);
        for _ in 0..64 {
            match consumer.pop() {
                Some(word) => apply_word(word, &mut pos),
                None => break,
            }
        }
        if !ftm.busy() && planner.is_empty() {
            break;
        }
    }
    while let Some(word) = consumer.pop() {
        apply_word(word, &mut pos);
    }
    assert!((pos[X_AXIS] - 4000).abs() <= 1, "X steps {}", pos[X_AXIS]);
    assert_eq!(pos[Y_AXIS], 0);
}
