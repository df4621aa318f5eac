//! # FTM Simulation Harness
//!
//! Runs the fixed-time motion core against a simulated stepper interrupt,
//! entirely in-process: a [`FakeStepper`] drains the command ring and
//! tracks absolute step positions the way the real ISR drives step/dir
//! pins, while [`SimRig`] wires the core to a miniature planner that turns
//! millimeter moves into planner blocks.
//!
//! Used by the integration tests and by the `ftm-sim` batch binary for
//! offline analysis of jobs without a live machine.

pub mod fake_stepper;
pub mod harness;

pub use fake_stepper::FakeStepper;
pub use harness::{JobError, JobMove, JobSummary, SimRig};
