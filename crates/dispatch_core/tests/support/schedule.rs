#![allow(dead_code)]

use bevy_ecs::prelude::World;
use bevy_ecs::schedule::Schedule;
use dispatch_core::error::DispatchResult;
use dispatch_core::runner::{dispatch_schedule, run_tick, run_ticks};

/// Owns a reusable `Schedule` so tests can step tick by tick or run a range.
pub struct ScheduleRunner {
    schedule: Schedule,
    step: u64,
}

impl Default for ScheduleRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScheduleRunner {
    /// One-second ticks on the default dispatch schedule.
    pub fn new() -> Self {
        Self {
            schedule: dispatch_schedule(),
            step: 1,
        }
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn run_one(&mut self, world: &mut World, now: u64) -> DispatchResult<()> {
        run_tick(world, &mut self.schedule, now)
    }

    /// Tick from `from` to `to` inclusive; panics on the first error.
    pub fn run_range(&mut self, world: &mut World, from: u64, to: u64) -> usize {
        run_ticks(
            world,
            &mut self.schedule,
            (from..=to).step_by(self.step as usize),
        )
        .expect("ticks should run cleanly")
    }
}
