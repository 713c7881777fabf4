// src/config.rs

use crate::error::{Error, Result};

// Stack configuration
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024; // 256 KiB
pub const MIN_STACK_SIZE: usize = 16 * 1024;

// Preemption frequency, 100 ticks per second
pub const HZ: u32 = 100;

const MAX_TICK_HZ: u32 = 1_000_000;

/// Per-run settings handed to [`crate::run_with_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Force a yield on every timer tick
    pub preempt: bool,
    /// Usable bytes per thread stack, rounded up to the page size
    pub stack_size: usize,
    /// Timer ticks per second of consumed CPU time
    pub tick_hz: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            preempt: false,
            stack_size: DEFAULT_STACK_SIZE,
            tick_hz: HZ,
        }
    }
}

impl Config {
    pub fn preemptive() -> Self {
        Config {
            preempt: true,
            ..Config::default()
        }
    }

    pub fn with_preempt(mut self, preempt: bool) -> Self {
        self.preempt = preempt;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_tick_hz(mut self, tick_hz: u32) -> Self {
        self.tick_hz = tick_hz;
        self
    }

    /// Microseconds between two timer ticks.
    pub fn tick_interval(&self) -> u64 {
        1_000_000 / u64::from(self.tick_hz.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_hz == 0 || self.tick_hz > MAX_TICK_HZ {
            return Err(Error::InvalidArgument("tick rate must be between 1 Hz and 1 MHz"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::InvalidArgument("stack size below MIN_STACK_SIZE"));
        }
        Ok(())
    }
}
