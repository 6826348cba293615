//! Tick driven software timers.
//!
//! Periodic interrupts only flip a [`TickSource`] flag. The main loop calls
//! [`TimerBank::observe`], which compares each flag against the level seen on
//! the previous pass and advances the running timers of that granularity on
//! a change. Two flips between observations cancel out and the tick is lost,
//! so the loop must come around faster than the fastest tick.

use core::sync::atomic::{AtomicBool, Ordering};

/// Timers saturate here instead of wrapping
pub const TICK_CEILING: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Granularity {
    /// ~1 ms per tick
    Millisecond,
    /// ~100 ms per tick
    Decisecond,
}

impl Granularity {
    pub const fn tick_millis(self) -> u32 {
        match self {
            Granularity::Millisecond => 1,
            Granularity::Decisecond => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    InvalidSlot(usize),
}

/// Toggle flags written from the periodic interrupts
pub struct TickSource {
    millisecond: AtomicBool,
    decisecond: AtomicBool,
}

impl TickSource {
    pub const fn new() -> Self {
        Self {
            millisecond: AtomicBool::new(false),
            decisecond: AtomicBool::new(false),
        }
    }

    /// Called once per period from the interrupt of that granularity
    pub fn toggle(&self, granularity: Granularity) {
        self.flag(granularity).fetch_xor(true, Ordering::Relaxed);
    }

    pub fn level(&self, granularity: Granularity) -> bool {
        self.flag(granularity).load(Ordering::Relaxed)
    }

    fn flag(&self, granularity: Granularity) -> &AtomicBool {
        match granularity {
            Granularity::Millisecond => &self.millisecond,
            Granularity::Decisecond => &self.decisecond,
        }
    }
}

impl Default for TickSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts ticks while running, never counts down
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollTimer {
    running: bool,
    expired: bool,
    ticks: u16,
}

impl PollTimer {
    pub fn arm(&mut self) {
        self.running = true;
    }

    pub fn disarm(&mut self) {
        self.running = false;
    }

    pub fn tick(&mut self) {
        if self.running && self.ticks < TICK_CEILING {
            self.ticks += 1;
        }
    }

    /// Zero the count and clear the expired flag, keeps the run state
    pub fn reset(&mut self) {
        self.ticks = 0;
        self.expired = false;
    }

    /// Latch and return whether `period` ticks have elapsed
    pub fn check(&mut self, period: u16) -> bool {
        if self.ticks >= period {
            self.expired = true;
        }
        self.expired
    }

    pub fn ticks(&self) -> u16 {
        self.ticks
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }
}

/// `N` timers per granularity
#[derive(Debug)]
pub struct TimerBank<const N: usize> {
    millisecond: [PollTimer; N],
    decisecond: [PollTimer; N],
    last_millisecond: bool,
    last_decisecond: bool,
}

impl<const N: usize> TimerBank<N> {
    pub fn new(source: &TickSource) -> Self {
        Self {
            millisecond: [PollTimer::default(); N],
            decisecond: [PollTimer::default(); N],
            last_millisecond: source.level(Granularity::Millisecond),
            last_decisecond: source.level(Granularity::Decisecond),
        }
    }

    /// Advance the timers of every granularity whose flag flipped since the last call
    pub fn observe(&mut self, source: &TickSource) {
        let level = source.level(Granularity::Millisecond);
        if level != self.last_millisecond {
            self.millisecond.iter_mut().for_each(PollTimer::tick);
            self.last_millisecond = level;
        }

        let level = source.level(Granularity::Decisecond);
        if level != self.last_decisecond {
            self.decisecond.iter_mut().for_each(PollTimer::tick);
            self.last_decisecond = level;
        }
    }

    pub fn reset(&mut self, slot: usize, granularity: Granularity) -> Result<(), TimerError> {
        self.timer_mut(slot, granularity)?.reset();
        Ok(())
    }

    pub fn timer(&self, slot: usize, granularity: Granularity) -> Result<&PollTimer, TimerError> {
        self.bank(granularity)
            .get(slot)
            .ok_or(TimerError::InvalidSlot(slot))
    }

    pub fn timer_mut(
        &mut self,
        slot: usize,
        granularity: Granularity,
    ) -> Result<&mut PollTimer, TimerError> {
        let bank = match granularity {
            Granularity::Millisecond => &mut self.millisecond,
            Granularity::Decisecond => &mut self.decisecond,
        };
        bank.get_mut(slot).ok_or(TimerError::InvalidSlot(slot))
    }

    fn bank(&self, granularity: Granularity) -> &[PollTimer; N] {
        match granularity {
            Granularity::Millisecond => &self.millisecond,
            Granularity::Decisecond => &self.decisecond,
        }
    }
}
