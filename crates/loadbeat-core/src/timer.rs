//! Hashed timer wheel: O(1) schedule/cancel of millisecond-precision
//! timeouts. 4096 spokes at 1 ms each give a rotation of ~4.096 s; timeouts
//! longer than a rotation are represented by `delta`, the number of extra
//! full rotations a timer must wait at its resting spoke.

use loadbeat_timing::{Duration, Instant};

pub const WHEEL_SIZE: usize = 4096;
const TICK_INTERVAL: Duration = Duration(0.001);

/// A live timer handle. Indexes into the wheel's slot arena; the generation
/// guards against a cancelled-then-reused slot being mistaken for the timer
/// a stale handle used to point at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerHandle {
    index: u32,
    generation: u32,
}

/// What a timer does when it fires. The reference implementation stores a
/// bare function pointer plus an opaque argument; this crate has a closed,
/// small set of call sites, so an enum is both safer and more legible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerAction {
    ConnGenTick,
    CallGenTick { conn: crate::pool::Handle<crate::conn::Connection> },
    ConnectWatchdog { conn: crate::pool::Handle<crate::conn::Connection> },
    ResponseWatchdog { conn: crate::pool::Handle<crate::conn::Connection> },
}

struct Slot {
    action: Option<TimerAction>,
    generation: u32,
    delta: u32,
    next: Option<u32>,
}

/// Owns the spoke array and the timer arena. There is exactly one wheel per
/// run, ticked from the run loop.
pub struct TimerWheel {
    spokes: Vec<Option<u32>>,
    slots: Vec<Slot>,
    freelist: Vec<u32>,
    widx: usize,
    next_tick: Instant,
    now: Instant,
}

impl TimerWheel {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            spokes: vec![None; WHEEL_SIZE],
            slots: Vec::new(),
            freelist: Vec::new(),
            widx: 0,
            next_tick: now + TICK_INTERVAL,
            now,
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    fn alloc(&mut self, action: TimerAction) -> u32 {
        if let Some(index) = self.freelist.pop() {
            let slot = &mut self.slots[index as usize];
            slot.action = Some(action);
            slot.delta = 0;
            slot.next = None;
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { action: Some(action), generation: 0, delta: 0, next: None });
            index
        }
    }

    /// Schedules `action` to fire after `delay`. Lateness accrued since the
    /// wheel's last tick is folded into `delay` first so a caller that
    /// scheduled while the wheel was already behind never gets rewarded
    /// with an effectively shorter timeout.
    pub fn schedule(&mut self, action: TimerAction, delay: Duration) -> TimerHandle {
        let lateness = self.now.duration_since(self.next_tick - TICK_INTERVAL);
        let delay = if lateness.as_secs_f64() > 0.0 { delay + lateness } else { delay };

        let ticks = ((delay.as_millis_f64() + 0.5).floor() as i64).max(1) as u32;
        let sidx = (self.widx + ticks as usize) % WHEEL_SIZE;
        let delta = ticks / WHEEL_SIZE as u32;

        let index = self.alloc(action);
        let generation = self.slots[index as usize].generation;

        // Walk the spoke, consuming `delta` from each predecessor until we
        // find where this timer belongs; the residual delta is what this
        // timer itself carries.
        let mut delta_remaining = delta;
        let mut prev: Option<u32> = None;
        let mut cur = self.spokes[sidx];
        while let Some(cidx) = cur {
            if self.slots[cidx as usize].delta > delta_remaining {
                break;
            }
            delta_remaining -= self.slots[cidx as usize].delta;
            prev = Some(cidx);
            cur = self.slots[cidx as usize].next;
        }

        self.slots[index as usize].delta = delta_remaining;
        self.slots[index as usize].next = cur;
        if let Some(cidx) = cur {
            self.slots[cidx as usize].delta -= delta_remaining;
        }
        match prev {
            Some(pidx) => self.slots[pidx as usize].next = Some(index),
            None => self.spokes[sidx] = Some(index),
        }

        TimerHandle { index, generation }
    }

    /// Cancels a still-live timer. The successor absorbs the cancelled
    /// timer's delta so relative ordering within the spoke is unaffected.
    pub fn cancel(&mut self, handle: TimerHandle) {
        let TimerHandle { index, generation } = handle;
        if self.slots[index as usize].generation != generation {
            return; // already fired or already cancelled
        }

        let removed_delta = self.slots[index as usize].delta;
        let next = self.slots[index as usize].next;
        if let Some(nidx) = next {
            self.slots[nidx as usize].delta += removed_delta;
        }

        self.unlink(index, next);
        self.free(index);
    }

    fn unlink(&mut self, index: u32, next: Option<u32>) {
        for spoke in &mut self.spokes {
            if *spoke == Some(index) {
                *spoke = next;
                return;
            }
        }
        for slot in &mut self.slots {
            if slot.next == Some(index) {
                slot.next = next;
                return;
            }
        }
    }

    fn free(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.action = None;
        slot.generation = slot.generation.wrapping_add(1);
        slot.next = None;
        self.freelist.push(index);
    }

    /// Advances the wheel, firing every timer whose spoke has been reached.
    /// Returns the fired actions so the run loop can dispatch them without
    /// holding a borrow of the wheel across the callback.
    pub fn tick(&mut self) -> Vec<TimerAction> {
        self.now = Instant::now();
        let mut fired = Vec::new();

        while self.now >= self.next_tick {
            let head = self.spokes[self.widx];
            if let Some(hidx) = head {
                if self.slots[hidx as usize].delta == 0 {
                    let next = self.slots[hidx as usize].next;
                    self.spokes[self.widx] = next;
                    if let Some(action) = self.slots[hidx as usize].action {
                        fired.push(action);
                    }
                    self.free(hidx);
                } else {
                    self.slots[hidx as usize].delta -= 1;
                }
            }
            self.widx = (self.widx + 1) % WHEEL_SIZE;
            self.next_tick += TICK_INTERVAL;
        }

        fired
    }

    #[cfg(test)]
    fn total_delta(&self) -> u64 {
        self.spokes
            .iter()
            .filter_map(|h| *h)
            .map(|mut idx| {
                let mut sum = 0u64;
                loop {
                    sum += u64::from(self.slots[idx as usize].delta) + 1;
                    match self.slots[idx as usize].next {
                        Some(n) => idx = n,
                        None => break,
                    }
                }
                sum
            })
            .sum()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Handle;

    fn dummy_action() -> TimerAction {
        TimerAction::ConnectWatchdog { conn: Handle::from_raw(0, 0) }
    }

    #[test]
    fn schedule_then_cancel_shrinks_wheel() {
        let mut wheel = TimerWheel::new();
        let before = wheel.total_delta();
        let h = wheel.schedule(dummy_action(), Duration::from_millis_f64(50.0));
        assert!(wheel.total_delta() > before);
        wheel.cancel(h);
        assert_eq!(wheel.total_delta(), before);
    }

    #[test]
    fn short_delay_fires_within_a_few_ticks() {
        let mut wheel = TimerWheel::new();
        wheel.schedule(dummy_action(), Duration::from_millis_f64(1.0));
        let mut fired = Vec::new();
        for _ in 0..20 {
            std::thread::sleep(std::time::Duration::from_millis(1));
            fired.extend(wheel.tick());
            if !fired.is_empty() {
                break;
            }
        }
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn cancel_is_idempotent_on_a_stale_handle() {
        let mut wheel = TimerWheel::new();
        let h = wheel.schedule(dummy_action(), Duration::from_millis_f64(5.0));
        wheel.cancel(h);
        wheel.cancel(h); // must not panic or double-free
    }
}
