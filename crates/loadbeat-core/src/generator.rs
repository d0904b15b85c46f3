//! Generator engine: drives a `tick` callback at a configured rate, either
//! periodically (timer-driven) or one-shot (bus-driven, advanced only by an
//! explicit firing event).

use loadbeat_timing::Instant;

use crate::distribution::{DistOpt, DistType, Distribution};
use crate::event::EventType;
use crate::pool::Handle;
use crate::timer::TimerHandle;

/// How a generator decides when to produce its next unit of work.
///
/// The reference implementation represents "fire only on completion" as a
/// sentinel `DIST_NONE` distribution threaded through the same `next()`
/// dispatch as real distributions, whose function pointer happens to be
/// null; this crate makes it an explicit pacing mode instead; see
/// `SPEC_FULL.md`'s open-questions resolution.
#[derive(Clone, Copy)]
pub enum Pacing {
    Completion,
    Timed(Distribution),
}

impl Pacing {
    pub fn from_opt(opt: DistOpt, client_id: u32) -> Self {
        if opt.kind == DistType::None {
            Pacing::Completion
        } else {
            Pacing::Timed(Distribution::new(opt, client_id))
        }
    }

    pub fn is_completion_driven(&self) -> bool {
        matches!(self, Pacing::Completion)
    }
}

/// Explicit generator state, replacing the reference implementation's
/// "infer mode from a nullable timer pointer" approach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenState {
    Fresh,
    Armed,
    Done,
}

/// One pacing engine. Kept deliberately free of the payload it paces —
/// `owner` names what to act on (a connection, for the call generator; the
/// process itself, for the connection and size generators) and the actual
/// tick logic lives in `crate::conn_generator`/`crate::call_generator`.
pub struct Generator {
    pub state: GenState,
    pub pacing: Pacing,
    pub oneshot: bool,
    pub firing_event: Option<EventType>,
    pub start_time: Instant,
    pub next_time: Instant,
    pub timer: Option<TimerHandle>,
    pub owner: GeneratorOwner,
}

/// What this generator ticks on behalf of.
#[derive(Clone, Copy, Debug)]
pub enum GeneratorOwner {
    ConnGenerator,
    SizeGenerator,
    CallGenerator(Handle<crate::conn::Connection>),
}

impl Generator {
    pub fn fresh(pacing: Pacing, owner: GeneratorOwner) -> Self {
        let now = Instant::now();
        let oneshot = pacing.is_completion_driven();
        Self {
            state: GenState::Fresh,
            pacing,
            oneshot,
            firing_event: None,
            start_time: now,
            next_time: now,
            timer: None,
            owner,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == GenState::Done
    }

    /// Draws the next delay from the underlying distribution. Panics if
    /// called on a completion-driven generator — those never advance a
    /// distribution, by construction.
    pub fn next_delay(&mut self) -> loadbeat_timing::Duration {
        match &mut self.pacing {
            Pacing::Timed(dist) => loadbeat_timing::Duration::from_secs_f64(dist.next()),
            Pacing::Completion => {
                unreachable!("completion-driven generators never draw a delay")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_is_completion_driven() {
        let opt = DistOpt::parse("0").unwrap();
        let pacing = Pacing::from_opt(opt, 0);
        assert!(pacing.is_completion_driven());
        let gen = Generator::fresh(pacing, GeneratorOwner::ConnGenerator);
        assert!(gen.oneshot);
        assert_eq!(gen.state, GenState::Fresh);
    }

    #[test]
    fn nonzero_rate_is_timer_paced() {
        let opt = DistOpt::parse("d10").unwrap();
        let pacing = Pacing::from_opt(opt, 0);
        assert!(!pacing.is_completion_driven());
        let gen = Generator::fresh(pacing, GeneratorOwner::SizeGenerator);
        assert!(!gen.oneshot);
    }

    #[test]
    fn fresh_generator_is_not_done() {
        let opt = DistOpt::parse("d10").unwrap();
        let gen = Generator::fresh(Pacing::from_opt(opt, 0), GeneratorOwner::ConnGenerator);
        assert!(!gen.is_done());
    }

    #[test]
    #[should_panic(expected = "never draw a delay")]
    fn completion_driven_generator_cannot_draw_a_delay() {
        let mut gen = Generator::fresh(Pacing::Completion, GeneratorOwner::ConnGenerator);
        let _ = gen.next_delay();
    }
}
