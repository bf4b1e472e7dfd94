//! Function-pointer finite state machine for one thermal-cycling run.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  StateTable                                              │
//! │  ┌───────────┬───────────┬──────────┬──────────────────┐ │
//! │  │ RunStatus │ on_enter  │ on_exit  │ on_update        │ │
//! │  ├───────────┼───────────┼──────────┼──────────────────┤ │
//! │  │ Idle      │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Running   │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option  │ │
//! │  │ Completed │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Cancelled │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  │ Faulted   │ fn(ctx)   │ -        │ fn(ctx)->Option  │ │
//! │  └───────────┴───────────┴──────────┴──────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each polling tick the engine calls `on_update` for the **current**
//! state.  If it returns `Some(next)`, the engine runs `on_exit` for the
//! current state, then `on_enter` for the next.  All functions receive
//! `&mut RunContext`, which holds the tick inputs, the step timing, the
//! PID controller, and the outputs (actuator command, log row) the cycle
//! controller applies after the tick.

pub mod context;
pub mod states;

use context::RunContext;
use log::info;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Lifecycle of a run: `Idle → Running → {Completed | Cancelled | Faulted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RunStatus {
    Idle = 0,
    Running = 1,
    Completed = 2,
    Cancelled = 3,
    Faulted = 4,
}

impl RunStatus {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 5;

    /// Convert an index back to `RunStatus`.  Panics on out-of-range in
    /// debug builds; returns `Faulted` in release.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Cancelled,
            4 => Self::Faulted,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Faulted
            }
        }
    }

    /// Whether a run in this state has ended.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Faulted)
    }

    /// Legal edges of the run lifecycle.  A terminal run may be restarted.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::Running) => true,
            (Self::Running, n) => n.is_terminal(),
            // A neutral command that fails on the way out still faults.
            (Self::Cancelled | Self::Completed, Self::Faulted) => true,
            (s, Self::Running) => s.is_terminal(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut RunContext);

/// Signature for the per-tick update handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut RunContext) -> Option<RunStatus>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single run state.
pub struct StateDescriptor {
    pub id: RunStatus,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The run state machine engine.
pub struct Fsm {
    /// Fixed-size table indexed by `RunStatus as usize`.
    table: [StateDescriptor; RunStatus::COUNT],
    current: usize,
}

impl Fsm {
    pub fn new(table: [StateDescriptor; RunStatus::COUNT], initial: RunStatus) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Advance the machine by one polling tick.
    pub fn tick(&mut self, ctx: &mut RunContext) {
        let next = (self.table[self.current].on_update)(ctx);

        if let Some(next_id) = next {
            self.transition(next_id, ctx);
        }
    }

    /// Force an immediate transition (run start, transport failure).
    pub fn force_transition(&mut self, next: RunStatus, ctx: &mut RunContext) {
        if next as usize != self.current || next == RunStatus::Running {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> RunStatus {
        RunStatus::from_index(self.current)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: RunStatus, ctx: &mut RunContext) {
        let next_idx = next_id as usize;
        debug_assert!(
            self.current_state().can_transition_to(next_id),
            "illegal run transition {:?} -> {:?}",
            self.current_state(),
            next_id
        );

        info!(
            "RUN transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
