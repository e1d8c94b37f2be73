//! The room state machine: applies actions and decides which side effects
//! are due.
//!
//! [`RoomMachine`] does no I/O and never reads a clock. The caller passes
//! the current [`Moment`] in and gets back [`Effects`] telling it whether to
//! broadcast and/or persist. The room actor is the only production caller;
//! tests drive it with hand-made instants.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use boardcast_protocol::{Action, Player, RoomState};

use crate::RoomConfig;

/// A point in time, as both a monotonic instant (for throttling) and wall
/// clock milliseconds (for `lastUpdate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub instant: Instant,
    pub unix_ms: u64,
}

impl Moment {
    /// Reads both clocks.
    ///
    /// The monotonic half comes from tokio's clock so paused-time tests
    /// control it.
    pub fn now() -> Self {
        Self {
            instant: tokio::time::Instant::now().into_std(),
            unix_ms: unix_millis(),
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch (0 if the clock is before
/// the epoch).
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// A minimum-interval gate for one recurring side effect.
///
/// The gate is open when strictly more than `interval` has passed since it
/// last fired. A gate that has never fired is open.
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        }
    }

    /// Records that the effect happened at `now`, whether or not the gate
    /// was open (JOIN uses this to bypass the gate).
    pub fn fire(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Fires if open. Returns whether it fired.
    pub fn try_fire(&mut self, now: Instant) -> bool {
        let open = self.is_open(now);
        if open {
            self.fire(now);
        }
        open
    }

    /// The earliest instant at which the gate will be open again.
    pub fn opens_at(&self) -> Option<Instant> {
        // Strictly-greater comparison: one millisecond past the interval.
        self.last
            .map(|last| last + self.interval + Duration::from_millis(1))
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Which side effects an applied action (or a flush) calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Effects {
    pub broadcast: bool,
    pub persist: bool,
}

impl Effects {
    pub const NONE: Self = Self {
        broadcast: false,
        persist: false,
    };
    pub const ALL: Self = Self {
        broadcast: true,
        persist: true,
    };

    pub fn is_none(self) -> bool {
        !self.broadcast && !self.persist
    }
}

// ---------------------------------------------------------------------------
// RoomMachine
// ---------------------------------------------------------------------------

/// Authoritative room state plus the broadcast and persistence gates.
#[derive(Debug, Clone)]
pub struct RoomMachine {
    state: RoomState,
    broadcast: Throttle,
    persist: Throttle,
    /// A MOVE changed the state but its broadcast was held back.
    unbroadcast: bool,
    /// The state changed since the last persistence write was issued.
    unpersisted: bool,
}

impl RoomMachine {
    /// Wraps a loaded (or fresh) state.
    pub fn new(state: RoomState, config: &RoomConfig) -> Self {
        Self {
            state,
            broadcast: Throttle::new(config.broadcast_interval),
            persist: Throttle::new(config.persist_interval),
            unbroadcast: false,
            unpersisted: false,
        }
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    /// Applies one action and reports which effects are due.
    ///
    /// - JOIN (re)creates the player and always broadcasts and persists,
    ///   restarting both gates.
    /// - MOVE of a known player updates its position; each effect happens
    ///   only if its gate is open.
    /// - MOVE of an unknown player and END_TURN change nothing and cause
    ///   nothing.
    pub fn apply(&mut self, action: Action, at: Moment) -> Effects {
        match action {
            Action::Join { id } => {
                self.state
                    .players
                    .insert(id.clone(), Player::joined(id));
                self.state.last_update = at.unix_ms;

                self.broadcast.fire(at.instant);
                self.persist.fire(at.instant);
                self.unbroadcast = false;
                self.unpersisted = false;
                Effects::ALL
            }
            Action::Move { id, x, y } => {
                let Some(player) = self.state.players.get_mut(&id) else {
                    tracing::trace!(player = %id, "move for unknown player ignored");
                    return Effects::NONE;
                };
                player.x = x;
                player.y = y;
                self.state.last_update = at.unix_ms;

                self.unbroadcast = true;
                self.unpersisted = true;
                self.flush(at)
            }
            Action::EndTurn => Effects::NONE,
        }
    }

    /// Fires whichever held-back effects have an open gate at `at`.
    pub fn flush(&mut self, at: Moment) -> Effects {
        let broadcast = self.unbroadcast && self.broadcast.try_fire(at.instant);
        if broadcast {
            self.unbroadcast = false;
        }
        let persist = self.unpersisted && self.persist.try_fire(at.instant);
        if persist {
            self.unpersisted = false;
        }
        Effects { broadcast, persist }
    }

    /// When the next held-back effect can fire, if any is pending.
    pub fn next_flush_due(&self) -> Option<Instant> {
        let broadcast = self
            .unbroadcast
            .then(|| self.broadcast.opens_at())
            .flatten();
        let persist = self
            .unpersisted
            .then(|| self.persist.opens_at())
            .flatten();
        match (broadcast, persist) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether the state changed since the last persistence write. Clears
    /// the flag; the caller is expected to write the state now.
    pub fn take_unpersisted(&mut self) -> bool {
        std::mem::take(&mut self.unpersisted)
    }
}
