//! Cross-rank agreement on stop decisions.
//!
//! A training job may run as several cooperating ranks. Before any rank acts
//! on a stop decision, all of them must agree on it, otherwise one rank
//! leaves the loop while the others block in their next collective.

use std::sync::{Arc, Condvar, Mutex};
use timebox_core::{Result, TimeboxError};

/// Collective boolean agreement provided by the training host.
pub trait DecisionReducer: Send + Sync {
    /// Combine this rank's `decision` with every other rank's.
    ///
    /// Every rank must call this the same number of times.
    fn reduce_boolean_decision(&self, decision: bool) -> bool;

    /// Index of this rank in the group.
    fn rank(&self) -> usize {
        0
    }

    /// Number of ranks in the group.
    fn world_size(&self) -> usize {
        1
    }

    /// Whether this is rank zero, the one that logs.
    fn is_global_zero(&self) -> bool {
        self.rank() == 0
    }

    /// Tell the group this rank is leaving the loop on an error.
    ///
    /// Ranks waiting in a reduction are released, and every later reduction
    /// agrees to stop.
    fn abort(&self) {}

    /// Whether any rank of the group has aborted.
    fn is_aborted(&self) -> bool {
        false
    }
}

/// Single-process training: the local decision is the agreed decision.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl DecisionReducer for SingleProcess {
    fn reduce_boolean_decision(&self, decision: bool) -> bool {
        decision
    }
}

#[derive(Debug)]
struct Round {
    /// Votes cast so far in the open round.
    arrived: usize,
    /// AND of the votes cast so far in the open round.
    all_true: bool,
    /// Bumped each time a round closes.
    generation: u64,
    /// Outcome of the last closed round.
    agreed: bool,
    aborted: bool,
}

#[derive(Debug)]
struct GroupShared {
    round: Mutex<Round>,
    closed: Condvar,
}

/// A group of in-process ranks (one per thread) sharing a reduction.
///
/// The agreed decision is `true` only when every rank voted `true`. Once a
/// rank aborts, every reduction returns `true` without waiting.
#[derive(Debug)]
pub struct LocalGroup {
    shared: Arc<GroupShared>,
    world_size: usize,
}

impl LocalGroup {
    pub fn new(world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(TimeboxError::config("a rank group needs at least one rank"));
        }
        Ok(Self {
            shared: Arc::new(GroupShared {
                round: Mutex::new(Round {
                    arrived: 0,
                    all_true: true,
                    generation: 0,
                    agreed: false,
                    aborted: false,
                }),
                closed: Condvar::new(),
            }),
            world_size,
        })
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// One handle per rank, in rank order. Move each into its own thread.
    pub fn into_ranks(self) -> Vec<LocalRank> {
        (0..self.world_size)
            .map(|rank| LocalRank {
                rank,
                world_size: self.world_size,
                shared: Arc::clone(&self.shared),
            })
            .collect()
    }
}

/// One rank's handle on a [`LocalGroup`].
#[derive(Debug)]
pub struct LocalRank {
    rank: usize,
    world_size: usize,
    shared: Arc<GroupShared>,
}

impl DecisionReducer for LocalRank {
    fn reduce_boolean_decision(&self, decision: bool) -> bool {
        let mut round = self.shared.round.lock().unwrap_or_else(|e| e.into_inner());
        if round.aborted {
            return true;
        }

        round.all_true &= decision;
        round.arrived += 1;
        if round.arrived == self.world_size {
            round.agreed = round.all_true;
            round.arrived = 0;
            round.all_true = true;
            round.generation += 1;
            self.shared.closed.notify_all();
            return round.agreed;
        }

        // No rank can close the next round before this one has returned, so
        // `agreed` still holds this round's outcome when we wake.
        let generation = round.generation;
        let round = self
            .shared
            .closed
            .wait_while(round, |r| r.generation == generation && !r.aborted)
            .unwrap_or_else(|e| e.into_inner());
        if round.generation == generation {
            return true;
        }
        round.agreed
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn abort(&self) {
        let mut round = self.shared.round.lock().unwrap_or_else(|e| e.into_inner());
        if !round.aborted {
            tracing::warn!(rank = self.rank, "Rank aborted, releasing the group");
        }
        round.aborted = true;
        self.shared.closed.notify_all();
    }

    fn is_aborted(&self) -> bool {
        self.shared
            .round
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .aborted
    }
}
