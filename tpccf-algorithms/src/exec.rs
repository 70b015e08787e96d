//! Data-parallel execution of cluster finder kernels.
//!
//! Every stage is written once as a *group kernel*: a function that runs
//! for one group of `group_size` logical lanes and owns that group's shared
//! scratch memory. The [`Executor`] decides how groups are scheduled, either
//! one after the other or spread over the rayon thread pool. Groups never
//! share mutable state, so every backend produces the same results.
//!
//! Inside a group, [`GroupScope::lanes`] runs one phase for all lanes. A
//! phase completes for every lane before the next one starts, which gives
//! kernels the barrier they need when lanes read data staged by other lanes.
//! Within a single phase a lane must only read shared data written by earlier
//! phases.

use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Scheduling strategy for groups.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Backend {
    /// Groups run in order on the calling thread.
    Serial,
    /// Groups run on the rayon thread pool.
    #[default]
    Parallel,
}

/// Runs group kernels on the configured backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Executor {
    backend: Backend,
}

impl Executor {
    /// Creates an executor for `backend`.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Executor running everything on the calling thread.
    #[must_use]
    pub fn serial() -> Self {
        Self::new(Backend::Serial)
    }

    /// Executor running groups on the rayon thread pool.
    #[must_use]
    pub fn parallel() -> Self {
        Self::new(Backend::Parallel)
    }

    /// The configured backend.
    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Rounds `n` up to a whole number of groups.
    #[must_use]
    pub fn padded_len(n: usize, group_size: usize) -> usize {
        n.div_ceil(group_size) * group_size
    }

    /// Runs `kernel` once per chunk of `group_size` output slots.
    ///
    /// The last chunk may be shorter than `group_size`; the kernel still runs
    /// all lanes of that group and must discard results of lanes past the
    /// end of its chunk. Each group gets fresh shared memory from `init`.
    pub fn run_groups<T, S, I, K>(&self, out: &mut [T], group_size: usize, init: I, kernel: K)
    where
        T: Send,
        S: Send,
        I: Fn() -> S + Sync,
        K: Fn(&mut GroupScope<'_, S>, &mut [T]) + Sync,
    {
        debug_assert!(group_size > 0, "group size must be positive");
        let run = |(index, chunk): (usize, &mut [T])| {
            let mut shared = init();
            let mut scope = GroupScope::new(index, group_size, &mut shared);
            kernel(&mut scope, chunk);
        };
        match self.backend {
            Backend::Serial => out.chunks_mut(group_size).enumerate().for_each(run),
            Backend::Parallel => out.par_chunks_mut(group_size).enumerate().for_each(run),
        }
    }

    /// Runs `kernel` for `num_groups` groups without a chunked output.
    ///
    /// Kernels publish results through order-independent sinks such as
    /// [`tpccf_core::PadNoiseFlags`].
    pub fn run_indexed<S, I, K>(&self, num_groups: usize, group_size: usize, init: I, kernel: K)
    where
        S: Send,
        I: Fn() -> S + Sync,
        K: Fn(&mut GroupScope<'_, S>) + Sync,
    {
        debug_assert!(group_size > 0, "group size must be positive");
        let run = |index: usize| {
            let mut shared = init();
            let mut scope = GroupScope::new(index, group_size, &mut shared);
            kernel(&mut scope);
        };
        match self.backend {
            Backend::Serial => (0..num_groups).for_each(run),
            Backend::Parallel => (0..num_groups).into_par_iter().for_each(run),
        }
    }

    /// Maps every item to a result, keeping item order.
    pub fn map<T, U, F>(&self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(usize, &T) -> U + Sync + Send,
    {
        match self.backend {
            Backend::Serial => items.iter().enumerate().map(|(i, item)| f(i, item)).collect(),
            Backend::Parallel => items
                .par_iter()
                .enumerate()
                .map(|(i, item)| f(i, item))
                .collect(),
        }
    }

    /// Runs `f` on every item with exclusive access.
    pub fn for_each_mut<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send,
        F: Fn(usize, &mut T) + Sync + Send,
    {
        match self.backend {
            Backend::Serial => items.iter_mut().enumerate().for_each(|(i, item)| f(i, item)),
            Backend::Parallel => items
                .par_iter_mut()
                .enumerate()
                .for_each(|(i, item)| f(i, item)),
        }
    }
}

/// One group of lanes and its shared scratch memory.
pub struct GroupScope<'s, S> {
    index: usize,
    size: usize,
    shared: &'s mut S,
    phases: usize,
}

impl<'s, S> GroupScope<'s, S> {
    fn new(index: usize, size: usize, shared: &'s mut S) -> Self {
        Self {
            index,
            size,
            shared,
            phases: 0,
        }
    }

    /// Index of this group.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of lanes in this group.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Global id of the first lane.
    #[must_use]
    pub fn base(&self) -> usize {
        self.index * self.size
    }

    /// Number of phases (barriers) run so far.
    #[must_use]
    pub fn phases(&self) -> usize {
        self.phases
    }

    /// Shared memory of the group.
    #[must_use]
    pub fn shared(&self) -> &S {
        &*self.shared
    }

    /// Runs one phase on every lane, followed by a barrier.
    pub fn lanes<F>(&mut self, mut f: F)
    where
        F: FnMut(usize, &mut S),
    {
        for lane in 0..self.size {
            f(lane, &mut *self.shared);
        }
        self.phases += 1;
    }

    /// Runs one phase on every lane with per-lane private state.
    ///
    /// `registers` holds one entry per lane and persists across phases.
    pub fn lanes_with<L, F>(&mut self, registers: &mut [L], mut f: F)
    where
        F: FnMut(usize, &mut L, &mut S),
    {
        debug_assert_eq!(registers.len(), self.size, "one register set per lane");
        for (lane, regs) in registers.iter_mut().enumerate() {
            f(lane, regs, &mut *self.shared);
        }
        self.phases += 1;
    }

    /// Runs a phase on a single lane, followed by a barrier.
    ///
    /// Used for group-wide collectives such as scans over shared memory.
    pub fn single<F>(&mut self, f: F)
    where
        F: FnOnce(&mut S),
    {
        f(&mut *self.shared);
        self.phases += 1;
    }
}
