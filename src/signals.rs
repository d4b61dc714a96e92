//! Signals that a handle can raise, and the snapshot of which ones are raised or still possible.

bitflags::bitflags! {
    /// A set of handle signals.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HandleSignals: u32 {
        /// A message (or data) can be read without waiting.
        const READABLE = 1 << 0;
        /// A message (or data) can be written without waiting.
        const WRITABLE = 1 << 1;
    }
}

/// The signals currently raised on a handle, together with the ones that may still be raised at
/// some point in the future.
///
/// `satisfied` is always a subset of `satisfiable`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct HandleSignalsState {
    /// Signals raised right now.
    pub satisfied: HandleSignals,
    /// Signals that are raised now or may become raised later.
    pub satisfiable: HandleSignals,
}
impl HandleSignalsState {
    /// Constructs the state, clamping `satisfied` to `satisfiable`.
    #[inline]
    pub fn new(satisfied: HandleSignals, satisfiable: HandleSignals) -> Self {
        Self {
            satisfied: satisfied & satisfiable,
            satisfiable,
        }
    }
    /// A state in which nothing is or ever will be raised.
    #[inline]
    pub const fn never() -> Self {
        Self {
            satisfied: HandleSignals::empty(),
            satisfiable: HandleSignals::empty(),
        }
    }
    /// Whether any of `signals` is raised.
    #[inline]
    pub fn satisfies(&self, signals: HandleSignals) -> bool { self.satisfied.intersects(signals) }
    /// Whether any of `signals` may still be raised.
    #[inline]
    pub fn can_satisfy(&self, signals: HandleSignals) -> bool {
        self.satisfiable.intersects(signals)
    }
}
