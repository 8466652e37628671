//! Runtime invariants of the acquisition session
//!
//! The state machine asserts these after every event it handles. Each check
//! is recorded in a thread-local log so tests can prove that a scenario
//! actually exercised the invariants they care about.
//!
//! ```rust,ignore
//! use livecam::invariants::{contract_test, Invariant};
//!
//! // drive a SessionMachine through a scenario, then:
//! contract_test("fallback late success", &[Invariant::SingleFlight, Invariant::StaleTimerInert]);
//! ```

use std::cell::RefCell;
use std::collections::HashSet;

/// A property that must hold in every reachable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invariant {
    /// At most one acquisition call is outstanding, and only for the current generation
    SingleFlight,
    /// A stream handle is held only in Active or BlankSuspect
    StreamOwnership,
    /// An error is present exactly when the state is Error
    ErrorOnlyInError,
    /// The startup watchdog is armed only while an acquisition is outstanding
    StartupTimerScope,
    /// The blank watchdog is armed only while a live stream awaits its first frame
    BlankTimerScope,
    /// A timer that no longer matches the armed token never causes a transition
    StaleTimerInert,
    /// The blank-preview restart happens at most once per acquisition attempt
    RestartBound,
}

impl Invariant {
    pub fn describe(&self) -> &'static str {
        match self {
            Invariant::SingleFlight => "at most one acquisition call is in flight",
            Invariant::StreamOwnership => "a stream is held only in Active or BlankSuspect",
            Invariant::ErrorOnlyInError => "an error is present exactly in the Error state",
            Invariant::StartupTimerScope => "startup watchdog armed only while acquiring",
            Invariant::BlankTimerScope => "blank watchdog armed only while awaiting a first frame",
            Invariant::StaleTimerInert => "stale timers never transition",
            Invariant::RestartBound => "blank-preview restart at most once per attempt",
        }
    }
}

thread_local! {
    static CHECKED: RefCell<HashSet<Invariant>> = RefCell::new(HashSet::new());
}

/// Assert an invariant and record that it was checked.
///
/// # Panics
/// Panics if the condition is false.
#[macro_export]
macro_rules! assert_invariant {
    ($invariant:expr, $condition:expr) => {
        $crate::invariants::__check($invariant, $condition, module_path!())
    };
}

#[doc(hidden)]
pub fn __check(invariant: Invariant, condition: bool, context: &str) {
    CHECKED.with(|log| {
        log.borrow_mut().insert(invariant);
    });

    if !condition {
        panic!(
            "INVARIANT VIOLATION [{}]: {}",
            context,
            invariant.describe()
        );
    }
}

/// Require that every listed invariant was checked on this thread.
///
/// # Panics
/// Panics naming the invariants that were never checked.
pub fn contract_test(test_name: &str, required: &[Invariant]) {
    let missing: Vec<&'static str> = CHECKED.with(|log| {
        let log = log.borrow();
        required
            .iter()
            .filter(|inv| !log.contains(*inv))
            .map(|inv| inv.describe())
            .collect()
    });

    if !missing.is_empty() {
        panic!(
            "CONTRACT FAILURE [{}]: never checked:\n  - {}",
            test_name,
            missing.join("\n  - ")
        );
    }
}

/// Forget all recorded checks on this thread
pub fn clear_invariant_log() {
    CHECKED.with(|log| log.borrow_mut().clear());
}
