//! Named extension points around each phase of the poll loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// The eight points at which external code may observe or abort a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    PrePollMessages,
    PostPollMessages,
    PreDispatchMessages,
    PostDispatchMessages,
    PreHandleTransactions,
    PostHandleTransactions,
    PrePollResponses,
    PostPollResponses,
}

impl HookPoint {
    pub const ALL: [HookPoint; 8] = [
        HookPoint::PrePollMessages,
        HookPoint::PostPollMessages,
        HookPoint::PreDispatchMessages,
        HookPoint::PostDispatchMessages,
        HookPoint::PreHandleTransactions,
        HookPoint::PostHandleTransactions,
        HookPoint::PrePollResponses,
        HookPoint::PostPollResponses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrePollMessages => "pre_poll_messages",
            Self::PostPollMessages => "post_poll_messages",
            Self::PreDispatchMessages => "pre_dispatch_messages",
            Self::PostDispatchMessages => "post_dispatch_messages",
            Self::PreHandleTransactions => "pre_handle_transactions",
            Self::PostHandleTransactions => "post_handle_transactions",
            Self::PrePollResponses => "pre_poll_responses",
            Self::PostPollResponses => "post_poll_responses",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hook callable. Returning `false` aborts the current cycle.
pub type Hook = Arc<dyn Fn() -> bool + Send + Sync>;

/// Ordered hook callables per point
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<HookPoint, Vec<Hook>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook; hooks at one point run in registration order.
    pub fn add<F>(&self, point: HookPoint, hook: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.hooks
            .write()
            .expect("hook registry lock poisoned")
            .entry(point)
            .or_default()
            .push(Arc::new(hook));
    }

    /// Removes every hook registered at `point`.
    pub fn clear(&self, point: HookPoint) {
        self.hooks
            .write()
            .expect("hook registry lock poisoned")
            .remove(&point);
    }

    pub fn len(&self, point: HookPoint) -> usize {
        self.hooks
            .read()
            .expect("hook registry lock poisoned")
            .get(&point)
            .map_or(0, Vec::len)
    }

    /// Runs the hooks at `point`, stopping at the first one that returns
    /// `false`. A point with no hooks returns `true`.
    pub fn run(&self, point: HookPoint) -> bool {
        // Snapshot so hooks may register further hooks without deadlocking.
        let hooks: Vec<Hook> = match self
            .hooks
            .read()
            .expect("hook registry lock poisoned")
            .get(&point)
        {
            Some(hooks) => hooks.clone(),
            None => return true,
        };

        hooks.iter().all(|hook| hook())
    }
}
