use serde::Serialize;

use crate::error::PoolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HandleState {
    Uninitialized,
    Connecting,
    Ready,
    InUse,
    Idle,
    Destroyed,
}

impl HandleState {
    pub fn can_transition_to(self, next: HandleState) -> bool {
        use HandleState::*;

        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Uninitialized, Connecting)
            | (Connecting, Ready)
            | (Ready, InUse)
            | (Ready, Idle)
            | (Idle, InUse)
            | (InUse, Idle) => true,
            _ => false,
        }
    }
}

/// Lifecycle of one pooled handle as seen by the adapter.
#[derive(Debug, Clone)]
pub struct HandleLifecycle {
    id: u64,
    state: HandleState,
}

impl HandleLifecycle {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: HandleState::Uninitialized,
        }
    }

    /// A handle the pool has already connected.
    pub fn ready(id: u64) -> Self {
        Self {
            id,
            state: HandleState::Ready,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.state == HandleState::Destroyed
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: HandleState) -> Result<HandleState, PoolError> {
        if !self.state.can_transition_to(next) {
            return Err(PoolError::InvalidStateTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        let previous = self.state;
        self.state = next;
        Ok(previous)
    }
}
