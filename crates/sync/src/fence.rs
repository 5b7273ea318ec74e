//! Operation fencing.
//!
//! Each logical resource carries a counter. Starting an operation on the
//! resource advances it and hands back a [`FenceToken`]; async work holding
//! an older token finds out it was superseded by comparing against the
//! counter right before it applies anything.

use std::sync::atomic::{AtomicU64, Ordering};

/// Resources whose operations race with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FenceResource {
    /// Which project is current (open, create, restore, close, delete).
    CurrentProject,
    /// Writes of the working copy to the store.
    Sync,
}

impl FenceResource {
    const COUNT: usize = 2;

    fn index(self) -> usize {
        match self {
            Self::CurrentProject => 0,
            Self::Sync => 1,
        }
    }
}

/// Proof that an operation was the latest one on its resource when it began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceToken {
    resource: FenceResource,
    value: u64,
}

impl FenceToken {
    pub fn resource(&self) -> FenceResource {
        self.resource
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

/// One monotonically advancing counter per [`FenceResource`].
#[derive(Debug, Default)]
pub struct OperationFences {
    counters: [AtomicU64; FenceResource::COUNT],
}

impl OperationFences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new operation, invalidating every token issued before.
    pub fn begin(&self, resource: FenceResource) -> FenceToken {
        let value = self.counters[resource.index()].fetch_add(1, Ordering::AcqRel) + 1;
        FenceToken { resource, value }
    }

    /// Token of the operation currently owning `resource`, for work that
    /// belongs to it without replacing it.
    pub fn current(&self, resource: FenceResource) -> FenceToken {
        FenceToken {
            resource,
            value: self.counters[resource.index()].load(Ordering::Acquire),
        }
    }

    pub fn is_current(&self, token: &FenceToken) -> bool {
        self.counters[token.resource.index()].load(Ordering::Acquire) == token.value
    }

    /// Invalidate all outstanding tokens without starting anything.
    pub fn supersede(&self, resource: FenceResource) {
        self.counters[resource.index()].fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_operation_supersedes_older() {
        let fences = OperationFences::new();
        let a = fences.begin(FenceResource::CurrentProject);
        assert!(fences.is_current(&a));

        let b = fences.begin(FenceResource::CurrentProject);
        assert!(!fences.is_current(&a));
        assert!(fences.is_current(&b));
        assert!(b.value() > a.value());
    }

    #[test]
    fn resources_are_independent() {
        let fences = OperationFences::new();
        let project = fences.begin(FenceResource::CurrentProject);
        let sync = fences.begin(FenceResource::Sync);

        fences.supersede(FenceResource::Sync);
        assert!(!fences.is_current(&sync));
        assert!(fences.is_current(&project));
    }

    #[test]
    fn current_token_joins_without_superseding() {
        let fences = OperationFences::new();
        let owner = fences.begin(FenceResource::CurrentProject);
        let joined = fences.current(FenceResource::CurrentProject);
        assert_eq!(owner, joined);
        assert!(fences.is_current(&owner));

        fences.supersede(FenceResource::CurrentProject);
        assert!(!fences.is_current(&joined));
    }
}
