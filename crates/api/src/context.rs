use orderflow_core::OwnerId;

/// Owner on whose behalf a request runs.
///
/// Set by the owner middleware; present on every queue route.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OwnerContext {
    owner_id: OwnerId,
}

impl OwnerContext {
    pub fn new(owner_id: OwnerId) -> Self {
        Self { owner_id }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }
}
