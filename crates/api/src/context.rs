use stockledger_core::UserId;

/// Acting user for a request, taken from the `x-user-id` header.
///
/// Authentication happens upstream; this only carries the identity that
/// movements and batches are attributed to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActorContext {
    user_id: UserId,
}

impl ActorContext {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}
