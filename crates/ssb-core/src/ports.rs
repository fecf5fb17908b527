use async_trait::async_trait;

use crate::{domain::UserId, Result};

/// Result of a channel-membership query.
///
/// `Unknown` means the platform could not be asked (transport failure or
/// timeout). Callers must treat it as "cannot grant", never as `Subscribed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipStatus {
    Subscribed,
    NotSubscribed,
    Unknown,
}

/// Port for the channel-subscription check.
///
/// Implementations classify, they do not fail: any error on their side maps
/// to `MembershipStatus::Unknown`.
#[async_trait]
pub trait MembershipPort: Send + Sync {
    async fn check_membership(&self, user_id: UserId) -> MembershipStatus;
}

/// Port for the external completion service.
///
/// The token budget is chosen by the caller per role; the client itself is
/// budget-agnostic. Failures (non-2xx, malformed body, timeout) surface as
/// `Error::Upstream` and carry no partial answer.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn ask(&self, question: &str, max_tokens: u32) -> Result<String>;
}
