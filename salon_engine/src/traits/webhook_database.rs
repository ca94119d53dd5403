use crate::{
    db_types::{WebhookEvent, WebhookRecord},
    traits::{
        data_objects::{SettlementPolicy, WebhookGateResult},
        StorageError,
    },
};

/// Exactly-once application of gateway payment notifications.
#[allow(async_fn_in_trait)]
pub trait WebhookDatabase: Clone {
    /// Records the event and applies it, all in one transaction.
    ///
    /// * An event id that was already applied is a no-op ([`WebhookGateResult::AlreadyApplied`]).
    /// * An event id that was previously rejected is evaluated again, since a rejection has no effect.
    /// * Events that cannot be matched to a payment, or whose amount disagrees with the recorded amount, are
    ///   rejected and kept for review.
    async fn process_webhook(
        &self,
        event: WebhookEvent,
        policy: SettlementPolicy,
    ) -> Result<WebhookGateResult, StorageError>;

    async fn fetch_webhook(&self, event_id: &str) -> Result<Option<WebhookRecord>, StorageError>;
}
