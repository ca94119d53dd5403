use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{WebhookEvent, WebhookRecord},
    events::{EventProducers, RefundIssuedEvent},
    salon_api::{errors::ReservationError, payment_flow_api::publish_settlement},
    traits::{SettlementPolicy, WebhookDatabase, WebhookGateResult},
};

/// Entry point for payment notifications pushed by the gateway. Signatures must already have been verified.
///
/// Each event id takes effect at most once, however often it is delivered. Events that arrive after the synchronous
/// confirmation already settled the payment are reported as [`WebhookGateResult::AlreadyApplied`].
pub struct WebhookApi<B> {
    db: B,
    policy: SettlementPolicy,
    producers: EventProducers,
}

impl<B> Debug for WebhookApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi")
    }
}

impl<B> WebhookApi<B>
where B: WebhookDatabase
{
    pub fn new(db: B, policy: SettlementPolicy, producers: EventProducers) -> Self {
        Self { db, policy, producers }
    }

    pub async fn handle_event(&self, event: WebhookEvent) -> Result<WebhookGateResult, ReservationError> {
        let event_id = event.event_id.clone();
        trace!("🪝️ Processing webhook {event_id} ({})", event.status);
        let result = self.db.process_webhook(event, self.policy).await?;
        match &result {
            WebhookGateResult::Applied { settlement, refund, .. } => {
                if let Some(settlement) = settlement {
                    publish_settlement(&self.producers, settlement).await;
                }
                if let Some(refund) = refund {
                    self.producers.publish_refund_issued(RefundIssuedEvent::new(refund.clone())).await;
                }
                debug!("🪝️ Webhook {event_id} applied");
            },
            WebhookGateResult::AlreadyApplied(record) => {
                debug!("🪝️ Webhook {event_id} had already been applied ({} deliveries)", record.deliveries);
            },
            WebhookGateResult::Rejected(record) => {
                warn!("🪝️ Webhook {event_id} rejected: {}", record.reason.as_deref().unwrap_or("no reason given"));
            },
        }
        Ok(result)
    }

    pub async fn fetch_event(&self, event_id: &str) -> Result<Option<WebhookRecord>, ReservationError> {
        let record = self.db.fetch_webhook(event_id).await?;
        Ok(record)
    }
}
