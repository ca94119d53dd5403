use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use crate::{refund_policy::RefundPolicy, traits::SettlementPolicy};

pub const DEFAULT_SLOT_MINUTES: i64 = 30;
/// Korea Standard Time
pub const DEFAULT_UTC_OFFSET_SECS: i32 = 9 * 3600;
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);
/// The most units of a single service one booking may hold.
pub const MAX_SERVICE_QUANTITY: i64 = 20;

/// The business rules the reservation and payment flows run with. Built from configuration by the server.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub auto_confirm_on_deposit: bool,
    pub point_earn_rate_bps: i64,
    pub refund_policy: RefundPolicy,
    /// Granularity of bookable start times
    pub slot_minutes: i64,
    /// The shops' local time zone. Reservation dates and minutes are local; `starts_at` is UTC.
    pub utc_offset: FixedOffset,
    /// Upper bound on every call to the payment gateway
    pub gateway_timeout: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        let settlement = SettlementPolicy::default();
        Self {
            auto_confirm_on_deposit: settlement.auto_confirm_on_deposit,
            point_earn_rate_bps: settlement.point_earn_rate_bps,
            refund_policy: RefundPolicy::default(),
            slot_minutes: DEFAULT_SLOT_MINUTES,
            utc_offset: FixedOffset::east_opt(DEFAULT_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix()),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }
}

impl BookingPolicy {
    pub fn settlement_policy(&self) -> SettlementPolicy {
        SettlementPolicy {
            auto_confirm_on_deposit: self.auto_confirm_on_deposit,
            point_earn_rate_bps: self.point_earn_rate_bps,
        }
    }

    pub fn with_refund_policy(mut self, refund_policy: RefundPolicy) -> Self {
        self.refund_policy = refund_policy;
        self
    }

    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm_on_deposit = auto_confirm;
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }
}
