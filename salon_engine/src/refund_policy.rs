//! # Refund policy
//!
//! Decides how much of a completed payment goes back to the customer when a reservation is cancelled. The policy is
//! a pure function of who cancelled, how long before the appointment they did so, and how much was paid. All
//! arithmetic is in integer minor units and basis points; fees round down, so refunds round in the customer's favour.
//!
//! Default schedule:
//!
//! | Cancelled by | Lead time          | Refund       |
//! |--------------|--------------------|--------------|
//! | customer     | ≥ 24 h             | 100 %        |
//! | customer     | 3 h ≤ lead < 24 h  | 80 % (20 % fee) |
//! | customer     | < 3 h              | 50 % (50 % fee) |
//! | shop         | any                | 100 % plus optional compensation points |
use std::{fmt::Display, str::FromStr};

use chrono::Duration;
use salon_common::{Money, Points, BPS_DENOMINATOR};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db_types::CancellingParty;

pub const FULL_REFUND_TIER: &str = "full_refund";
pub const SHOP_CANCELLATION_TIER: &str = "shop_cancellation";
pub const PAID_AFTER_CANCELLATION_TIER: &str = "paid_after_cancellation";

/// A late-cancellation fee that applies when the lead time is at least `min_lead` (and no earlier tier matched).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeTier {
    pub min_lead: Duration,
    pub fee_bps: i64,
}

impl FeeTier {
    pub fn new(min_lead: Duration, fee_bps: i64) -> Self {
        Self { min_lead, fee_bps: fee_bps.clamp(0, BPS_DENOMINATOR) }
    }

    pub fn name(&self) -> String {
        format!("late_cancel_{}h_{}bps", self.min_lead.num_hours(), self.fee_bps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundQuote {
    pub refund_amount: Money,
    pub fee: Money,
    pub tier: String,
}

impl RefundQuote {
    pub fn full(paid: Money, tier: &str) -> Self {
        Self { refund_amount: paid, fee: Money::zero(), tier: tier.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundPolicy {
    full_refund_lead: Duration,
    /// Sorted by `min_lead`, longest first.
    late_tiers: Vec<FeeTier>,
    shop_compensation_points: Points,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self::new(Duration::hours(24), vec![
            FeeTier::new(Duration::hours(3), 2_000),
            FeeTier::new(Duration::zero(), 5_000),
        ])
    }
}

impl RefundPolicy {
    pub fn new(full_refund_lead: Duration, mut late_tiers: Vec<FeeTier>) -> Self {
        late_tiers.sort_by(|a, b| b.min_lead.cmp(&a.min_lead));
        Self { full_refund_lead, late_tiers, shop_compensation_points: Points::zero() }
    }

    pub fn with_shop_compensation(mut self, points: Points) -> Self {
        self.shop_compensation_points = points;
        self
    }

    pub fn full_refund_lead(&self) -> Duration {
        self.full_refund_lead
    }

    pub fn late_tiers(&self) -> &[FeeTier] {
        &self.late_tiers
    }

    /// Points credited to the customer when the shop cancels. Zero disables compensation.
    pub fn shop_compensation_points(&self) -> Points {
        self.shop_compensation_points
    }

    /// Quotes the refund of a single completed payment of `paid`.
    ///
    /// `lead_time` is the time remaining until the appointment starts at the moment of cancellation.
    pub fn quote(&self, party: CancellingParty, lead_time: Duration, paid: Money) -> RefundQuote {
        match party {
            CancellingParty::Shop => RefundQuote::full(paid, SHOP_CANCELLATION_TIER),
            CancellingParty::Customer if lead_time >= self.full_refund_lead => RefundQuote::full(paid, FULL_REFUND_TIER),
            CancellingParty::Customer => {
                let tier = self.late_tiers.iter().find(|t| lead_time >= t.min_lead).or_else(|| self.late_tiers.last());
                match tier {
                    Some(tier) => {
                        let fee = paid.apply_bps(tier.fee_bps);
                        RefundQuote { refund_amount: paid - fee, fee, tier: tier.name() }
                    },
                    None => RefundQuote::full(paid, FULL_REFUND_TIER),
                }
            },
        }
    }
}

impl Display for RefundPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "full refund ≥ {}h", self.full_refund_lead.num_hours())?;
        for tier in &self.late_tiers {
            write!(f, ", ≥ {}h: {}bps fee", tier.min_lead.num_hours(), tier.fee_bps)?;
        }
        write!(f, ", shop compensation {}", self.shop_compensation_points)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid fee tier definition: {0}")]
pub struct FeeTierParseError(String);

/// A comma separated list of `hours:fee_bps` pairs, e.g. `3:2000,0:5000`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeTiers(pub Vec<FeeTier>);

impl FromStr for FeeTiers {
    type Err = FeeTierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tiers = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                let (hours, bps) = t.split_once(':').ok_or_else(|| FeeTierParseError(t.to_string()))?;
                let hours = hours.trim().parse::<i64>().map_err(|_| FeeTierParseError(t.to_string()))?;
                let bps = bps.trim().parse::<i64>().map_err(|_| FeeTierParseError(t.to_string()))?;
                if hours < 0 || !(0..=BPS_DENOMINATOR).contains(&bps) {
                    return Err(FeeTierParseError(t.to_string()));
                }
                Ok(FeeTier::new(Duration::hours(hours), bps))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(tiers))
    }
}
