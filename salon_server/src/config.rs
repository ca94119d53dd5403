use std::{env, fmt::Display, net::IpAddr, str::FromStr, time::Duration as StdDuration};

use chrono::{Duration, FixedOffset};
use log::*;
use salon_common::{
    helpers::{parse_boolean_flag, parse_comma_list},
    Points,
    Secret,
};
use salon_engine::{
    refund_policy::{FeeTiers, RefundPolicy},
    BookingPolicy,
};
use salon_gateway::GatewayConfig;

const DEFAULT_SALON_HOST: &str = "127.0.0.1";
const DEFAULT_SALON_PORT: u16 = 8480;
const DEFAULT_FULL_REFUND_HOURS: i64 = 24;
const DEFAULT_LATE_CANCEL_FEE_TIERS: &str = "3:2000,0:5000";
const DEFAULT_RECONCILE_INTERVAL: StdDuration = StdDuration::from_secs(60);
const DEFAULT_RECONCILE_AFTER_MINS: i64 = 10;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    /// The business rules handed to the reservation and payment flows.
    pub booking: BookingPolicy,
    /// How often the reconciliation worker wakes up.
    pub reconcile_interval: StdDuration,
    /// Pending payments and refunds younger than this are left alone by the reconciliation worker.
    pub reconcile_after: Duration,
    pub webhook: WebhookConfig,
    pub identity: IdentityConfig,
    pub gateway: GatewayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SALON_HOST.to_string(),
            port: DEFAULT_SALON_PORT,
            database_url: String::default(),
            use_x_forwarded_for: false,
            use_forwarded: false,
            booking: BookingPolicy::default(),
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            reconcile_after: Duration::minutes(DEFAULT_RECONCILE_AFTER_MINS),
            webhook: WebhookConfig::default(),
            identity: IdentityConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("SALON_HOST").ok().unwrap_or_else(|| DEFAULT_SALON_HOST.into());
        let port = parse_env("SALON_PORT", DEFAULT_SALON_PORT);
        let database_url = env::var("SALON_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ SALON_DATABASE_URL is not set. Please set it to the URL for the salon database.");
            String::default()
        });
        let use_x_forwarded_for = env_flag("SALON_USE_X_FORWARDED_FOR", false);
        let use_forwarded = env_flag("SALON_USE_FORWARDED", false);
        let booking = booking_policy_from_env();
        let reconcile_interval = reconcile_interval_from_env();
        let reconcile_after = Duration::minutes(parse_env("SALON_RECONCILE_AFTER_MINS", DEFAULT_RECONCILE_AFTER_MINS));
        let webhook = WebhookConfig::from_env_or_defaults();
        let identity = IdentityConfig::from_env_or_defaults();
        let gateway = GatewayConfig::new_from_env_or_default().with_request_timeout(booking.gateway_timeout);
        Self {
            host,
            port,
            database_url,
            use_x_forwarded_for,
            use_forwarded,
            booking,
            reconcile_interval,
            reconcile_after,
            webhook,
            identity,
            gateway,
        }
    }
}

/// The reconciliation timer cannot run with a zero period, so zero falls back to the default.
fn reconcile_interval_from_env() -> StdDuration {
    match parse_env("SALON_RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL.as_secs()) {
        0 => {
            warn!(
                "🪛️ SALON_RECONCILE_INTERVAL_SECS must be at least 1. Using the default, {}s, instead.",
                DEFAULT_RECONCILE_INTERVAL.as_secs()
            );
            DEFAULT_RECONCILE_INTERVAL
        },
        secs => StdDuration::from_secs(secs),
    }
}

fn booking_policy_from_env() -> BookingPolicy {
    let defaults = BookingPolicy::default();
    let full_refund_hours = parse_env("SALON_FULL_REFUND_HOURS", DEFAULT_FULL_REFUND_HOURS);
    let tiers = env::var("SALON_LATE_CANCEL_FEE_TIERS")
        .ok()
        .and_then(|s| {
            s.parse::<FeeTiers>()
                .map_err(|e| {
                    warn!("🪛️ Invalid SALON_LATE_CANCEL_FEE_TIERS. {e}. Using {DEFAULT_LATE_CANCEL_FEE_TIERS} instead.")
                })
                .ok()
        })
        .or_else(|| DEFAULT_LATE_CANCEL_FEE_TIERS.parse::<FeeTiers>().ok())
        .map(|t| t.0)
        .unwrap_or_default();
    let compensation = parse_env("SALON_SHOP_COMPENSATION_POINTS", 0i64);
    let refund_policy = RefundPolicy::new(Duration::hours(full_refund_hours), tiers)
        .with_shop_compensation(Points::from(compensation));
    info!("🪛️ Refund policy: {refund_policy}");
    let offset_minutes = parse_env("SALON_UTC_OFFSET_MINUTES", defaults.utc_offset.local_minus_utc() / 60);
    let utc_offset = FixedOffset::east_opt(offset_minutes * 60).unwrap_or_else(|| {
        warn!("🪛️ {offset_minutes} minutes is not a valid UTC offset. Using {} instead.", defaults.utc_offset);
        defaults.utc_offset
    });
    let slot_minutes = parse_env("SALON_SLOT_MINUTES", defaults.slot_minutes);
    let gateway_timeout =
        StdDuration::from_secs(parse_env("SALON_GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout.as_secs()));
    BookingPolicy {
        auto_confirm_on_deposit: env_flag("SALON_AUTO_CONFIRM_ON_DEPOSIT", defaults.auto_confirm_on_deposit),
        point_earn_rate_bps: parse_env("SALON_POINT_EARN_RATE_BPS", defaults.point_earn_rate_bps),
        refund_policy,
        slot_minutes,
        utc_offset,
        gateway_timeout,
    }
}

/// Reads `name` from the environment, falling back to `default` when it is missing or malformed.
fn parse_env<T>(name: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(s) => s.trim().parse::<T>().unwrap_or_else(|e| {
            warn!("🪛️ {s} is not a valid value for {name}. {e} Using the default, {default}, instead.");
            default
        }),
        Err(_) => {
            debug!("🪛️ {name} is not set. Using the default value of {default}.");
            default
        },
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    parse_boolean_flag(env::var(name).ok(), default)
}

//-------------------------------------------------  WebhookConfig  ----------------------------------------------------
#[derive(Clone, Debug, Default)]
pub struct WebhookConfig {
    /// The shared secret the gateway signs webhook bodies with.
    pub hmac_secret: Secret<String>,
    /// If false, webhook signatures are not checked. **DANGER**
    pub hmac_checks: bool,
    /// If supplied, requests against /webhooks endpoints will be checked against a whitelist of gateway IP addresses.
    /// To explicitly disable the whitelist, set this to "false", "none", or "0".
    pub whitelist: Option<Vec<IpAddr>>,
}

impl WebhookConfig {
    pub fn from_env_or_defaults() -> Self {
        let hmac_secret = env::var("SALON_WEBHOOK_HMAC_SECRET").ok().unwrap_or_else(|| {
            error!("🪛️ SALON_WEBHOOK_HMAC_SECRET is not set. Gateway notifications will not be accepted.");
            String::default()
        });
        let hmac_checks = env_flag("SALON_WEBHOOK_HMAC_CHECKS", true);
        if !hmac_checks {
            warn!("🚨️ Webhook HMAC checks are disabled. Anyone can settle payments. Never do this in production.");
        }
        let whitelist = env::var("SALON_WEBHOOK_IP_WHITELIST").ok().and_then(|s| parse_whitelist(&s));
        match &whitelist {
            Some(whitelist) if whitelist.is_empty() => {
                warn!(
                    "🚨️ The webhook IP whitelist was configured, but is empty. The server will run, but won't accept \
                     any gateway notifications."
                );
            },
            None => {
                info!("🪛️ No webhook IP whitelist is set. Only HMAC validation will be used.");
            },
            Some(v) => {
                let addrs = v.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ");
                info!("🪛️ Webhook IP whitelist: {addrs}");
            },
        }
        Self { hmac_secret: Secret::new(hmac_secret), hmac_checks, whitelist }
    }
}

fn parse_whitelist(s: &str) -> Option<Vec<IpAddr>> {
    if ["none", "false", "0"].contains(&s.to_lowercase().as_str()) {
        info!(
            "🪛️ Webhook IP whitelist is disabled. If this is not what you want, set SALON_WEBHOOK_IP_WHITELIST to a \
             comma-separated list of IP addresses to enable it."
        );
        return None;
    }
    let ip_addrs = parse_comma_list(s)
        .into_iter()
        .filter_map(|s| {
            s.parse()
                .map_err(|e| warn!("🪛️ Ignoring invalid IP address ({s}) in SALON_WEBHOOK_IP_WHITELIST: {e}"))
                .ok()
        })
        .collect::<Vec<IpAddr>>();
    Some(ip_addrs)
}

//-------------------------------------------------  IdentityConfig  ---------------------------------------------------
#[derive(Clone, Debug, Default)]
pub struct IdentityConfig {
    /// Shared with the upstream authenticator, which signs the identity headers it forwards.
    pub secret: Secret<String>,
    /// If false, identity headers are trusted without a signature. **DANGER**
    pub checks: bool,
}

impl IdentityConfig {
    pub fn from_env_or_defaults() -> Self {
        let secret = env::var("SALON_IDENTITY_SECRET").ok().unwrap_or_else(|| {
            error!("🪛️ SALON_IDENTITY_SECRET is not set. No API request will be authenticated.");
            String::default()
        });
        let checks = env_flag("SALON_IDENTITY_CHECKS", true);
        if !checks {
            warn!("🚨️ Identity signature checks are disabled. Never do this in production.");
        }
        Self { secret: Secret::new(secret), checks }
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that is used to configure the server's behaviour. Generally we try to keep this
/// as small as possible, and exclude secrets to avoid passing sensitive information around the system.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
    pub reconcile_after: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            use_x_forwarded_for: config.use_x_forwarded_for,
            use_forwarded: config.use_forwarded,
            reconcile_after: config.reconcile_after,
        }
    }
}
