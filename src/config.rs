use {
    crate::domain::referral::{ReferralPolicy, RewardMode},
    std::{env, net::SocketAddr, time::Duration},
};

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

/// Shared secrets for webhook authenticity, one per provider that signs.
/// Tonapi events carry no signature; they are correlated against the
/// ledger instead.
#[derive(Debug, Clone)]
pub struct GatewaySecrets {
    pub yookassa_secret: String,
    pub cryptobot_token: String,
    pub heleket_api_key: String,
    pub tonapi_token: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Chat-bot collaborator callback for buyer notifications.
    pub notify_url: Option<String>,
    pub gateways: GatewaySecrets,
    /// Accepted |expected - received| in minor units before an event is
    /// held for manual review.
    pub amount_tolerance_minor: i64,
    /// Unpaid orders older than this are expired by the sweep.
    pub order_expiry: Duration,
    pub max_provision_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub sweep_interval: Duration,
    pub sweep_batch: i64,
    pub referral: ReferralPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let listen_addr = env_or("LISTEN_ADDR", "0.0.0.0:3000")
            .parse()
            .expect("LISTEN_ADDR must be a socket address");

        let reward_mode = match env_or("REFERRAL_REWARD_MODE", "percent_purchase").as_str() {
            "fixed_purchase" => RewardMode::FixedPerPurchase,
            "none" => RewardMode::None,
            _ => RewardMode::PercentOfPurchase,
        };

        Self {
            listen_addr,
            notify_url: env::var("NOTIFY_URL").ok(),
            gateways: GatewaySecrets {
                yookassa_secret: env_or("YOOKASSA_WEBHOOK_SECRET", ""),
                cryptobot_token: env_or("CRYPTOBOT_TOKEN", ""),
                heleket_api_key: env_or("HELEKET_API_KEY", ""),
                tonapi_token: env_or("TONAPI_WEBHOOK_TOKEN", ""),
            },
            amount_tolerance_minor: env_i64("AMOUNT_TOLERANCE_MINOR", 0),
            order_expiry: Duration::from_secs(env_u64("ORDER_EXPIRY_SECS", 1800)),
            max_provision_attempts: env_i64("MAX_PROVISION_ATTEMPTS", 5) as i32,
            backoff_base: Duration::from_secs(env_u64("PROVISION_BACKOFF_BASE_SECS", 30)),
            backoff_cap: Duration::from_secs(env_u64("PROVISION_BACKOFF_CAP_SECS", 3600)),
            sweep_interval: Duration::from_secs(env_u64("SWEEP_INTERVAL_SECS", 60)),
            sweep_batch: env_i64("SWEEP_BATCH", 20),
            referral: ReferralPolicy {
                enabled: env_bool("REFERRAL_ENABLED", true),
                reward_mode,
                percentage: env_i64("REFERRAL_PERCENTAGE", 10) as u32,
                fixed_amount_minor: env_i64("REFERRAL_FIXED_AMOUNT_MINOR", 5_000),
                signup_bonus_minor: env_i64("REFERRAL_SIGNUP_BONUS_MINOR", 0),
                min_withdrawal_minor: env_i64("REFERRAL_MIN_WITHDRAWAL_MINOR", 0),
                referred_discount_percent: env_i64("REFERRAL_DISCOUNT_PERCENT", 0) as u32,
            },
        }
    }

    /// Delay before provisioning attempt `attempt` (0-based): doubles each
    /// time from the base, capped.
    pub fn backoff_for_attempt(&self, attempt: i32) -> Duration {
        let shift = attempt.clamp(0, 20) as u32;
        let delay = self
            .backoff_base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.backoff_cap);
        delay.min(self.backoff_cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_backoff(base_secs: u64, cap_secs: u64) -> AppConfig {
        AppConfig {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            notify_url: None,
            gateways: GatewaySecrets {
                yookassa_secret: String::new(),
                cryptobot_token: String::new(),
                heleket_api_key: String::new(),
                tonapi_token: String::new(),
            },
            amount_tolerance_minor: 0,
            order_expiry: Duration::from_secs(1800),
            max_provision_attempts: 5,
            backoff_base: Duration::from_secs(base_secs),
            backoff_cap: Duration::from_secs(cap_secs),
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 20,
            referral: ReferralPolicy::disabled(),
        }
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let cfg = config_with_backoff(30, 300);
        assert_eq!(cfg.backoff_for_attempt(0), Duration::from_secs(30));
        assert_eq!(cfg.backoff_for_attempt(1), Duration::from_secs(60));
        assert_eq!(cfg.backoff_for_attempt(2), Duration::from_secs(120));
        assert_eq!(cfg.backoff_for_attempt(3), Duration::from_secs(240));
        assert_eq!(cfg.backoff_for_attempt(4), Duration::from_secs(300));
        assert_eq!(cfg.backoff_for_attempt(19), Duration::from_secs(300));
    }
}
