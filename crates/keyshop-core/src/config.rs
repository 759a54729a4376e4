//! Storefront Configuration

use std::collections::HashMap;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::{Result, ShopError};
use crate::plan::PlanDuration;

/// Where buyers land after checkout (the chat client)
pub const DEFAULT_REDIRECT_URL: &str = "https://discord.com/channels/@me";

/// Storefront configuration
#[derive(Clone, Debug)]
pub struct ShopConfig {
    /// Inventory JSON document
    pub inventory_path: String,

    /// How long an outstanding reservation blocks the buyer from starting
    /// another purchase
    pub purchase_block_window: TimeDelta,

    /// Age after which a reservation is swept
    pub sweep_window: TimeDelta,

    /// How often the recurring sweeper runs
    pub sweep_interval: Duration,

    /// Checkout redirect on success
    pub success_url: String,

    /// Checkout redirect on cancel
    pub cancel_url: String,

    /// Gateway price reference per plan. Plans without one are not sold.
    pub price_refs: HashMap<PlanDuration, String>,
}

impl Default for ShopConfig {
    fn default() -> Self {
        Self {
            inventory_path: "licenses.json".into(),
            purchase_block_window: TimeDelta::hours(24),
            sweep_window: TimeDelta::hours(1),
            sweep_interval: Duration::from_secs(300),
            success_url: DEFAULT_REDIRECT_URL.into(),
            cancel_url: DEFAULT_REDIRECT_URL.into(),
            price_refs: HashMap::new(),
        }
    }
}

impl ShopConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let purchase_block_window = env_secs("PURCHASE_BLOCK_SECS")?
            .map_or(Ok(defaults.purchase_block_window), to_delta)?;
        let sweep_window = env_secs("SWEEP_WINDOW_SECS")?
            .map_or(Ok(defaults.sweep_window), to_delta)?;
        let sweep_interval = env_secs("SWEEP_INTERVAL_SECS")?
            .map_or(defaults.sweep_interval, Duration::from_secs);

        let price_refs = PlanDuration::ALL
            .into_iter()
            .filter_map(|d| {
                let var = format!("PRICE_{}", d.as_str().to_uppercase());
                std::env::var(var).ok().map(|price| (d, price))
            })
            .collect();

        let config = Self {
            inventory_path: std::env::var("INVENTORY_PATH").unwrap_or(defaults.inventory_path),
            purchase_block_window,
            sweep_window,
            sweep_interval,
            success_url: std::env::var("CHECKOUT_SUCCESS_URL").unwrap_or(defaults.success_url),
            cancel_url: std::env::var("CHECKOUT_CANCEL_URL").unwrap_or(defaults.cancel_url),
            price_refs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Set the price reference for a plan
    #[must_use]
    pub fn with_price(mut self, duration: PlanDuration, price_ref: impl Into<String>) -> Self {
        self.price_refs.insert(duration, price_ref.into());
        self
    }

    pub fn price_ref(&self, duration: PlanDuration) -> Option<&str> {
        self.price_refs.get(&duration).map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(ShopError::Config("sweep interval must be non-zero".into()));
        }
        if self.sweep_window <= TimeDelta::zero() || self.purchase_block_window <= TimeDelta::zero() {
            return Err(ShopError::Config("time windows must be positive".into()));
        }
        Ok(())
    }
}

fn env_secs(var: &str) -> Result<Option<u64>> {
    match std::env::var(var) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ShopError::Config(format!("{var} must be a number of seconds, got {value:?}"))),
        Err(_) => Ok(None),
    }
}

fn to_delta(secs: u64) -> Result<TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| ShopError::Config(format!("{secs} seconds is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_windows_are_independent() {
        let config = ShopConfig::default();
        assert_eq!(config.purchase_block_window, TimeDelta::hours(24));
        assert_eq!(config.sweep_window, TimeDelta::hours(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_price_refs() {
        let config = ShopConfig::default().with_price(PlanDuration::Lifetime, "price_life");
        assert_eq!(config.price_ref(PlanDuration::Lifetime), Some("price_life"));
        assert_eq!(config.price_ref(PlanDuration::OneMonth), None);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = ShopConfig {
            sweep_interval: Duration::ZERO,
            ..ShopConfig::default()
        };
        assert!(matches!(config.validate(), Err(ShopError::Config(_))));
    }

    #[test]
    fn test_seconds_conversion() {
        assert_eq!(to_delta(3600).unwrap(), TimeDelta::hours(1));
        assert!(to_delta(u64::MAX).is_err());
    }
}
