//! Plan Catalog
//!
//! Subscription durations on sale and their display pricing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Subscription length a license key is valid for
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlanDuration {
    #[serde(rename = "1_month")]
    OneMonth,
    #[serde(rename = "3_month")]
    ThreeMonth,
    #[serde(rename = "6_month")]
    SixMonth,
    #[serde(rename = "12_month")]
    TwelveMonth,
    #[serde(rename = "lifetime")]
    Lifetime,
}

impl PlanDuration {
    /// Every plan, in menu order
    pub const ALL: [Self; 5] = [
        Self::OneMonth,
        Self::ThreeMonth,
        Self::SixMonth,
        Self::TwelveMonth,
        Self::Lifetime,
    ];

    /// Inventory bucket name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OneMonth => "1_month",
            Self::ThreeMonth => "3_month",
            Self::SixMonth => "6_month",
            Self::TwelveMonth => "12_month",
            Self::Lifetime => "lifetime",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == s)
    }

    /// Get display pricing for this plan
    pub fn pricing(&self) -> PlanPricing {
        let (label, price_eur) = match self {
            Self::OneMonth => ("1 Month", dec!(2)),
            Self::ThreeMonth => ("3 Months", dec!(5)),
            Self::SixMonth => ("6 Months", dec!(10)),
            Self::TwelveMonth => ("12 Months", dec!(15)),
            Self::Lifetime => ("Lifetime", dec!(20)),
        };
        PlanPricing {
            label: label.to_string(),
            price_eur,
        }
    }
}

impl std::fmt::Display for PlanDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanDuration {
    type Err = crate::ShopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::ShopError::Config(format!("unknown plan duration: {s}")))
    }
}

/// Display pricing. The amount actually charged is owned by the gateway's
/// price object; this is what the menu shows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPricing {
    pub label: String,
    pub price_eur: Decimal,
}

impl PlanPricing {
    /// Menu label, e.g. `3 Months - €5`
    pub fn menu_label(&self) -> String {
        format!("{} - €{}", self.label, self.price_eur)
    }
}

/// A purchasable plan as shown to buyers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Offer {
    pub duration: PlanDuration,
    pub label: String,
    pub price_eur: Decimal,
    /// Keys currently available; display only
    pub available: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_wire_names() {
        for duration in PlanDuration::ALL {
            assert_eq!(PlanDuration::parse(duration.as_str()), Some(duration));
            let json = serde_json::to_string(&duration).unwrap();
            assert_eq!(json, format!("\"{}\"", duration.as_str()));
        }
        assert_eq!(PlanDuration::parse("2_month"), None);
    }

    #[test]
    fn test_menu_label() {
        assert_eq!(PlanDuration::ThreeMonth.pricing().menu_label(), "3 Months - €5");
        assert_eq!(PlanDuration::Lifetime.pricing().price_eur, dec!(20));
    }
}
