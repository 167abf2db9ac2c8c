//! Pricing configuration for atelier.
//!
//! Generation cost, daily reward, opening grant and the deposit plan catalogue.

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Credits charged per image generation.
pub const DEFAULT_GENERATION_COST: i64 = 5;

/// Credits granted by the daily check-in.
pub const DEFAULT_DAILY_REWARD: i64 = 10;

/// Credits granted when an account is opened.
pub const DEFAULT_SIGNUP_CREDITS: i64 = 10;

/// Prices and grants applied by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Credits charged per generation. Fixed on the record at request time.
    pub generation_cost: i64,

    /// Credits granted per daily check-in.
    pub daily_reward: i64,

    /// Opening grant for new accounts.
    pub signup_credits: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            generation_cost: DEFAULT_GENERATION_COST,
            daily_reward: DEFAULT_DAILY_REWARD,
            signup_credits: DEFAULT_SIGNUP_CREDITS,
        }
    }
}

impl PricingConfig {
    /// Check that charges and rewards are positive and the opening grant is
    /// not negative.
    ///
    /// # Errors
    ///
    /// Returns the first offending setting.
    pub fn validate(&self) -> Result<(), PricingError> {
        let positive = [
            ("generation_cost", self.generation_cost),
            ("daily_reward", self.daily_reward),
        ];
        if let Some(&(setting, value)) = positive.iter().find(|(_, value)| *value <= 0) {
            return Err(PricingError::NotPositive { setting, value });
        }
        if self.signup_credits < 0 {
            return Err(PricingError::Negative {
                setting: "signup_credits",
                value: self.signup_credits,
            });
        }
        Ok(())
    }
}

/// Rejected pricing configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    /// A charge or reward is zero or negative.
    #[error("{setting} must be positive, got {value}")]
    NotPositive {
        /// Offending setting.
        setting: &'static str,
        /// Configured value.
        value: i64,
    },

    /// The opening grant is negative.
    #[error("{setting} must not be negative, got {value}")]
    Negative {
        /// Offending setting.
        setting: &'static str,
        /// Configured value.
        value: i64,
    },
}

/// Purchasable credit packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositPlan {
    /// 50 credits for ¥9.90.
    Starter,

    /// 200 credits for ¥29.90.
    Standard,

    /// 500 credits for ¥59.90.
    Premium,
}

impl DepositPlan {
    /// All plans, cheapest first.
    pub const ALL: [Self; 3] = [Self::Starter, Self::Standard, Self::Premium];

    /// Look up a plan by its identifier (`starter`, `standard`, `premium`).
    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "starter" => Some(Self::Starter),
            "standard" => Some(Self::Standard),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    /// The plan identifier.
    #[must_use]
    pub const fn id(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Standard => "standard",
            Self::Premium => "premium",
        }
    }

    /// Credits deposited by the plan.
    #[must_use]
    pub const fn credits(&self) -> i64 {
        match self {
            Self::Starter => 50,
            Self::Standard => 200,
            Self::Premium => 500,
        }
    }

    /// Price in fen (hundredths of a yuan).
    #[must_use]
    pub const fn price_fen(&self) -> i64 {
        match self {
            Self::Starter => 990,
            Self::Standard => 2990,
            Self::Premium => 5990,
        }
    }

    /// Ledger description for a purchase of this plan.
    #[must_use]
    pub fn description(&self) -> String {
        let price = self.price_fen();
        format!(
            "Purchased {} plan (¥{}.{:02})",
            self.id(),
            price / 100,
            price % 100
        )
    }
}
