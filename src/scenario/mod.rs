//! What a simulated user does once it is logged in.

use std::time::Duration;

use serde::Deserialize;

mod actions;
mod dispatch;

pub use self::{
    actions::{Action, ActionReport, Outcome, OrderPayload},
    dispatch::Dispatcher,
};


#[derive(Debug, Clone, confique::Config)]
#[config(validate = Self::validate)]
pub struct ScenarioConfig {
    /// Relative weights with which each action is picked. An action with
    /// weight 0 is never run. At least one weight must be non-zero.
    #[config(default = { "get_products": 2, "get_customers": 1, "create_order": 1 })]
    pub weights: Weights,

    /// Lower bound of the random pause a user takes after each action.
    #[config(default = "1s", deserialize_with = crate::config::deserialize_duration)]
    pub wait_min: Duration,

    /// Upper bound of that pause. The pause is drawn uniformly from
    /// `[wait_min, wait_max]`.
    #[config(default = "5s", deserialize_with = crate::config::deserialize_duration)]
    pub wait_max: Duration,

    #[config(nested)]
    pub order: OrderConfig,
}

impl ScenarioConfig {
    fn validate(&self) -> Result<(), String> {
        if self.wait_min > self.wait_max {
            return Err(format!(
                "`wait_min` ({:?}) must not be larger than `wait_max` ({:?})",
                self.wait_min,
                self.wait_max,
            ));
        }
        if self.weights.total() == 0 {
            return Err("at least one action weight must be non-zero".into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Weights {
    pub get_products: u32,
    pub get_customers: u32,
    pub create_order: u32,
}

impl Weights {
    pub fn of(&self, action: Action) -> u32 {
        match action {
            Action::GetProducts => self.get_products,
            Action::GetCustomers => self.get_customers,
            Action::CreateOrder => self.create_order,
        }
    }

    fn total(&self) -> u64 {
        Action::ALL.iter().map(|a| u64::from(self.of(*a))).sum()
    }
}

/// The order every `create_order` action submits.
#[derive(Debug, Clone, confique::Config)]
pub struct OrderConfig {
    #[config(default = 1)]
    pub customer_id: u64,

    #[config(default = 1)]
    pub product_id: u64,

    #[config(default = 2)]
    pub quantity: u32,
}


#[cfg(test)]
mod tests {
    use confique::Config as _;

    use super::*;

    fn config() -> ScenarioConfig {
        ScenarioConfig::builder().load().unwrap()
    }

    #[test]
    fn default_is_valid() {
        assert_eq!(config().validate(), Ok(()));
    }

    #[test]
    fn inverted_wait_range_is_rejected() {
        let mut config = config();
        config.wait_min = Duration::from_secs(6);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_weights_are_rejected() {
        let mut config = config();
        config.weights = Weights { get_products: 0, get_customers: 0, create_order: 0 };
        assert!(config.validate().is_err());

        config.weights.create_order = 1;
        assert_eq!(config.validate(), Ok(()));
    }
}
