use std::time::Duration;

use rand::{Rng, distributions::{Distribution, WeightedIndex}};

use super::{Action, ScenarioConfig};


/// Picks the next action of a user and how long to pause after it.
///
/// Each pick is independent of all previous ones. Over many picks, each
/// action's share approaches its weight divided by the sum of all weights.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    actions: Vec<Action>,
    index: WeightedIndex<u64>,
    wait_min: Duration,
    wait_max: Duration,
}

impl Dispatcher {
    /// Panics if all weights are zero or `wait_min > wait_max`; the config
    /// validation rules both out.
    pub fn new(config: &ScenarioConfig) -> Self {
        let actions: Vec<_> = Action::ALL.into_iter()
            .filter(|a| config.weights.of(*a) > 0)
            .collect();
        let index = WeightedIndex::new(actions.iter().map(|a| u64::from(config.weights.of(*a))))
            .expect("at least one action weight must be non-zero");
        assert!(config.wait_min <= config.wait_max, "wait_min > wait_max");

        Self {
            actions,
            index,
            wait_min: config.wait_min,
            wait_max: config.wait_max,
        }
    }

    pub fn next_action<R: Rng>(&self, rng: &mut R) -> Action {
        self.actions[self.index.sample(rng)]
    }

    /// Uniformly random duration in `[wait_min, wait_max]`.
    pub fn wait_time<R: Rng>(&self, rng: &mut R) -> Duration {
        if self.wait_min == self.wait_max {
            return self.wait_min;
        }
        rng.gen_range(self.wait_min..=self.wait_max)
    }
}
