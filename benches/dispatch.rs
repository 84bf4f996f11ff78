use std::{hint::black_box, time::Duration};

use divan::Bencher;
use rand::{Rng, SeedableRng as _, distributions::{Distribution, WeightedIndex}, rngs::StdRng};


fn main() {
    divan::main();
}

/// Weights of the default scenario: products, customers, orders.
const WEIGHTS: [u32; 3] = [2, 1, 1];


mod pick_action {
    use super::*;

    #[divan::bench]
    fn weighted_index(bencher: Bencher) {
        let index = WeightedIndex::new(WEIGHTS).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        bencher.bench_local(move || index.sample(black_box(&mut rng)));
    }

    /// Draws a number below the total and walks the weights. Baseline to
    /// compare `WeightedIndex` against for our tiny number of actions.
    #[divan::bench]
    fn linear_scan(bencher: Bencher) {
        let total: u32 = WEIGHTS.iter().sum();
        let mut rng = StdRng::seed_from_u64(7);

        bencher.bench_local(move || {
            let mut x = black_box(&mut rng).gen_range(0..total);
            WEIGHTS.iter().position(|w| {
                if x < *w {
                    return true;
                }
                x -= w;
                false
            })
        });
    }
}

#[divan::bench]
fn wait_time(bencher: Bencher) {
    let (min, max) = (Duration::from_secs(1), Duration::from_secs(5));
    let mut rng = StdRng::seed_from_u64(7);

    bencher.bench_local(move || black_box(&mut rng).gen_range(min..=max));
}
