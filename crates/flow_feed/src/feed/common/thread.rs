//! Thread-local randomness for the prefetch worker.
//!
//! The worker seeds its RNG once at start-up, so crop offsets and mirror draws are
//! reproducible for a given `seed`. Outside a seeded worker (e.g. unit tests that
//! never call [`init_worker_rng`]) the draws fall back to the thread RNG.

use rand::rngs::StdRng;
use rand::Rng as _;
use rand::SeedableRng;
use std::cell::RefCell;

thread_local! {
    /// Seeded RNG owned by the current prefetch worker.
    pub static WORKER_RNG: RefCell<Option<StdRng>> = const { RefCell::new(None) };
}

/// Seeds the current thread's worker RNG.
pub fn init_worker_rng(seed: u64) {
    WORKER_RNG.with(|rng| {
        *rng.borrow_mut() = Some(StdRng::seed_from_u64(seed));
    })
}

/// Random bool with probability `p`, drawn from the worker RNG.
pub fn worker_gen_bool(p: f64) -> bool {
    WORKER_RNG.with(|rng| {
        let mut rng_ref = rng.borrow_mut();
        match rng_ref.as_mut() {
            Some(rng) => rng.random_bool(p),
            None => rand::rng().random_bool(p),
        }
    })
}

/// Uniform integer in `[low, high_exclusive)`. Returns `low` when the range is empty.
pub fn worker_gen_range(low: usize, high_exclusive: usize) -> usize {
    if high_exclusive <= low + 1 {
        return low;
    }
    WORKER_RNG.with(|rng| {
        let mut rng_ref = rng.borrow_mut();
        match rng_ref.as_mut() {
            Some(rng) => rng.random_range(low..high_exclusive),
            None => rand::rng().random_range(low..high_exclusive),
        }
    })
}
