use rand::{thread_rng, Rng};
use std::time::Duration;

/// Date format carried on published events, one value per scheduler tick.
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// Returns a random fraction of `duration`, used to spread out requests
/// within one crawl so a site is not hammered at a fixed rate.
pub fn jitter(duration: Duration) -> Duration {
    let mut rng = thread_rng();
    duration.mul_f64(rng.gen_range(0.0..1.0))
}
