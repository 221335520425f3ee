use std::time::Duration;

use rand::Rng;

use crate::config::DelayRange;

/// A delay drawn uniformly from `range`.
pub fn sample(range: DelayRange) -> Duration {
    if range.max <= range.min {
        return range.min;
    }
    let min = range.min.as_millis() as u64;
    let max = range.max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// Sleep for a delay drawn from `range`; no-op for a zero range.
pub async fn pace(range: DelayRange) {
    let delay = sample(range);
    if !delay.is_zero() {
        tracing::debug!("Pacing for {:.2}s", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_range() {
        let range = DelayRange {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(2000),
        };
        for _ in 0..100 {
            let d = sample(range);
            assert!(d >= range.min && d <= range.max);
        }
        assert_eq!(sample(DelayRange::zero()), Duration::ZERO);
    }
}
