//! Exponential backoff with jitter (spec.md §4.3: "base 1s, factor 2,
//! cap 30s, jitter ±20%"), honoring a `retry_after` hint by taking the
//! larger of the computed delay and the hint.
//!
//! This lives in `lacquer-core` rather than `lacquer-engine` so it is
//! the one canonical backoff implementation shared by both the step
//! scheduler's retry loop and the MCP WebSocket transport's reconnect
//! loop (spec.md §4.5's 30s ping keepalive / auto-reconnect), rather
//! than two independent reimplementations of the same formula.

use std::time::Duration;

pub fn backoff_delay(
    attempt: u32,
    base: Duration,
    factor: f64,
    cap: Duration,
    jitter: f64,
    retry_after: Option<Duration>,
) -> Duration {
    let exponential = base.as_secs_f64() * factor.powi(attempt as i32);
    let capped = exponential.min(cap.as_secs_f64());

    let jitter_span = capped * jitter;
    let jittered = rand::Rng::gen_range(
        &mut rand::thread_rng(),
        (capped - jitter_span).max(0.0)..=(capped + jitter_span),
    );

    let computed = Duration::from_secs_f64(jittered.max(0.0));
    match retry_after {
        Some(hint) => computed.max(hint),
        None => computed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_respects_cap() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        for attempt in 0..10 {
            let delay = backoff_delay(attempt, base, 2.0, cap, 0.0, None);
            assert!(delay <= cap);
        }
    }

    #[test]
    fn retry_after_hint_wins_when_larger() {
        let delay = backoff_delay(
            0,
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(30),
            0.0,
            Some(Duration::from_secs(45)),
        );
        assert_eq!(delay, Duration::from_secs(45));
    }

    #[test]
    fn jitter_stays_within_twenty_percent_band() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(30);
        for attempt in 0..5 {
            let delay = backoff_delay(attempt, base, 2.0, cap, 0.2, None);
            let nominal = (base.as_secs_f64() * 2f64.powi(attempt as i32)).min(cap.as_secs_f64());
            let lower = nominal * 0.8;
            let upper = nominal * 1.2;
            let secs = delay.as_secs_f64();
            assert!(secs >= lower - 1e-9 && secs <= upper + 1e-9);
        }
    }
}
