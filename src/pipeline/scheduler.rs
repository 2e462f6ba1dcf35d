//! Hourly cadence for the processing loop
//!
//! One round per top-of-hour, forever. The scheduler is the only place
//! that observes round failures; it logs them with their stage and keeps
//! going: a bad hour degrades that hour's output, never the loop.

use super::round::Pipeline;
use chrono::{DateTime, Utc};
use tokio::time::{sleep, Duration};

/// Seconds until the next top of the hour, in (0, 3600]. A call exactly
/// on the boundary waits a full hour: the current slot already ran.
pub fn secs_until_next_hour(now: DateTime<Utc>) -> u64 {
    let rem = now.timestamp().rem_euclid(3600);
    (3600 - rem) as u64
}

/// Sleep until the next top of the hour.
pub async fn wait_for_next_hour() {
    let secs = secs_until_next_hour(Utc::now());
    log::debug!("Sleeping {}s until the next round", secs);
    sleep(Duration::from_secs(secs)).await;
}

/// Run rounds forever on the hourly cadence.
pub async fn run_forever(pipeline: &mut Pipeline) {
    loop {
        let started = Utc::now();
        log::info!("Calculation started on {}", started.format("%Y-%m-%d %H:%M"));

        match pipeline.run_round().await {
            Ok(summary) => {
                log::info!(
                    "✅ Round complete: {} rows read, {} resolved, {} predictions, {} points written",
                    summary.rows_read,
                    summary.rows_resolved,
                    summary.rows_predicted,
                    summary.points_written
                );
            }
            Err(e) => {
                log::error!("❌ Error during data processing round ({}): {}", e.stage, e);
            }
        }

        log::info!(
            "Calculation ended on {}. Waiting for another round..",
            Utc::now().format("%Y-%m-%d %H:%M")
        );
        wait_for_next_hour().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_secs_until_next_hour() {
        let t = Utc.with_ymd_and_hms(2024, 6, 15, 13, 30, 0).unwrap();
        assert_eq!(secs_until_next_hour(t), 1800);

        let t = Utc.with_ymd_and_hms(2024, 6, 15, 13, 59, 59).unwrap();
        assert_eq!(secs_until_next_hour(t), 1);

        // On the boundary the wait is a full hour, not zero.
        let t = Utc.with_ymd_and_hms(2024, 6, 15, 14, 0, 0).unwrap();
        assert_eq!(secs_until_next_hour(t), 3600);
    }

    #[test]
    fn test_secs_lands_on_minute_zero() {
        for offset in [1i64, 59, 60, 1799, 3599] {
            let t = Utc.with_ymd_and_hms(2024, 6, 15, 13, 0, 0).unwrap()
                + chrono::Duration::seconds(offset);
            let target = t + chrono::Duration::seconds(secs_until_next_hour(t) as i64);
            assert_eq!(target.timestamp() % 3600, 0);
        }
    }
}
