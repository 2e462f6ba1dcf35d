//! Round orchestration and the hourly cadence loop

pub mod round;
pub mod scheduler;

pub use round::{Pipeline, RoundError, RoundStage, RoundSummary};
pub use scheduler::{run_forever, secs_until_next_hour, wait_for_next_hour};
