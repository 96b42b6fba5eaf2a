//! Test helpers shared across dosealarm crates.

pub mod fixtures;
pub mod sink;
pub mod store;

pub use fixtures::{at, hourly_record, one_shot_record};
pub use sink::RecordingSink;
pub use store::FlakyStore;
