//! Due-time calculation and alarm scheduling for dosealarm.
//!
//! The [`Scheduler`] decides what fires; [`AlarmService`] binds it to a record
//! store, a notification sink and a clock; [`runtime::spawn`] drives the
//! service from a background task.

pub mod calculator;
pub mod clock;
pub mod error;
pub mod event_bus;
pub mod runtime;
pub mod scheduler;
pub mod service;

pub use calculator::{cycle_acknowledged, firing_due, next_due};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::CoreError;
pub use event_bus::EventBus;
/// Background runtime and its command handle.
pub use runtime::{AlarmCommand, AlarmHandle, spawn};
pub use scheduler::{
    ActiveAlarm, Channel, Postponement, Scheduler, SchedulerPolicy, SchedulerState,
};
pub use service::{AlarmService, TEST_ALARM_ID, UpcomingDose};
