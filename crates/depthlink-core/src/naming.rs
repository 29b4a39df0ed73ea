//! Timestamp-based names producers use to build filenames.
//!
//! ```text
//! event_name  20241208_140309
//! frame_name  20241208_140309_45_frame000042   (45 = centiseconds)
//! imu_name    imu_20241208_140309
//! ```
//!
//! The collector groups files into event folders using the first two `_`
//! fields, so these formats are part of the contract.

use chrono::{DateTime, TimeZone, Timelike};

const STAMP: &str = "%Y%m%d_%H%M%S";

/// Name for one capture session, to the second.
pub fn event_name<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format(STAMP).to_string()
}

/// Per-frame name: timestamp to the centisecond plus a zero-padded counter.
pub fn frame_name<Tz: TimeZone>(time: &DateTime<Tz>, frame_counter: u64) -> String
where
    Tz::Offset: std::fmt::Display,
{
    // Leap seconds report nanos >= 1e9; clamp so the field stays 2 digits.
    let centis = (time.nanosecond() / 10_000_000).min(99);
    format!(
        "{}_{:02}_frame{:06}",
        time.format(STAMP),
        centis,
        frame_counter
    )
}

/// Filename stem for an IMU stream started at `time`.
pub fn imu_name<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("imu_{}", event_name(time))
}
