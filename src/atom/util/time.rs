use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Converts `value` expressed in `timescale` units into seconds.
pub fn seconds(value: u64, timescale: u32) -> f64 {
    if timescale == 0 {
        return 0.0;
    }
    value as f64 / timescale as f64
}

/// Converts seconds into `timescale` units, rounding down.
pub fn scaled(seconds: f64, timescale: u32) -> u64 {
    if seconds <= 0.0 {
        return 0;
    }
    (seconds * timescale as f64) as u64
}

pub fn mp4_timestamp(duration: Duration) -> u64 {
    duration.as_secs() + 2_082_844_800
}

pub fn mp4_timestamp_now() -> u64 {
    mp4_timestamp(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}
