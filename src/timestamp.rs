use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock instant as fractional seconds since the Unix epoch.
///
/// Transfer orders, beacons, and buffered transactions all carry this on the
/// wire, so it serializes as a plain JSON number. Sub-second resolution
/// matters for lock expiry and neighbor staleness checks.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// The current wall-clock time.
    pub fn now() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Timestamp(seconds)
    }

    pub fn seconds(&self) -> f64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self`. Negative when `earlier`
    /// is in the future relative to `self`.
    pub fn elapsed_since(&self, earlier: Timestamp) -> f64 {
        self.0 - earlier.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

impl Add<f64> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: f64) -> Self::Output {
        Timestamp(self.0 + rhs)
    }
}

impl Sub for Timestamp {
    type Output = f64;

    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.0 - rhs.0
    }
}
