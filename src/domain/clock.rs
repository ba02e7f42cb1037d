use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Wall-clock source. Timers use tokio time; this only answers "what time is
/// it" for reset prediction and timestamps.
pub trait Clock: Send + Sync {
    /// Local wall-clock time, used for the midnight reset
    fn local_now(&self) -> NaiveDateTime;

    fn utc_now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
