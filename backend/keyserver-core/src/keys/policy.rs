use crate::keys::{KeyStateInfo, KeyStatus};

use std::time::{Duration, SystemTime};

/// Decides when a published key should be hidden without operator action.
///
/// Policies only ever hide keys; un-hiding stays a manual operation.
pub trait VisibilityPolicy: Send + Sync {
    fn should_hide(&self, info: &KeyStateInfo, now: SystemTime) -> bool;
}

/// Keys stay visible until hidden by hand.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverHide;

impl VisibilityPolicy for NeverHide {
    fn should_hide(&self, _info: &KeyStateInfo, _now: SystemTime) -> bool {
        false
    }
}

/// Hide published keys that have not been served for `idle`.
///
/// A key that was never served counts as idle from its registration.
#[derive(Debug, Clone, Copy)]
pub struct IdleHidePolicy {
    idle: Duration,
}

impl IdleHidePolicy {
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }

    pub fn idle(&self) -> Duration {
        self.idle
    }
}

impl VisibilityPolicy for IdleHidePolicy {
    fn should_hide(&self, info: &KeyStateInfo, now: SystemTime) -> bool {
        if info.status != KeyStatus::Published {
            return false;
        }

        let last_activity = info.last_served.unwrap_or(info.last_registered);
        match now.duration_since(last_activity) {
            Ok(elapsed) => elapsed >= self.idle,
            // Activity recorded after `now`: not idle.
            Err(_) => false,
        }
    }
}
