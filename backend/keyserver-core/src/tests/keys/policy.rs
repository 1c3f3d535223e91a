use crate::keys::{IdleHidePolicy, KeyId, KeyStateInfo, KeyStatus, NeverHide, VisibilityPolicy};

use std::time::{Duration, SystemTime};

fn info(status: KeyStatus, registered_ago: Duration, served_ago: Option<Duration>) -> KeyStateInfo {
    let now = SystemTime::now();
    KeyStateInfo {
        key_id: KeyId::new_random(),
        status,
        hidden: status == KeyStatus::Hidden,
        has_seed: true,
        associated_files: 0,
        last_registered: now - registered_ago,
        last_requested: None,
        last_served: served_ago.map(|ago| now - ago),
        last_associated: None,
    }
}

#[test]
fn given_never_hide_when_asked_then_keeps_key_visible() {
    let idle_key = info(KeyStatus::Published, Duration::from_secs(86_400), None);

    assert!(!NeverHide.should_hide(&idle_key, SystemTime::now()));
}

/// **VALUE**: Verifies that the idle policy hides keys nobody used lately.
///
/// **BUG THIS CATCHES**: Would catch the policy measuring idleness from
/// registration even after the key was served, hiding keys in active use.
#[test]
fn given_idle_policy_when_key_served_recently_then_kept_and_when_idle_then_hidden() {
    // GIVEN: A 10 minute idle policy
    let policy = IdleHidePolicy::new(Duration::from_secs(600));
    let hour = Duration::from_secs(3_600);

    // WHEN: Evaluating an old key served a minute ago and one never served
    let recently_served = info(KeyStatus::Published, hour, Some(Duration::from_secs(60)));
    let never_served = info(KeyStatus::Published, hour, None);
    let now = SystemTime::now();

    // THEN: Only the idle key is hidden
    assert!(!policy.should_hide(&recently_served, now));
    assert!(policy.should_hide(&never_served, now));
}

#[test]
fn given_idle_policy_when_key_not_published_then_never_hidden() {
    // GIVEN: A short idle policy and long idle keys that are not published
    let policy = IdleHidePolicy::new(Duration::from_secs(1));
    let hour = Duration::from_secs(3_600);
    let now = SystemTime::now();

    // WHEN/THEN: Seeded, unknown and already hidden keys are left alone
    for status in [KeyStatus::Unknown, KeyStatus::Seeded, KeyStatus::Hidden] {
        assert!(
            !policy.should_hide(&info(status, hour, None), now),
            "{status} should not be hidden"
        );
    }
}
