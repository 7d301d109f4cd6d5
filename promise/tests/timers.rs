//! Runs in its own process: the timer pool is shared, so no other test may
//! schedule timers concurrently.

use core::time::Duration;
use std::time::Instant;
use tether_async::time;
use tether_promise::Promise;

fn settles_to_zero() -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if time::pending() == 0 {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn timeouts_leave_no_pending_timers() {
    let source = Promise::<u32>::new();
    let bounded = source.or_timeout(Duration::from_secs(60), true);
    assert_eq!(time::pending(), 1);
    source.complete(1);
    assert_eq!(bounded.get().unwrap(), 1);
    assert!(settles_to_zero());

    let source = Promise::<u32>::new();
    let fallback = source.on_timeout(0, Duration::from_secs(60), true);
    source.complete(2);
    assert_eq!(fallback.get().unwrap(), 2);
    assert!(settles_to_zero());

    let source = Promise::<u32>::new();
    let delayed = source.delay(Duration::from_secs(60), false);
    source.complete(3);
    assert!(delayed.cancel());
    assert!(settles_to_zero());
}
