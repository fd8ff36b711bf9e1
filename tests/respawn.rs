use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use isinit::is::config::MasterConfig;
use isinit::is::supervisor::Supervisor;

// A respawn command that exits immediately is restarted until the throttle
// trips, at which point the tag leaves the table for the cool-down. Well
// under the 10s window this must settle after at most 5 starts.
#[test]
fn fast_exiting_respawn_tag_is_throttled() {
    let dir = tempfile::tempdir().unwrap();
    let inittab = dir.path().join("isinittab");
    fs::write(&inittab, "batch:b1:run:respawn:/bin/true\n").unwrap();
    let mut sup = Supervisor::new(MasterConfig {
        inittab,
        sock: dir.path().join("init.s"),
    });

    sup.tell(Some("batch"), Some("run")).unwrap();

    let t0 = Instant::now();
    loop {
        sup.reap_cycle();
        if !sup.table().contains("b1") {
            break;
        }
        assert!(
            t0.elapsed() < Duration::from_secs(15),
            "respawn tag was never throttled"
        );
        thread::sleep(Duration::from_millis(50));
    }

    // Still deferred: further drains within the cool-down do not relaunch.
    sup.reap_cycle();
    thread::sleep(Duration::from_millis(100));
    sup.reap_cycle();
    assert!(!sup.table().contains("b1"));
}
