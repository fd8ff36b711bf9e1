use std::fs;
use std::path::PathBuf;

use isinit::is::config::MasterConfig;
use isinit::is::supervisor::Supervisor;
use isinit::is::table::Supervised;

fn setup(tab: &str) -> (tempfile::TempDir, PathBuf, Supervisor) {
    let dir = tempfile::tempdir().unwrap();
    let inittab = dir.path().join("isinittab");
    fs::write(&inittab, tab).unwrap();
    let sup = Supervisor::new(MasterConfig {
        inittab: inittab.clone(),
        sock: dir.path().join("init.s"),
    });
    (dir, inittab, sup)
}

fn running_pid(sup: &Supervisor, tag: &str) -> nix::unistd::Pid {
    match sup.table().get(tag) {
        Some(Supervised::Running(pid)) => pid,
        other => panic!("expected {tag} running, got {other:?}"),
    }
}

#[test]
fn directive_starts_the_matching_group_and_level() {
    let (_dir, _tab, mut sup) = setup(
        "web:w1:run:respawn:sleep 30\n\
         web:w2:run,runmore:respawn:sleep 30\n",
    );
    sup.tell(Some("web"), Some("run")).unwrap();
    assert_eq!(sup.table().len(), 2);
    running_pid(&sup, "w1");
    running_pid(&sup, "w2");
    sup.stop_all();
    assert!(sup.table().is_empty());
}

#[test]
fn retargeting_stops_only_tags_outside_the_new_level() {
    let (_dir, _tab, mut sup) = setup(
        "web:w1:run:respawn:sleep 30\n\
         web:w2:run,runmore:respawn:sleep 30\n",
    );
    sup.tell(Some("web"), Some("run")).unwrap();
    let w2_before = running_pid(&sup, "w2");

    sup.tell(Some("web"), Some("runmore")).unwrap();
    assert!(!sup.table().contains("w1"));
    // w2 keeps its pid: already-present tags are not restarted.
    assert_eq!(running_pid(&sup, "w2"), w2_before);
    sup.stop_all();
}

#[test]
fn other_groups_are_untouched() {
    let (_dir, _tab, mut sup) = setup(
        "web:w1:run:respawn:sleep 30\n\
         mail:m1:run:respawn:sleep 30\n",
    );
    sup.tell(Some("web"), Some("run")).unwrap();
    let w1 = running_pid(&sup, "w1");
    assert!(!sup.table().contains("m1"));

    sup.tell(Some("mail"), Some("run")).unwrap();
    running_pid(&sup, "m1");
    assert_eq!(running_pid(&sup, "w1"), w1);
    sup.stop_all();
}

#[test]
fn off_tags_never_enter_the_table() {
    let (_dir, _tab, mut sup) = setup(
        "web:w1:run:respawn:sleep 30\n\
         web:w2:run:off:sleep 30\n",
    );
    sup.tell(Some("web"), Some("run")).unwrap();
    assert!(sup.table().contains("w1"));
    assert!(!sup.table().contains("w2"));
    sup.stop_all();
}

#[test]
fn reconciling_the_same_target_twice_is_idempotent() {
    let (_dir, _tab, mut sup) = setup("web:w1:run:respawn:sleep 30\n");
    sup.tell(Some("web"), Some("run")).unwrap();
    let pid = running_pid(&sup, "w1");
    sup.tell(Some("web"), Some("run")).unwrap();
    assert_eq!(sup.table().len(), 1);
    assert_eq!(running_pid(&sup, "w1"), pid);
    sup.stop_all();
}

#[test]
fn tags_removed_from_the_file_are_purged() {
    let (_dir, inittab, mut sup) = setup(
        "web:w1:run:respawn:sleep 30\n\
         web:w2:run:respawn:sleep 30\n",
    );
    sup.tell(Some("web"), Some("run")).unwrap();
    assert_eq!(sup.table().len(), 2);

    fs::write(&inittab, "web:w1:run:respawn:sleep 30\n").unwrap();
    sup.reconcile_current().unwrap();
    assert!(sup.table().contains("w1"));
    assert!(!sup.table().contains("w2"));
    sup.stop_all();
}

#[test]
fn config_unavailable_leaves_the_table_untouched() {
    let (_dir, inittab, mut sup) = setup("web:w1:run:respawn:sleep 30\n");
    sup.tell(Some("web"), Some("run")).unwrap();
    let pid = running_pid(&sup, "w1");

    fs::remove_file(&inittab).unwrap();
    let err = sup.tell(Some("web"), Some("runmore")).unwrap_err();
    assert_eq!(err.as_label(), "config_unavailable");
    assert_eq!(running_pid(&sup, "w1"), pid);
    // The failed directive did not replace the target either.
    assert_eq!(sup.target(), Some(("web", "run")));
    sup.stop_all();
}

#[test]
fn no_directive_means_nothing_starts() {
    let (_dir, _tab, mut sup) = setup("web:w1:run:respawn:sleep 30\n");
    sup.reconcile_current().unwrap();
    assert!(sup.table().is_empty());
    assert_eq!(sup.target(), None);
}
