//! Integration test for the pagerd self-test.

mod common;

use pagerd::selftest::{self, MOTD_PATH};

#[test]
fn test_selftest_passes() {
    let shutdown = selftest::run(common::config()).unwrap();
    assert!(shutdown.integrity.is_ok());
    assert_eq!(shutdown.stats.tasks, 0);
    assert!(shutdown.served > 10);

    let vnum = shutdown.vfs.lookup(MOTD_PATH).unwrap();
    assert!(shutdown.vfs.file(vnum).unwrap().starts_with(b"WELCOME"));
    let stats = shutdown.vfs.stats();
    assert_eq!((stats.forks, stats.exits, stats.closes), (1, 2, 1));
}
