use super::*;
use crate::fault::FaultInfo;

#[test]
fn test_exit_returns_every_frame() {
    let mut env = env(32);
    let baseline = env.mm.phys().stats();

    let anon = env.map_anon(TASK, 4, rw_private());
    for page in 0..4 {
        env.mm.write_task_memory(TASK, anon + page * PAGE_SIZE, &[1]).unwrap();
    }
    let file = env.open_store_file(9, patterned(3));
    let fvaddr = env.map_file(TASK, file, 3, rw_private());
    env.read_byte(TASK, fvaddr);
    env.mm.write_task_memory(TASK, fvaddr + PAGE_SIZE, &[2]).unwrap();

    env.mm.fork(TASK, CHILD).unwrap();
    env.mm.write_task_memory(CHILD, anon, &[3]).unwrap();
    env.mm.write_task_memory(CHILD, fvaddr + 2 * PAGE_SIZE, &[4]).unwrap();
    env.mm.write_task_memory(TASK, anon + PAGE_SIZE, &[5]).unwrap();
    env.assert_consistent();

    env.mm.exit(TASK).unwrap();
    env.assert_consistent();
    assert_eq!(env.read_byte(CHILD, anon + PAGE_SIZE), 1);
    env.mm.exit(CHILD).unwrap();

    assert_eq!(env.mm.phys().stats(), baseline);
    assert!(env.mm.objects().is_empty());
    assert_eq!(env.kernel.total_mappings(), 0);
    assert_eq!(env.store.releases(), 1);
    assert_eq!(env.mm.stats().tasks, 0);
    env.assert_consistent();
}

#[test]
fn test_munmap_everything_returns_frames() {
    let mut env = env(16);
    let vaddr = env.map_anon(TASK, 4, rw_private());
    env.mm
        .prefault(TASK, vaddr, 4 * PAGE_SIZE, crate::vm_area::AccessReason::Write)
        .unwrap();
    assert_eq!(env.frames_used(), 4);

    env.mm.munmap(TASK, vaddr, 4).unwrap();

    assert_eq!(env.frames_used(), 0);
    assert!(env.mm.objects().is_empty());
    assert!(env.mm.task(TASK).unwrap().space().is_empty());
    env.assert_consistent();
}

#[test]
fn test_shared_dirty_pages_written_back_on_teardown() {
    let mut env = env(16);
    let file = env.open_store_file(2, patterned(1));
    let vaddr = env.map_file(TASK, file, 1, rw_shared());
    env.mm.write_task_memory(TASK, vaddr, b"dirty").unwrap();

    env.mm.munmap(TASK, vaddr, 1).unwrap();

    assert_eq!(env.store.writes(), 1);
    assert_eq!(&env.store.file(2).unwrap()[..5], b"dirty");
    assert_eq!(env.store.releases(), 1);
    assert_eq!(env.frames_used(), 0);
}

#[test]
fn test_exit_unknown_task() {
    let mut env = env(16);
    assert_eq!(env.mm.exit(99), Err(MmError::NotFound));
    env.mm.exit(TASK).unwrap();
    assert_eq!(env.mm.exit(TASK), Err(MmError::NotFound));
}

#[test]
fn test_fault_after_exit_is_rejected() {
    let mut env = env(16);
    let vaddr = env.map_anon(TASK, 1, rw_private());
    env.mm.exit(TASK).unwrap();
    assert_eq!(
        env.mm.handle_fault(FaultInfo::read(TASK, vaddr)),
        Err(MmError::NotFound)
    );
}

#[test]
fn test_exit_reports_failed_writeback() {
    let mut env = env(16);
    let file = env.open_store_file(4, patterned(1));
    let vaddr = env.map_file(TASK, file, 1, rw_shared());
    env.mm.write_task_memory(TASK, vaddr, b"lost").unwrap();
    env.store.set_fail_writes(true);

    assert_eq!(env.mm.exit(TASK), Err(MmError::BackingStore(-EIO)));

    assert!(env.mm.task(TASK).is_err());
    assert_eq!(env.frames_used(), 0);
    assert!(env.mm.objects().is_empty());
    assert_eq!(env.kernel.total_mappings(), 0);
    assert_eq!(env.store.writes(), 1);
    assert_eq!(env.store.releases(), 1);
    assert_eq!(env.store.file(4).unwrap()[0], 1);
    env.assert_consistent();
}

#[test]
fn test_munmap_reports_failed_writeback() {
    let mut env = env(16);
    let file = env.open_store_file(4, patterned(2));
    let vaddr = env.map_file(TASK, file, 2, rw_shared());
    env.mm.write_task_memory(TASK, vaddr, &[8]).unwrap();
    env.mm.write_task_memory(TASK, vaddr + PAGE_SIZE, &[9]).unwrap();
    env.store.set_fail_writes(true);

    assert_eq!(env.mm.munmap(TASK, vaddr, 2), Err(MmError::BackingStore(-EIO)));

    assert_eq!(env.store.writes(), 2);
    assert!(env.mm.task(TASK).unwrap().space().is_empty());
    assert_eq!(env.frames_used(), 0);
    assert!(env.mm.objects().is_empty());
    env.assert_consistent();
}
