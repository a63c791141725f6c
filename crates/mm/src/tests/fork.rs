use super::*;
use crate::fault::{FaultInfo, FaultPath};

#[test]
fn test_fork_shadows_file_object() {
    let mut env = env(16);
    let file = env.open_store_file(1, patterned(2));
    let vaddr = env.map_file(TASK, file, 2, rw_private());

    env.mm.fork(TASK, CHILD).unwrap();

    let objects = env.mm.objects();
    let parent_head = env.mm.vma_find(TASK, vaddr).unwrap().head();
    let child_head = env.mm.vma_find(CHILD, vaddr).unwrap().head();
    assert_ne!(parent_head, child_head);
    for head in [parent_head, child_head] {
        let obj = objects.get(head).unwrap();
        assert!(obj.is_shadow());
        assert_eq!(obj.shadow_of(), Some(file));
        assert_eq!(obj.refcount(), 1);
    }
    assert_eq!(objects.get(file).unwrap().shadow_count(), 2);
    assert_eq!(objects.get(file).unwrap().refcount(), 0);
    assert_eq!(env.frames_used(), 0);
    env.assert_consistent();
}

#[test]
fn test_child_write_after_fork_copies_one_frame() {
    let mut env = env(16);
    let file = env.open_store_file(1, patterned(2));
    let vaddr = env.map_file(TASK, file, 2, rw_private());
    assert_eq!(env.read_byte(TASK, vaddr), 1);

    env.mm.fork(TASK, CHILD).unwrap();
    let before = env.frames_used();
    assert_eq!(before, 1);

    env.mm.write_task_memory(CHILD, vaddr, &[0xaa]).unwrap();

    assert_eq!(env.frames_used(), before + 1);
    let child_head = env.mm.vma_find(CHILD, vaddr).unwrap().head();
    let ppn = env.mm.task_virt_to_page(CHILD, vaddr).unwrap();
    assert_eq!(env.mm.phys().page(ppn).unwrap().owner, Some(child_head));
    assert_eq!(env.read_byte(CHILD, vaddr), 0xaa);
    assert_eq!(env.read_byte(TASK, vaddr), 1);
    env.assert_consistent();
}

#[test]
fn test_fork_freezes_parent_writable_mappings() {
    let mut env = env(16);
    let vaddr = env.map_anon(TASK, 1, rw_private());
    env.mm.write_task_memory(TASK, vaddr, &[0x11]).unwrap();
    let vpn = Vpn::from_addr_floor(vaddr);

    env.mm.fork(TASK, CHILD).unwrap();

    let (_, flags) = env.kernel.lookup(TASK, vpn.as_usize()).unwrap();
    assert_eq!(flags & MapFlags::WRITE.bits(), 0);
    assert!(!env.mm.vma_find(TASK, vaddr).unwrap().mapped()[&vpn].writable);
    assert!(env.mm.vma_find(CHILD, vaddr).unwrap().mapped().is_empty());

    let res = env.mm.handle_fault(FaultInfo::write(TASK, vaddr)).unwrap();
    assert_eq!(res.path, FaultPath::CopyOnWrite);
    env.mm.write_task_memory(TASK, vaddr, &[0x22]).unwrap();
    assert_eq!(env.read_byte(CHILD, vaddr), 0x11);

    env.mm.write_task_memory(CHILD, vaddr, &[0x33]).unwrap();
    assert_eq!(env.read_byte(TASK, vaddr), 0x22);
    assert_eq!(env.read_byte(CHILD, vaddr), 0x33);
    assert_eq!(env.frames_used(), 3);
    env.assert_consistent();
}

#[test]
fn test_child_zero_fill_write_skips_backing_fetch() {
    let mut env = env(16);
    let vaddr = env.map_anon(TASK, 2, rw_private());
    env.mm.fork(TASK, CHILD).unwrap();

    let res = env.mm.handle_fault(FaultInfo::write(CHILD, vaddr + PAGE_SIZE)).unwrap();

    assert_eq!(res.path, FaultPath::CopyOnWrite);
    assert_eq!(env.frames_used(), 1);
    let child_head = env.mm.vma_find(CHILD, vaddr).unwrap().head();
    assert_eq!(env.mm.phys().page(res.ppn).unwrap().owner, Some(child_head));
    env.assert_consistent();
}

#[test]
fn test_shared_area_is_shared_after_fork() {
    let mut env = env(16);
    let vaddr = env.map_anon(TASK, 1, rw_shared());
    env.mm.write_task_memory(TASK, vaddr, &[5]).unwrap();

    env.mm.fork(TASK, CHILD).unwrap();

    let head = env.mm.vma_find(TASK, vaddr).unwrap().head();
    assert_eq!(env.mm.vma_find(CHILD, vaddr).unwrap().head(), head);
    assert_eq!(env.mm.objects().get(head).unwrap().refcount(), 2);

    assert_eq!(env.read_byte(CHILD, vaddr), 5);
    env.mm.write_task_memory(CHILD, vaddr, &[6]).unwrap();
    assert_eq!(env.read_byte(TASK, vaddr), 6);
    assert_eq!(env.frames_used(), 1);
    env.assert_consistent();
}

#[test]
fn test_repeated_fork_exit_keeps_chain_short() {
    let mut env = env(16);
    let vaddr = env.map_anon(TASK, 1, rw_private());
    env.mm.write_task_memory(TASK, vaddr, &[0]).unwrap();

    for round in 1..=10u8 {
        env.mm.fork(TASK, CHILD).unwrap();
        env.mm.write_task_memory(TASK, vaddr, &[round]).unwrap();
        assert_eq!(env.read_byte(CHILD, vaddr), round - 1);
        env.mm.exit(CHILD).unwrap();

        let head = env.mm.vma_find(TASK, vaddr).unwrap().head();
        assert_eq!(env.mm.objects().chain_depth(head).unwrap(), 2);
        assert_eq!(env.mm.objects().len(), 2);
        assert_eq!(env.frames_used(), 2);
        assert_eq!(env.read_byte(TASK, vaddr), round);
        env.assert_consistent();
    }
}

#[test]
fn test_fork_charges_thread_quota() {
    let mut env = bare_env(16, 2);
    env.mm.task_create(TASK).unwrap();
    env.mm.fork(TASK, CHILD).unwrap();

    assert_eq!(env.mm.fork(TASK, 12), Err(MmError::PermissionDenied));
    assert!(env.mm.task(12).is_err());

    env.mm.exit(CHILD).unwrap();
    env.mm.fork(TASK, 12).unwrap();
    assert_eq!(env.mm.stats().tasks, 2);
}

#[test]
fn test_fork_rejects_bad_task_ids() {
    let mut env = env(16);
    env.mm.task_create(CHILD).unwrap();

    assert_eq!(env.mm.fork(99, 12), Err(MmError::NotFound));
    assert_eq!(env.mm.fork(TASK, CHILD), Err(MmError::InvalidArgument));
    assert_eq!(env.mm.task_create(TASK), Err(MmError::InvalidArgument));
}
