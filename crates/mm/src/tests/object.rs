use super::*;
use crate::pager::DevZeroPager;
use crate::phys::PhysicalMemory;
use crate::vm_object::{FileObject, ObjectFlags, ObjectKind, ObjectTable};

fn phys(nframes: usize) -> PhysicalMemory {
    PhysicalMemory::new(
        PpnRange::from_start_len(Ppn(FRAME_BASE), nframes),
        Arc::new(MockMem::new()),
    )
}

fn zero_file(table: &mut ObjectTable, vnum: Vnum) -> ObjectId {
    let file = FileObject::new(FileKind::DevZero, vnum, 8 * PAGE_SIZE, Arc::new(DevZeroPager));
    table.object_create(ObjectKind::File(file), ObjectFlags::READ | ObjectFlags::WRITE)
}

fn insert_new(table: &mut ObjectTable, phys: &PhysicalMemory, id: ObjectId, offset: usize) -> Ppn {
    let ppn = phys.alloc_zeroed().unwrap();
    table.page_insert(phys, id, offset, ppn).unwrap();
    ppn
}

#[test]
fn test_delete_linked_object_is_rejected() {
    let mut table = ObjectTable::new();
    let id = zero_file(&mut table, 1);
    table.link(id).unwrap();

    assert!(matches!(
        table.object_delete(id),
        Err(MmError::InvariantViolation(_))
    ));
    assert!(table.contains(id));
}

#[test]
fn test_delete_shadowed_or_populated_object_is_rejected() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    let shadow = table.shadow_create(file).unwrap();

    assert!(table.object_delete(file).unwrap_err().is_fatal());

    insert_new(&mut table, &phys, shadow, 0);
    assert!(table.object_delete(shadow).unwrap_err().is_fatal());

    table.release_cache(&phys, shadow).unwrap();
    assert_eq!(table.object_delete(shadow), Ok(Some(file)));
    assert!(table.get(file).unwrap().shadowers().is_empty());
    assert_eq!(phys.stats().allocated, 0);
}

#[test]
fn test_chain_lookup_prefers_upper_copy() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    let lower0 = insert_new(&mut table, &phys, file, 0);
    let lower1 = insert_new(&mut table, &phys, file, 1);
    let shadow = table.shadow_create(file).unwrap();
    let upper0 = insert_new(&mut table, &phys, shadow, 0);

    assert_eq!(table.shadow_chain_lookup(shadow, 0), Ok(Some((upper0, shadow))));
    assert_eq!(table.shadow_chain_lookup(shadow, 1), Ok(Some((lower1, file))));
    assert_eq!(table.shadow_chain_lookup(shadow, 5), Ok(None));
    assert_eq!(table.shadow_chain_lookup(file, 0), Ok(Some((lower0, file))));
    assert_eq!(table.terminal(shadow), Ok(file));
    assert_eq!(table.chain_depth(shadow), Ok(2));
}

#[test]
fn test_page_insert_rejects_occupied_offset() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    insert_new(&mut table, &phys, file, 3);

    let ppn = phys.alloc_page().unwrap();
    assert!(table.page_insert(&phys, file, 3, ppn).unwrap_err().is_fatal());
    phys.free_unowned(ppn).unwrap();
    assert_eq!(phys.page(ppn).unwrap().owner, None);
}

#[test]
fn test_last_unlink_reaps_whole_chain() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    insert_new(&mut table, &phys, file, 0);
    let shadow = table.shadow_create(file).unwrap();
    insert_new(&mut table, &phys, shadow, 0);
    insert_new(&mut table, &phys, shadow, 1);
    table.link(shadow).unwrap();
    assert_eq!(phys.stats().allocated, 3);

    table.unlink(&phys, shadow).unwrap();

    assert!(table.is_empty());
    assert_eq!(phys.stats().allocated, 0);
    assert!(table.unlink(&phys, shadow).is_err());
}

#[test]
fn test_unlinked_shadow_merges_into_sole_shadower() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    table.link(file).unwrap();
    let middle = table.shadow_create(file).unwrap();
    table.link(middle).unwrap();
    table.unlink(&phys, file).unwrap();
    let kept = insert_new(&mut table, &phys, middle, 0);
    let dup = insert_new(&mut table, &phys, middle, 1);

    let top = table.shadow_create(middle).unwrap();
    let other = table.shadow_create(middle).unwrap();
    table.link(top).unwrap();
    table.link(other).unwrap();
    table.unlink(&phys, middle).unwrap();
    let own = insert_new(&mut table, &phys, top, 1);

    // other 退出后 middle 只剩一个影子，应并入 top
    table.unlink(&phys, other).unwrap();

    assert!(!table.contains(middle));
    assert!(!table.contains(other));
    let top_obj = table.get(top).unwrap();
    assert_eq!(top_obj.shadow_of(), Some(file));
    assert_eq!(top_obj.cache().get(&0), Some(&kept));
    assert_eq!(top_obj.cache().get(&1), Some(&own));
    assert_eq!(phys.page(kept).unwrap().owner, Some(top));
    assert!(phys.page(dup).unwrap().is_free());
    assert!(table.get(file).unwrap().shadowers().contains(&top));
    assert_eq!(phys.stats().allocated, 2);
}

#[test]
fn test_bypass_fully_covered_shadow() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    let middle = table.shadow_create(file).unwrap();
    insert_new(&mut table, &phys, middle, 2);
    let top = table.shadow_create(middle).unwrap();
    table.link(top).unwrap();

    assert_eq!(table.try_bypass(&phys, top), Ok(false));

    insert_new(&mut table, &phys, top, 2);
    assert_eq!(table.try_bypass(&phys, top), Ok(true));

    assert_eq!(table.get(top).unwrap().shadow_of(), Some(file));
    assert!(!table.contains(middle));
    assert_eq!(phys.stats().allocated, 1);
    // 下层已经是文件对象，无可越过
    assert_eq!(table.try_bypass(&phys, top), Ok(false));
}

#[test]
fn test_releasing_mapped_page_is_fatal() {
    let phys = phys(8);
    let mut table = ObjectTable::new();
    let file = zero_file(&mut table, 1);
    table.link(file).unwrap();
    let ppn = insert_new(&mut table, &phys, file, 0);
    phys.get_page(ppn).unwrap();

    assert!(table.unlink(&phys, file).unwrap_err().is_fatal());
}

#[test]
fn test_file_registry_reuses_objects() {
    let mut env = env(8);
    let a = env.open_store_file(42, patterned(1));
    let b = env.mm.open_file(FileKind::Vfs, 42, 3 * PAGE_SIZE, env.store.clone()).unwrap();

    assert_eq!(a, b);
    assert_eq!(env.mm.objects().get(a).unwrap().as_file().unwrap().npages(), 3);
    assert_eq!(env.mm.objects().find_file(FileKind::Vfs, 42), Some(a));
    assert_eq!(env.mm.objects().find_file(FileKind::BootFile, 42), None);
}
