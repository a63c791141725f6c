//! `capability_control` 请求集合的集成测试

use cap::{
    CapAccess, CapControl, CapDiff, CapError, CapReply, CapType, Capability, CapabilityRegistry,
    GrantFlags, ResourceType, ShareScope,
};

const PAGER: usize = 1;
const CLIENT: usize = 2;

fn registry_with_range() -> (CapabilityRegistry, u32) {
    let mut reg = CapabilityRegistry::new(0);
    let id = reg.insert(Capability::range(
        PAGER,
        0,
        CapType::MAP,
        ResourceType::Physmem,
        CapAccess::MAP_READ | CapAccess::MAP_WRITE | CapAccess::CAP_ALL,
        0..100,
    ));
    (reg, id)
}

#[test]
fn test_split_range_in_halves() {
    let (mut reg, id) = registry_with_range();
    let parent_rights = reg.get(id).unwrap().access;

    let reply = reg
        .capability_control(
            PAGER,
            CapControl::Split {
                capid: id,
                diff: CapDiff::range(CapAccess::MAP_READ | CapAccess::CAP_ALL, 50..100),
            },
        )
        .unwrap();
    let CapReply::New(new_id) = reply else {
        panic!("split should create a capability");
    };

    let low = reg.get(id).unwrap();
    let high = reg.get(new_id).unwrap();
    assert_eq!(low.span(), 0..50);
    assert_eq!(high.span(), 50..100);
    for cap in [low, high] {
        assert!(cap.bounds_ok());
        assert!(cap.used <= cap.size && cap.size <= cap.end - cap.start);
        assert!(parent_rights.contains(cap.access));
    }
    assert!(reg.bounds_consistent());
}

#[test]
fn test_split_rejects_middle_and_wider_rights() {
    let (mut reg, id) = registry_with_range();
    assert_eq!(
        reg.capability_control(
            PAGER,
            CapControl::Split {
                capid: id,
                diff: CapDiff::range(CapAccess::MAP_READ, 20..40),
            },
        ),
        Err(CapError::InvalidArgument)
    );
    assert_eq!(
        reg.capability_control(
            PAGER,
            CapControl::Split {
                capid: id,
                diff: CapDiff::range(CapAccess::MAP_EXEC, 50..100),
            },
        ),
        Err(CapError::PermissionDenied)
    );
    // 失败的拆分不改动原能力
    assert_eq!(reg.get(id).unwrap().span(), 0..100);
}

#[test]
fn test_split_rights_only() {
    let (mut reg, id) = registry_with_range();
    let reply = reg
        .capability_control(
            PAGER,
            CapControl::Split {
                capid: id,
                diff: CapDiff::rights(CapAccess::MAP_WRITE),
            },
        )
        .unwrap();
    let CapReply::New(new_id) = reply else {
        panic!("split should create a capability");
    };
    assert!(!reg.get(id).unwrap().access.contains(CapAccess::MAP_WRITE));
    assert_eq!(reg.get(new_id).unwrap().access, CapAccess::MAP_WRITE);
}

#[test]
fn test_split_cannot_exceed_unused_capacity() {
    let (mut reg, id) = registry_with_range();
    reg.consume(id, 80).unwrap();
    assert_eq!(
        reg.capability_control(
            PAGER,
            CapControl::Split {
                capid: id,
                diff: CapDiff::range(CapAccess::MAP_READ, 50..100),
            },
        ),
        Err(CapError::OutOfBounds)
    );
}

#[test]
fn test_ncaps_and_read_follow_visibility() {
    let (mut reg, id) = registry_with_range();
    assert_eq!(reg.capability_control(CLIENT, CapControl::Ncaps), Ok(CapReply::Count(0)));

    reg.capability_control(
        PAGER,
        CapControl::Share {
            capid: id,
            scope: ShareScope::Single,
        },
    )
    .unwrap();
    assert_eq!(reg.capability_control(CLIENT, CapControl::Ncaps), Ok(CapReply::Count(1)));
    let Ok(CapReply::Caps(caps)) = reg.capability_control(CLIENT, CapControl::Read) else {
        panic!("read should return caps");
    };
    assert_eq!(caps[0].capid, id);
}

#[test]
fn test_grant_moves_ownership_and_respects_used() {
    let (mut reg, id) = registry_with_range();
    reg.consume(id, 1).unwrap();
    assert_eq!(
        reg.capability_control(
            PAGER,
            CapControl::Grant {
                capid: id,
                target: CLIENT,
                flags: GrantFlags::empty(),
            },
        ),
        Err(CapError::Busy)
    );
    reg.release(id, 1).unwrap();
    reg.capability_control(
        PAGER,
        CapControl::Grant {
            capid: id,
            target: CLIENT,
            flags: GrantFlags::IMMUTABLE,
        },
    )
    .unwrap();
    let cap = reg.get(id).unwrap();
    assert_eq!(cap.owner, CLIENT);
    assert!(!cap.access.contains(CapAccess::CAP_GRANT));
    // 原持有者不再能操作
    assert_eq!(
        reg.capability_control(PAGER, CapControl::Replicate { capid: id }),
        Err(CapError::PermissionDenied)
    );
}

#[test]
fn test_replicate_refuses_quantity() {
    let mut reg = CapabilityRegistry::new(0);
    let q = reg.insert(Capability::quantity(
        PAGER,
        0,
        ResourceType::ThreadPool,
        CapAccess::TCTRL_CREATE | CapAccess::CAP_ALL,
        8,
    ));
    assert_eq!(
        reg.capability_control(PAGER, CapControl::Replicate { capid: q }),
        Err(CapError::NotReplicable)
    );
}

#[test]
fn test_deduce_only_narrows() {
    let (mut reg, id) = registry_with_range();
    reg.capability_control(
        PAGER,
        CapControl::Deduce {
            capid: id,
            new: CapDiff::range(CapAccess::MAP_READ | CapAccess::CAP_DEDUCE, 10..20),
        },
    )
    .unwrap();
    let cap = reg.get(id).unwrap();
    assert_eq!(cap.span(), 10..20);
    assert_eq!(cap.size, 10);

    assert_eq!(
        reg.capability_control(
            PAGER,
            CapControl::Deduce {
                capid: id,
                new: CapDiff::range(CapAccess::MAP_READ | CapAccess::MAP_WRITE | CapAccess::CAP_DEDUCE, 10..20),
            },
        ),
        Err(CapError::PermissionDenied)
    );
    assert_eq!(
        reg.capability_control(
            PAGER,
            CapControl::Deduce {
                capid: id,
                new: CapDiff::range(CapAccess::MAP_READ | CapAccess::CAP_DEDUCE, 0..20),
            },
        ),
        Err(CapError::OutOfBounds)
    );
}
