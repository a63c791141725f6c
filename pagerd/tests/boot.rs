//! Integration tests for pagerd boot-time setup.

mod common;

use std::sync::Arc;

use cap::CapabilityRegistry;
use mm::{MmError, PageNum, Ppn, PAGE_SIZE};
use pagerd::bootdesc::{BootDesc, BootDescError, BootImageDesc};
use pagerd::client::MmapArgs;
use pagerd::frames::HeapFrames;
use pagerd::init::{self, BootParams};
use pagerd::kernel::HostKernel;
use pagerd::{Host, PagerConfig, PagerError, System};
use uapi::mm::{MMAP_KIND_BOOTFILE, VmFlags};

use common::{PARENT, config};

fn image(first: u8, len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    data[0] = first;
    data[len - 1] = first.wrapping_add(1);
    data
}

#[test]
fn test_boot_reserves_every_image() {
    let small = image(0x10, 3000);
    let large = image(0x20, PAGE_SIZE + 904);
    let host = Host::new(config(), &[("small", small.as_slice()), ("large", large.as_slice())]).unwrap();
    let fs = host.ramfs();
    let system = System::start(host, fs).unwrap();

    let task = system.client(PARENT);
    task.task_create().unwrap();
    let addr = task
        .mmap(MmapArgs::file(MMAP_KIND_BOOTFILE, 1, 2, VmFlags::READ | VmFlags::PRIVATE))
        .unwrap();
    assert_eq!(task.load(addr).unwrap(), 0x20);
    assert_eq!(task.load(addr + PAGE_SIZE + 903).unwrap(), 0x21);
    assert_eq!(task.load(addr + PAGE_SIZE + 904).unwrap(), 0);
    task.exit(0).unwrap();
    drop(task);

    let shutdown = system.shutdown().unwrap();
    assert_eq!(shutdown.stats.frames.allocated, 3);
    assert_eq!(shutdown.stats.objects.files, 1);
    assert!(shutdown.integrity.is_ok());
}

#[test]
fn test_corrupt_descriptor_rejected() {
    let host = Host::new(config(), &[]).unwrap().with_bootdesc(vec![1, 2, 3]);
    let fs = host.ramfs();
    assert!(matches!(
        System::start(host, fs).err(),
        Some(PagerError::BootDesc(BootDescError::Truncated))
    ));
}

#[test]
fn test_image_outside_span_rejected() {
    let config = config();
    let outside = (config.frame_base + config.phys_pages) * PAGE_SIZE;
    let desc = BootDesc {
        images: vec![BootImageDesc {
            name: String::from("rogue"),
            phys_start: outside as u64,
            phys_end: (outside + PAGE_SIZE) as u64,
        }],
    };
    let host = Host::new(config, &[]).unwrap().with_bootdesc(desc.encode());
    let fs = host.ramfs();
    assert!(matches!(
        System::start(host, fs).err(),
        Some(PagerError::Mm(MmError::InvariantViolation(_)))
    ));
}

#[test]
fn test_duplicate_image_rejected() {
    let data = image(1, 16);
    let host = Host::new(config(), &[("init", data.as_slice()), ("init", data.as_slice())]).unwrap();
    let fs = host.ramfs();
    assert!(matches!(System::start(host, fs).err(), Some(PagerError::Boot(_))));
}

#[test]
fn test_image_too_large_for_memory() {
    let config = PagerConfig {
        phys_pages: 16,
        ..config()
    };
    let data = vec![0u8; 17 * PAGE_SIZE];
    assert!(matches!(
        Host::new(config, &[("huge", data.as_slice())]).err(),
        Some(PagerError::Config(_))
    ));
}

#[test]
fn test_boot_without_physmem_capability() {
    let config = config();
    let frames = Arc::new(HeapFrames::new(Ppn(config.frame_base), config.phys_pages));
    let kernel = Arc::new(HostKernel::new(config.pager_tid, CapabilityRegistry::new(config.container)));
    let bootdesc = BootDesc::default().encode();
    let result = init::boot(BootParams {
        config: &config,
        kernel,
        frames,
        bootdesc: &bootdesc,
    });
    assert!(matches!(result.err(), Some(PagerError::Boot(_))));
}

#[test]
fn test_boot_builds_manager_from_kernel_capabilities() {
    let config = config();
    let host = Host::new(config.clone(), &[("init", image(7, 100).as_slice())]).unwrap();
    let frames = Arc::new(HeapFrames::new(Ppn(config.frame_base), config.phys_pages));
    let bootdesc = BootDesc {
        images: vec![BootImageDesc {
            name: String::from("init"),
            phys_start: Ppn(config.frame_base).start_addr() as u64,
            phys_end: (Ppn(config.frame_base).start_addr() + 100) as u64,
        }],
    }
    .encode();
    let mm = init::boot(BootParams {
        config: &config,
        kernel: host.kernel().clone(),
        frames,
        bootdesc: &bootdesc,
    })
    .unwrap();

    let stats = mm.stats();
    assert_eq!(stats.frames.total, config.phys_pages);
    assert_eq!(stats.frames.allocated, 1);
    assert_eq!(mm.boot_images().len(), 1);
    assert_eq!(mm.boot_images()[0].range.len(), 1);
    assert_eq!(mm.caps().lock().len(), 2);
}
