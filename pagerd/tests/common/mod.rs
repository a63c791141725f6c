#![allow(dead_code)]

use pagerd::selftest::{INIT_IMAGE, init_image};
use pagerd::{Host, PagerConfig, System};
use uapi::mm::VmFlags;
use uapi::types::{TaskId, Vnum};

pub const PARENT: TaskId = 10;
pub const CHILD: TaskId = 11;

/// 启动镜像占用的帧数
pub const BOOT_FRAMES: usize = 2;

pub fn config() -> PagerConfig {
    PagerConfig {
        phys_pages: 64,
        thread_quota: 8,
        ..PagerConfig::default()
    }
}

pub fn rw_private() -> VmFlags {
    VmFlags::READ | VmFlags::WRITE | VmFlags::PRIVATE
}

pub fn rw_shared() -> VmFlags {
    VmFlags::READ | VmFlags::WRITE | VmFlags::SHARED
}

/// 启动系统，VFS 中预置 `files`，返回系统与各文件的 vnum
pub fn start_with(config: PagerConfig, files: &[(&str, &[u8])]) -> (System, Vec<Vnum>) {
    let image = init_image();
    let host = Host::new(config, &[(INIT_IMAGE, image.as_slice())]).unwrap();
    let mut fs = host.ramfs();
    let vnums = files.iter().map(|(path, data)| fs.create(path, data)).collect();
    (System::start(host, fs).unwrap(), vnums)
}

pub fn start(files: &[(&str, &[u8])]) -> (System, Vec<Vnum>) {
    start_with(config(), files)
}
