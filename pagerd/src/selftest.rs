//! 启动自检
//!
//! 在宿主上装配整机，以两个任务的身份走一遍典型流程：
//! 匿名映射与读写、启动镜像映射、共享文件映射与 msync、
//! fork 后的写时复制，最后两个任务退出并停机检查。

use mm::config::PAGE_SIZE;
use uapi::mm::{MMAP_KIND_BOOTFILE, MMAP_KIND_VFS, VmFlags};
use uapi::types::TaskId;

use crate::client::{Errno, MmapArgs};
use crate::config::PagerConfig;
use crate::error::{PagerError, PagerResult};
use crate::host::{Host, Shutdown, System};

/// 启动镜像名
pub const INIT_IMAGE: &str = "init";
/// 自检父任务
pub const PARENT: TaskId = 10;
/// 自检子任务
pub const CHILD: TaskId = 11;
/// 自检共享文件
pub const MOTD_PATH: &str = "/etc/motd";

const MOTD: &[u8] = b"welcome to the pager\n";

/// 启动镜像内容：第 `i` 页首字节为 `0x40 + i`
pub fn init_image() -> Vec<u8> {
    let mut image = vec![0u8; 2 * PAGE_SIZE];
    image[0] = 0x40;
    image[PAGE_SIZE] = 0x41;
    image
}

fn step<T>(what: &str, result: Errno<T>) -> PagerResult<T> {
    result.map_err(|errno| PagerError::SelfTest(format!("{} failed with {}", what, errno)))
}

fn expect(ok: bool, what: &str) -> PagerResult<()> {
    if ok {
        Ok(())
    } else {
        Err(PagerError::SelfTest(format!("{}: unexpected result", what)))
    }
}

/// 在已启动的系统上执行自检脚本
pub fn script(system: &System) -> PagerResult<()> {
    let parent = system.client(PARENT);
    step("task_create", parent.task_create())?;

    let rw_private = VmFlags::READ | VmFlags::WRITE | VmFlags::PRIVATE;
    let heap = step("mmap heap", parent.mmap(MmapArgs::anonymous(4, rw_private)))?;
    step("write heap", parent.write(heap, b"parent"))?;
    let mut buf = [0u8; 6];
    step("read heap", parent.read(heap, &mut buf))?;
    expect(&buf == b"parent", "heap read back")?;
    log::info!("selftest: anonymous memory at {:#x}", heap);

    let text = step(
        "mmap init",
        parent.mmap(MmapArgs::file(MMAP_KIND_BOOTFILE, 0, 2, VmFlags::READ | VmFlags::EXEC | VmFlags::PRIVATE)),
    )?;
    expect(step("load init", parent.load(text + PAGE_SIZE))? == 0x41, "boot image contents")?;

    let (vnum, _) = system.lookup(MOTD_PATH)?;
    let motd = step(
        "mmap motd",
        parent.mmap(MmapArgs::file(MMAP_KIND_VFS, vnum, 1, VmFlags::READ | VmFlags::WRITE | VmFlags::SHARED)),
    )?;
    expect(step("load motd", parent.load(motd))? == MOTD[0], "file contents")?;
    step("write motd", parent.write(motd, b"WELCOME"))?;
    expect(step("msync motd", parent.msync(motd, 1))? == 1, "msync count")?;

    step("fork", parent.fork(CHILD))?;
    let child = system.client(CHILD);
    step("child read heap", child.read(heap, &mut buf))?;
    expect(&buf == b"parent", "child sees parent memory")?;
    step("child write heap", child.write(heap, b"child!"))?;
    step("parent read heap", parent.read(heap, &mut buf))?;
    expect(&buf == b"parent", "parent isolated from child write")?;
    step("child read back", child.read(heap, &mut buf))?;
    expect(&buf == b"child!", "child sees own write")?;
    log::info!("selftest: copy-on-write verified");

    step("child exit", child.exit(0))?;
    step("parent exit", parent.exit(0))?;
    Ok(())
}

/// 装配、运行自检并停机
pub fn run(config: PagerConfig) -> PagerResult<Shutdown> {
    let image = init_image();
    let host = Host::new(config, &[(INIT_IMAGE, image.as_slice())])?;
    let mut fs = host.ramfs();
    fs.create(MOTD_PATH, MOTD);
    let system = System::start(host, fs)?;

    let outcome = script(&system);
    let shutdown = system.shutdown()?;
    outcome?;

    expect(shutdown.integrity.is_ok(), "integrity after shutdown")?;
    expect(shutdown.stats.tasks == 0, "no tasks left")?;
    expect(shutdown.stats.frames.allocated == 2, "only boot image frames in use")?;
    let motd = shutdown.vfs.lookup(MOTD_PATH).and_then(|v| shutdown.vfs.file(v));
    expect(motd.is_some_and(|f| f.starts_with(b"WELCOME")), "file written back")?;
    Ok(shutdown)
}
