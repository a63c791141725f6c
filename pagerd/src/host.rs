//! 宿主上的整机装配
//!
//! [`Host`] 准备内核眼中的初始状态：模拟物理内存、内核侧能力表、
//! 拷入物理内存的启动镜像和打包好的启动描述符。
//! [`System`] 在此基础上启动 VFS 线程与 pager 线程，并交给调用方
//! 以任务身份发起请求。

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cap::{CapAccess, CapType, Capability, CapabilityRegistry, ResourceType};
use mm::config::{PAGE_SIZE, bytes_to_pages};
use mm::{FrameMemory, IntegrityReport, MmStats, PageNum, Ppn};
use uapi::types::{TaskId, Vnum};

use crate::bootdesc::{BootDesc, BootImageDesc};
use crate::client::PagerClient;
use crate::config::PagerConfig;
use crate::error::{PagerError, PagerResult};
use crate::frames::HeapFrames;
use crate::init::{self, BootParams};
use crate::ipc::{self, IpcError, IpcSender};
use crate::kernel::HostKernel;
use crate::ramfs::RamFs;
use crate::server::PagerServer;
use crate::vfs::VfsClient;

/// 启动前的宿主状态
pub struct Host {
    config: PagerConfig,
    kernel: Arc<HostKernel>,
    frames: Arc<HeapFrames>,
    bootdesc: Vec<u8>,
}

impl Host {
    /// 按配置建立物理内存和内核，并把 `images` 依次拷到物理内存开头
    pub fn new(config: PagerConfig, images: &[(&str, &[u8])]) -> PagerResult<Self> {
        let base = Ppn(config.frame_base);
        let frames = Arc::new(HeapFrames::new(base, config.phys_pages));

        let mut desc = BootDesc::default();
        let mut next = base;
        for (name, data) in images {
            let npages = bytes_to_pages(data.len()).max(1);
            if next + npages > frames.span().end() {
                return Err(PagerError::Config(format!("boot image '{}' does not fit", name)));
            }
            for (i, chunk) in data.chunks(PAGE_SIZE).enumerate() {
                frames.write(next + i, 0, chunk);
            }
            desc.images.push(BootImageDesc {
                name: String::from(*name),
                phys_start: next.start_addr() as u64,
                phys_end: (next.start_addr() + data.len().max(1)) as u64,
            });
            next = next + npages;
        }

        let mut caps = CapabilityRegistry::new(config.container);
        caps.insert(Capability::range(
            config.pager_tid,
            config.container,
            CapType::MAP,
            ResourceType::Physmem,
            CapAccess::MAP_ALL,
            base.as_usize()..base.as_usize() + config.phys_pages,
        ));
        caps.insert(Capability::quantity(
            config.pager_tid,
            config.container,
            ResourceType::ThreadPool,
            CapAccess::TCTRL_CREATE | CapAccess::TCTRL_DESTROY,
            config.thread_quota,
        ));
        let kernel = Arc::new(HostKernel::new(config.pager_tid, caps));

        Ok(Self {
            bootdesc: desc.encode(),
            config,
            kernel,
            frames,
        })
    }

    /// 以给定的启动描述符替换自动生成的那一份
    pub fn with_bootdesc(mut self, bootdesc: Vec<u8>) -> Self {
        self.bootdesc = bootdesc;
        self
    }

    /// 新建一个共享本机物理内存的空 VFS
    pub fn ramfs(&self) -> RamFs {
        RamFs::new(self.config.vfs_tid, self.frames.clone())
    }

    /// 内核
    pub fn kernel(&self) -> &Arc<HostKernel> {
        &self.kernel
    }
}

/// 停机后的汇总
pub struct Shutdown {
    /// 停机时的统计
    pub stats: MmStats,
    /// 停机时的一致性检查
    pub integrity: IntegrityReport,
    /// pager 处理的请求数
    pub served: usize,
    /// VFS 的最终状态
    pub vfs: RamFs,
}

/// 运行中的系统
pub struct System {
    kernel: Arc<HostKernel>,
    frames: Arc<HeapFrames>,
    pager: IpcSender,
    vfs: VfsClient,
    pager_thread: JoinHandle<PagerResult<PagerServer>>,
    vfs_thread: JoinHandle<RamFs>,
}

impl System {
    /// 启动 VFS 与 pager
    pub fn start(host: Host, fs: RamFs) -> PagerResult<Self> {
        let (vfs_tx, vfs_rx) = ipc::channel();
        let vfs_thread = fs.spawn(vfs_rx);

        let pager_tid = host.config.pager_tid;
        let mm = init::boot(BootParams {
            config: &host.config,
            kernel: host.kernel.clone(),
            frames: host.frames.clone(),
            bootdesc: &host.bootdesc,
        })?;

        let (pager_tx, pager_rx) = ipc::channel();
        let server = PagerServer::new(mm, Arc::new(VfsClient::new(pager_tid, Arc::new(vfs_tx.clone()))), pager_rx);
        let pager_thread = thread::spawn(move || server.run());

        Ok(Self {
            kernel: host.kernel,
            frames: host.frames,
            pager: pager_tx,
            vfs: VfsClient::new(pager_tid, Arc::new(vfs_tx)),
            pager_thread,
            vfs_thread,
        })
    }

    /// 内核
    pub fn kernel(&self) -> &HostKernel {
        &self.kernel
    }

    /// 物理内存
    pub fn frames(&self) -> &HeapFrames {
        &self.frames
    }

    /// 以任务 `tid` 的身份访问 pager
    pub fn client(&self, tid: TaskId) -> PagerClient<'_> {
        PagerClient::new(tid, &self.pager, &self.kernel, &self.frames)
    }

    /// 在 VFS 中按路径查找文件，返回 `(vnum, 长度)`
    pub fn lookup(&self, path: &str) -> PagerResult<(Vnum, usize)> {
        Ok(self.vfs.open_by_path(path)?)
    }

    /// pager 是否仍在运行
    pub fn is_running(&self) -> bool {
        !self.pager_thread.is_finished()
    }

    /// 关闭所有请求端，等待 pager 与 VFS 退出
    pub fn shutdown(self) -> PagerResult<Shutdown> {
        let System {
            pager,
            vfs,
            pager_thread,
            vfs_thread,
            ..
        } = self;
        drop(pager);
        drop(vfs);

        let server = pager_thread
            .join()
            .map_err(|_| PagerError::Ipc(IpcError::Disconnected))??;
        let shutdown_stats = server.mm().stats();
        let integrity = server.mm().check_integrity();
        let served = server.served();
        drop(server);

        let fs = vfs_thread.join().map_err(|_| PagerError::Ipc(IpcError::Disconnected))?;
        log::info!(
            "host: shutdown after {} requests, {}/{} frames free",
            served,
            shutdown_stats.frames.free,
            shutdown_stats.frames.total
        );
        Ok(Shutdown {
            stats: shutdown_stats,
            integrity,
            served,
            vfs: fs,
        })
    }
}
