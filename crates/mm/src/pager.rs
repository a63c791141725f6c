//! 文件对象的后备存储（pager）
//!
//! 每个 [`FileObject`](crate::vm_object::FileObject) 携带一个 [`Pager`]，
//! 负责产生或持久化页内容：
//!
//! - [`DevZeroPager`]：匿名内存，零填充
//! - [`BootFilePager`]：启动镜像，从镜像所在的保留帧复制
//! - VFS 文件：由运行环境通过 IPC 实现（见 pagerd）
//!
//! `page_in` 可能阻塞（等待 IPC 回复），调用方在此期间不得持有任何锁。

use uapi::types::Vnum;

use crate::address::{Ppn, PpnRange};
use crate::error::{MmError, MmResult};
use crate::frame_memory::FrameMemory;

/// 文件对象的种类
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    /// 匿名零页
    DevZero = 1,
    /// VFS 文件
    Vfs = 2,
    /// 启动镜像
    BootFile = 3,
    /// 共享内存段
    Shm = 4,
}

/// 后备存储接口
pub trait Pager: Send + Sync {
    /// 把 `vnum` 第 `page_offset` 页的内容填入帧 `frame`
    fn page_in(&self, vnum: Vnum, page_offset: usize, frame: Ppn, mem: &dyn FrameMemory) -> MmResult<()>;

    /// 把帧 `frame` 的内容写回 `vnum` 第 `page_offset` 页
    fn page_out(&self, _vnum: Vnum, _page_offset: usize, _frame: Ppn, _mem: &dyn FrameMemory) -> MmResult<()> {
        Ok(())
    }

    /// 文件对象即将销毁；其页缓存随后由对象模型直接回收
    fn release_pages(&self, _vnum: Vnum) -> MmResult<()> {
        Ok(())
    }

    /// 页内容是否恒为零
    fn zero_fill(&self) -> bool {
        false
    }
}

/// 匿名内存的零填充 pager
#[derive(Debug, Default, Clone, Copy)]
pub struct DevZeroPager;

impl Pager for DevZeroPager {
    fn page_in(&self, _vnum: Vnum, _page_offset: usize, frame: Ppn, mem: &dyn FrameMemory) -> MmResult<()> {
        mem.zero(frame);
        Ok(())
    }

    fn zero_fill(&self) -> bool {
        true
    }
}

/// 启动镜像 pager
///
/// 镜像在启动时被标记为占用，内容直接从镜像帧复制，不经过 IPC。
#[derive(Debug, Clone, Copy)]
pub struct BootFilePager {
    image: PpnRange,
}

impl BootFilePager {
    /// 创建覆盖 `image` 的 pager
    pub fn new(image: PpnRange) -> Self {
        Self { image }
    }

    /// 镜像所在帧
    pub fn image(&self) -> PpnRange {
        self.image
    }
}

impl Pager for BootFilePager {
    fn page_in(&self, vnum: Vnum, page_offset: usize, frame: Ppn, mem: &dyn FrameMemory) -> MmResult<()> {
        if page_offset >= self.image.len() {
            log::warn!("bootfile {}: page {} beyond image", vnum, page_offset);
            return Err(MmError::BackingStore(-uapi::errno::EIO));
        }
        mem.copy(self.image.start() + page_offset, frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockMem;

    #[test]
    fn test_bootfile_copies_image_frames() {
        let mem = MockMem::new();
        mem.write(Ppn(0x20), 0, b"image page 0");
        mem.write(Ppn(0x21), 0, b"image page 1");
        let pager = BootFilePager::new(PpnRange::from_start_len(Ppn(0x20), 2));

        pager.page_in(0, 1, Ppn(0x80), &mem).unwrap();
        let mut buf = [0u8; 12];
        mem.read(Ppn(0x80), 0, &mut buf);
        assert_eq!(&buf, b"image page 1");

        assert!(matches!(
            pager.page_in(0, 2, Ppn(0x81), &mem),
            Err(MmError::BackingStore(_))
        ));
    }

    #[test]
    fn test_devzero_fills_zero() {
        let mem = MockMem::new();
        mem.write(Ppn(0x30), 0, &[0xaa; 16]);
        DevZeroPager.page_in(0, 0, Ppn(0x30), &mem).unwrap();
        let mut buf = [0xffu8; 16];
        mem.read(Ppn(0x30), 0, &mut buf);
        assert_eq!(buf, [0u8; 16]);
        assert!(DevZeroPager.zero_fill());
    }
}
