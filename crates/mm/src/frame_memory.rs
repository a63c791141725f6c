//! 物理帧内容访问
//!
//! pager 不直接解引用物理地址，而是经由 [`FrameMemory`] 读写帧内容。
//! 运行时由宿主提供实现（例如映射到 pager 地址空间的物理窗口）。

use crate::address::Ppn;
use crate::config::PAGE_SIZE;

/// 物理帧内容访问接口
pub trait FrameMemory: Send + Sync {
    /// 从帧 `ppn` 的 `offset` 处读出 `buf.len()` 字节
    fn read(&self, ppn: Ppn, offset: usize, buf: &mut [u8]);

    /// 向帧 `ppn` 的 `offset` 处写入 `data`
    fn write(&self, ppn: Ppn, offset: usize, data: &[u8]);

    /// 将整帧清零
    fn zero(&self, ppn: Ppn) {
        self.write(ppn, 0, &[0u8; PAGE_SIZE]);
    }

    /// 整帧复制
    fn copy(&self, src: Ppn, dst: Ppn) {
        let mut buf = [0u8; PAGE_SIZE];
        self.read(src, 0, &mut buf);
        self.write(dst, 0, &buf);
    }
}
