//! 帧分配器模块
//!
//! 本模块跟踪 pager 所管理的物理页帧的空闲/占用状态。
//!
//! ## 分配策略（位图，首次适配）
//!
//! - **bitmap**：每个 bit 表示一个物理帧（0=空闲，1=已分配）
//! - 连续分配从位图开头扫描，返回第一段足够长的空闲区间
//! - 全满 / 全空的 u64 整字跳过或整字累加
//!
//! ## 错误而非断言
//!
//! 释放已空闲的帧、或在跟踪范围之外 `mark`，都会以
//! [`MmError::InvariantViolation`] 拒绝，且不修改位图。
//!
//! 分配器只管位图；帧描述符（引用计数、属主）见 [`crate::page`]。

use alloc::vec::Vec;

use crate::address::{PageNum, Ppn, PpnRange};
use crate::error::{invariant, MmError, MmResult};

/// `mark` 的目标状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// 占用（启动时的镜像、保留区）
    Used,
    /// 空闲
    Free,
}

/// 物理帧分配器。
/// 采用位图策略跟踪每个物理帧的分配状态。
#[derive(Debug)]
pub struct FrameAllocator {
    /// 物理帧的起始 Ppn。
    start: Ppn,
    /// 物理帧的结束 Ppn (不包含)。
    end: Ppn,
    /// 位图数据（每个 bit 表示一个帧：0=空闲，1=已分配）。
    bitmap: Vec<u64>,
    /// 总帧数。
    total_frames: usize,
    /// 已分配帧数（用于快速统计）。
    allocated_count: usize,
}

impl FrameAllocator {
    /// 创建一个跟踪 `span` 的帧分配器，初始全部空闲。
    pub fn new(span: PpnRange) -> Self {
        let total_frames = span.len();
        FrameAllocator {
            start: span.start(),
            end: span.end(),
            bitmap: alloc::vec![0u64; total_frames.div_ceil(64)],
            total_frames,
            allocated_count: 0,
        }
    }

    /// 跟踪的物理帧范围
    pub fn span(&self) -> PpnRange {
        PpnRange::new(self.start, self.end)
    }

    /// 检查帧是否空闲
    #[inline]
    fn is_free(&self, frame_idx: usize) -> bool {
        let word_idx = frame_idx / 64;
        let bit_idx = frame_idx % 64;
        (self.bitmap[word_idx] & (1u64 << bit_idx)) == 0
    }

    /// 标记帧为已分配
    #[inline]
    fn mark_allocated(&mut self, frame_idx: usize) {
        let word_idx = frame_idx / 64;
        let bit_idx = frame_idx % 64;
        self.bitmap[word_idx] |= 1u64 << bit_idx;
    }

    /// 标记帧为空闲
    #[inline]
    fn mark_free(&mut self, frame_idx: usize) {
        let word_idx = frame_idx / 64;
        let bit_idx = frame_idx % 64;
        self.bitmap[word_idx] &= !(1u64 << bit_idx);
    }

    /// 某帧是否已被占用；范围外的帧视为未占用
    pub fn is_allocated(&self, ppn: Ppn) -> bool {
        self.span().contains(ppn) && !self.is_free(ppn - self.start)
    }

    fn claim(&mut self, start_frame: usize, num: usize) -> PpnRange {
        for i in 0..num {
            self.mark_allocated(start_frame + i);
        }
        self.allocated_count += num;
        PpnRange::from_start_len(self.start + start_frame, num)
    }

    /// 分配 `num` 个**连续**物理帧（首次适配）。
    pub fn alloc(&mut self, num: usize) -> MmResult<PpnRange> {
        if num == 0 {
            return Err(MmError::InvalidArgument);
        }
        if num > self.free_frames() {
            return Err(MmError::OutOfMemory);
        }

        let mut consecutive = 0;
        let mut start_frame = 0;

        for idx in 0..self.bitmap.len() {
            let word = self.bitmap[idx];

            // 快速跳过全满的 u64
            if word == u64::MAX {
                consecutive = 0;
                continue;
            }

            // 整个 u64 空闲，整字累加
            if word == 0 {
                if consecutive == 0 {
                    start_frame = idx * 64;
                }
                consecutive += 64.min(self.total_frames - idx * 64);
                if consecutive >= num {
                    return Ok(self.claim(start_frame, num));
                }
                continue;
            }

            for bit in 0..64 {
                let frame_idx = idx * 64 + bit;
                if frame_idx >= self.total_frames {
                    break;
                }
                if (word & (1u64 << bit)) == 0 {
                    if consecutive == 0 {
                        start_frame = frame_idx;
                    }
                    consecutive += 1;
                    if consecutive == num {
                        return Ok(self.claim(start_frame, num));
                    }
                } else {
                    consecutive = 0;
                }
            }
        }

        Err(MmError::OutOfMemory)
    }

    /// 分配单个物理帧
    pub fn alloc_frame(&mut self) -> MmResult<Ppn> {
        self.alloc(1).map(|range| range.start())
    }

    fn check_span(&self, range: &PpnRange, what: &'static str) -> MmResult<()> {
        if range.is_empty() || !self.span().contains_range(range) {
            log::error!(
                "frame: {:?} outside tracked span [{:#x}, {:#x})",
                range,
                self.start.as_usize(),
                self.end.as_usize()
            );
            return Err(invariant(what));
        }
        Ok(())
    }

    /// 回收从 `start` 开始的 `num` 个帧。
    ///
    /// 只要其中有一帧已经空闲，整个请求都会被拒绝。
    pub fn free(&mut self, start: Ppn, num: usize) -> MmResult<()> {
        let range = PpnRange::from_start_len(start, num);
        self.check_span(&range, "free outside tracked span")?;

        let start_idx = start - self.start;
        if (start_idx..start_idx + num).any(|i| self.is_free(i)) {
            log::error!("frame: double free in {:?}", range);
            return Err(invariant("double free"));
        }
        for i in start_idx..start_idx + num {
            self.mark_free(i);
        }
        self.allocated_count -= num;
        Ok(())
    }

    /// 启动期保留：把 `range` 强制标为占用或空闲。
    ///
    /// 范围越出跟踪区间说明启动描述符已损坏，按不变量错误处理。
    pub fn mark(&mut self, range: PpnRange, state: FrameState) -> MmResult<()> {
        self.check_span(&range, "mark outside tracked span")?;

        let start_idx = range.start() - self.start;
        for i in start_idx..start_idx + range.len() {
            match (state, self.is_free(i)) {
                (FrameState::Used, true) => {
                    self.mark_allocated(i);
                    self.allocated_count += 1;
                }
                (FrameState::Free, false) => {
                    self.mark_free(i);
                    self.allocated_count -= 1;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 获取总的物理帧数
    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    /// 获取已分配的帧数
    pub fn allocated_frames(&self) -> usize {
        self.allocated_count
    }

    /// 获取空闲的帧数
    pub fn free_frames(&self) -> usize {
        self.total_frames - self.allocated_count
    }

    /// 获取帧分配器的当前状态
    /// # 返回值
    /// - 总帧数
    /// - 已分配的帧数
    /// - 空闲的帧数
    pub fn get_stats(&self) -> (usize, usize, usize) {
        (
            self.total_frames,
            self.allocated_count,
            self.total_frames - self.allocated_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(frames: usize) -> FrameAllocator {
        FrameAllocator::new(PpnRange::from_start_len(Ppn(0x100), frames))
    }

    #[test]
    fn test_alloc_first_fit() {
        let mut fa = allocator(200);
        let a = fa.alloc(3).unwrap();
        assert_eq!(a.start(), Ppn(0x100));
        let b = fa.alloc(2).unwrap();
        assert_eq!(b.start(), Ppn(0x103));
        fa.free(a.start(), 3).unwrap();
        // 回收后的洞会被优先复用
        let c = fa.alloc(2).unwrap();
        assert_eq!(c.start(), Ppn(0x100));
        assert_eq!(fa.allocated_frames(), 4);
    }

    #[test]
    fn test_alloc_spans_words() {
        let mut fa = allocator(200);
        fa.mark(PpnRange::from_start_len(Ppn(0x100), 60), FrameState::Used)
            .unwrap();
        let r = fa.alloc(70).unwrap();
        assert_eq!(r.start(), Ppn(0x100 + 60));
        assert_eq!(r.len(), 70);
        assert_eq!(fa.free_frames(), 70);
    }

    #[test]
    fn test_out_of_memory() {
        let mut fa = allocator(4);
        fa.alloc(4).unwrap();
        assert_eq!(fa.alloc_frame(), Err(MmError::OutOfMemory));
    }

    #[test]
    fn test_fragmented_out_of_memory() {
        let mut fa = allocator(4);
        fa.mark(PpnRange::from_start_len(Ppn(0x101), 1), FrameState::Used)
            .unwrap();
        assert_eq!(fa.alloc(3), Err(MmError::OutOfMemory));
        assert_eq!(fa.alloc(2).unwrap().start(), Ppn(0x102));
    }

    #[test]
    fn test_double_free_rejected() {
        let mut fa = allocator(8);
        let p = fa.alloc_frame().unwrap();
        fa.free(p, 1).unwrap();
        assert!(matches!(fa.free(p, 1), Err(MmError::InvariantViolation(_))));
        assert_eq!(fa.allocated_frames(), 0);
    }

    #[test]
    fn test_partial_double_free_leaves_bitmap_untouched() {
        let mut fa = allocator(8);
        let r = fa.alloc(2).unwrap();
        fa.free(r.start() + 1, 1).unwrap();
        assert!(fa.free(r.start(), 2).is_err());
        assert!(fa.is_allocated(r.start()));
    }

    #[test]
    fn test_mark_outside_span_is_fatal() {
        let mut fa = allocator(8);
        let bad = PpnRange::from_start_len(Ppn(0x106), 4);
        assert!(matches!(
            fa.mark(bad, FrameState::Used),
            Err(MmError::InvariantViolation(_))
        ));
        assert_eq!(fa.allocated_frames(), 0);
    }

    #[test]
    fn test_mark_idempotent_counts() {
        let mut fa = allocator(8);
        let r = PpnRange::from_start_len(Ppn(0x100), 2);
        fa.mark(r, FrameState::Used).unwrap();
        fa.mark(r, FrameState::Used).unwrap();
        assert_eq!(fa.allocated_frames(), 2);
        fa.mark(r, FrameState::Free).unwrap();
        assert_eq!(fa.get_stats(), (8, 0, 8));
    }
}
