//! VM 区域与任务地址空间
//!
//! 每个 [`VmArea`] 是某任务地址空间中的一段连续虚拟页，
//! 绑定到一条对象链的链顶（[`VmArea::head`] 就是这条 VMObjLink）。
//! [`AddressSpace`] 按起始页号有序保存互不重叠的区域，按地址查找为 O(log n)。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use uapi::mm::VmFlags;

use crate::address::{PageNum, Ppn, Vpn, VpnRange};
use crate::error::{MmError, MmResult};
use crate::vm_object::ObjectId;

/// 缺页原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessReason {
    /// 读
    Read,
    /// 写
    Write,
}

/// 已经安装到任务页表中的一页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// 物理帧
    pub ppn: Ppn,
    /// 是否以可写方式安装
    pub writable: bool,
}

/// VM 区域
#[derive(Debug)]
pub struct VmArea {
    range: VpnRange,
    flags: VmFlags,
    /// 区域首页对应的对象页偏移
    file_offset: usize,
    head: ObjectId,
    mapped: BTreeMap<Vpn, Mapping>,
}

impl VmArea {
    /// 创建区域；调用方负责为 `head` 增加链接计数
    pub fn new(range: VpnRange, flags: VmFlags, file_offset: usize, head: ObjectId) -> Self {
        Self {
            range,
            flags,
            file_offset,
            head,
            mapped: BTreeMap::new(),
        }
    }

    /// 虚拟页区间
    pub fn range(&self) -> VpnRange {
        self.range
    }

    /// 保护与属性标志
    pub fn flags(&self) -> VmFlags {
        self.flags
    }

    /// 对象链链顶
    pub fn head(&self) -> ObjectId {
        self.head
    }

    pub(crate) fn set_head(&mut self, head: ObjectId) {
        self.head = head;
    }

    /// 区域首页的对象页偏移
    pub fn file_offset(&self) -> usize {
        self.file_offset
    }

    /// 共享映射
    pub fn is_shared(&self) -> bool {
        self.flags.contains(VmFlags::SHARED)
    }

    /// `vpn` 对应的对象页偏移
    pub fn offset_of(&self, vpn: Vpn) -> usize {
        self.file_offset + (vpn - self.range.start())
    }

    /// 是否允许该访问
    pub fn permits(&self, reason: AccessReason) -> bool {
        match reason {
            AccessReason::Read => self.flags.intersects(VmFlags::READ | VmFlags::EXEC),
            AccessReason::Write => self.flags.contains(VmFlags::WRITE),
        }
    }

    /// 是否具备 `prot` 中的全部保护位
    pub fn allows(&self, prot: VmFlags) -> bool {
        self.flags.contains(prot & VmFlags::PROT_MASK)
    }

    /// 已安装的映射
    pub fn mapped(&self) -> &BTreeMap<Vpn, Mapping> {
        &self.mapped
    }

    pub(crate) fn mapped_mut(&mut self) -> &mut BTreeMap<Vpn, Mapping> {
        &mut self.mapped
    }

    /// 从区域中挖掉 `hole`，返回保留下来的左右两部分与被挖掉部分的映射。
    ///
    /// 右半部分沿用同一个链顶，调用方需要为它补一条链接。
    pub fn carve(mut self, hole: VpnRange) -> (Option<VmArea>, Option<VmArea>, BTreeMap<Vpn, Mapping>) {
        let Some(hole) = self.range.intersection(&hole) else {
            return (Some(self), None, BTreeMap::new());
        };

        let mut removed = self.mapped.split_off(&hole.start());
        let right_mapped = removed.split_off(&hole.end());

        let right = (hole.end() < self.range.end()).then(|| VmArea {
            range: VpnRange::new(hole.end(), self.range.end()),
            flags: self.flags,
            file_offset: self.offset_of(hole.end()),
            head: self.head,
            mapped: right_mapped,
        });

        let left = (self.range.start() < hole.start()).then(|| {
            self.range = VpnRange::new(self.range.start(), hole.start());
            self
        });

        (left, right, removed)
    }
}

/// 任务地址空间：按起始页号排序、互不重叠的 VM 区域集合
#[derive(Debug, Default)]
pub struct AddressSpace {
    areas: BTreeMap<Vpn, VmArea>,
}

impl AddressSpace {
    /// 创建空地址空间
    pub fn new() -> Self {
        Self {
            areas: BTreeMap::new(),
        }
    }

    /// 插入区域；与已有区域重叠时拒绝
    pub fn insert_area(&mut self, area: VmArea) -> MmResult<()> {
        if area.range().is_empty() {
            return Err(MmError::InvalidArgument);
        }
        if self.overlapping(&area.range()).next().is_some() {
            return Err(MmError::AlreadyMapped);
        }
        self.areas.insert(area.range().start(), area);
        Ok(())
    }

    /// 查找覆盖 `vpn` 的区域
    pub fn find_area(&self, vpn: Vpn) -> Option<&VmArea> {
        self.areas
            .range(..=vpn)
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.range().contains(vpn))
    }

    /// 查找覆盖 `vpn` 的区域（可变）
    pub fn find_area_mut(&mut self, vpn: Vpn) -> Option<&mut VmArea> {
        self.areas
            .range_mut(..=vpn)
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.range().contains(vpn))
    }

    /// 与 `range` 重叠的区域
    pub fn overlapping<'a>(&'a self, range: &'a VpnRange) -> impl Iterator<Item = &'a VmArea> + 'a {
        // 起点在 range 之前的区域最多只有一个可能重叠
        let before = self
            .areas
            .range(..range.start())
            .next_back()
            .map(|(_, a)| a)
            .filter(move |a| a.range().overlaps(range));
        let inside = self
            .areas
            .range(range.start()..range.end().max(range.start()))
            .map(|(_, a)| a);
        before.into_iter().chain(inside)
    }

    /// 取出以 `start` 开头的区域
    pub fn take_area(&mut self, start: Vpn) -> Option<VmArea> {
        self.areas.remove(&start)
    }

    /// 取出全部区域
    pub fn take_all(&mut self) -> Vec<VmArea> {
        core::mem::take(&mut self.areas).into_values().collect()
    }

    /// 遍历区域
    pub fn areas(&self) -> impl Iterator<Item = &VmArea> {
        self.areas.values()
    }

    /// 遍历区域（可变）
    pub fn areas_mut(&mut self) -> impl Iterator<Item = &mut VmArea> {
        self.areas.values_mut()
    }

    /// 区域数量
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    /// 是否没有区域
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    /// 在 `[start, end)` 中查找第一段能容纳 `npages` 页的空洞
    pub fn find_free_area(&self, start: Vpn, end: Vpn, npages: usize) -> Option<VpnRange> {
        let mut current = start;
        while let Some(candidate) =
            VpnRange::checked_from_start_len(current, npages).filter(|c| c.end() <= end)
        {
            match self.overlapping(&candidate).map(|a| a.range().end()).max() {
                None => return Some(candidate),
                Some(next) => current = next,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(start: usize, end: usize) -> VmArea {
        VmArea::new(
            VpnRange::new(Vpn(start), Vpn(end)),
            VmFlags::READ | VmFlags::WRITE | VmFlags::PRIVATE,
            0,
            ObjectId(1),
        )
    }

    #[test]
    fn test_insert_rejects_overlap() {
        let mut space = AddressSpace::new();
        space.insert_area(area(10, 20)).unwrap();
        assert_eq!(space.insert_area(area(15, 25)), Err(MmError::AlreadyMapped));
        assert_eq!(space.insert_area(area(5, 11)), Err(MmError::AlreadyMapped));
        space.insert_area(area(20, 30)).unwrap();
        space.insert_area(area(0, 10)).unwrap();
        assert_eq!(space.len(), 3);
    }

    #[test]
    fn test_find_area_by_address() {
        let mut space = AddressSpace::new();
        space.insert_area(area(10, 20)).unwrap();
        space.insert_area(area(30, 40)).unwrap();
        assert_eq!(space.find_area(Vpn(10)).unwrap().range().start(), Vpn(10));
        assert_eq!(space.find_area(Vpn(19)).unwrap().range().start(), Vpn(10));
        assert!(space.find_area(Vpn(20)).is_none());
        assert!(space.find_area(Vpn(5)).is_none());
        assert_eq!(space.find_area(Vpn(35)).unwrap().range().start(), Vpn(30));
    }

    #[test]
    fn test_find_free_area_skips_holes_too_small() {
        let mut space = AddressSpace::new();
        space.insert_area(area(10, 20)).unwrap();
        space.insert_area(area(22, 30)).unwrap();
        let free = space.find_free_area(Vpn(10), Vpn(100), 4).unwrap();
        assert_eq!(free, VpnRange::new(Vpn(30), Vpn(34)));
        assert!(space.find_free_area(Vpn(10), Vpn(32), 4).is_none());
    }

    #[test]
    fn test_find_free_area_huge_request() {
        let space = AddressSpace::new();
        assert!(space.find_free_area(Vpn(10), Vpn(100), usize::MAX).is_none());
        assert!(space.find_free_area(Vpn(usize::MAX - 1), Vpn(usize::MAX), 4).is_none());
    }

    #[test]
    fn test_carve_middle() {
        let mut a = area(10, 20);
        a.mapped_mut().insert(Vpn(11), Mapping { ppn: Ppn(1), writable: true });
        a.mapped_mut().insert(Vpn(14), Mapping { ppn: Ppn(2), writable: true });
        a.mapped_mut().insert(Vpn(18), Mapping { ppn: Ppn(3), writable: false });

        let (left, right, removed) = a.carve(VpnRange::new(Vpn(13), Vpn(16)));
        let left = left.unwrap();
        let right = right.unwrap();
        assert_eq!(left.range(), VpnRange::new(Vpn(10), Vpn(13)));
        assert_eq!(right.range(), VpnRange::new(Vpn(16), Vpn(20)));
        assert_eq!(right.file_offset(), 6);
        assert_eq!(right.offset_of(Vpn(18)), 8);
        assert_eq!(left.mapped().len(), 1);
        assert_eq!(right.mapped().len(), 1);
        assert_eq!(removed.keys().copied().collect::<Vec<_>>(), [Vpn(14)]);
    }

    #[test]
    fn test_carve_whole() {
        let (left, right, _) = area(10, 20).carve(VpnRange::new(Vpn(0), Vpn(40)));
        assert!(left.is_none());
        assert!(right.is_none());
    }
}
