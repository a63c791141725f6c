//! 页号类型
//!
//! [`Ppn`] 为物理页帧号，[`Vpn`] 为虚拟页号，二者不可混用。
//! [`PageNumRange`] 表示半开区间 `[start, end)`。

use core::fmt::Debug;
use core::ops::{Add, Sub};

use crate::config::{PAGE_SHIFT, PAGE_SIZE};

/// 页号的公共行为
pub trait PageNum: Copy + Clone + PartialEq + Eq + PartialOrd + Ord + Debug {
    /// 转换为 usize
    fn as_usize(&self) -> usize;

    /// 从 usize 构造
    fn from_usize(value: usize) -> Self;

    /// 步进到下一页
    fn step(&mut self) {
        *self = Self::from_usize(self.as_usize() + 1);
    }

    /// 向下取整：包含该字节地址的页
    fn from_addr_floor(addr: usize) -> Self {
        Self::from_usize(addr >> PAGE_SHIFT)
    }

    /// 向上取整：第一个起始地址不小于 `addr` 的页
    fn from_addr_ceil(addr: usize) -> Self {
        Self::from_usize((addr + PAGE_SIZE - 1) >> PAGE_SHIFT)
    }

    /// 向上取整；`addr` 接近地址空间顶端、结果无法表示时返回 `None`
    fn checked_from_addr_ceil(addr: usize) -> Option<Self> {
        addr.checked_add(PAGE_SIZE - 1)
            .map(|addr| Self::from_usize(addr >> PAGE_SHIFT))
    }

    /// 页起始字节地址
    fn start_addr(&self) -> usize {
        self.as_usize() << PAGE_SHIFT
    }

    /// 页结束字节地址（不含）
    fn end_addr(&self) -> usize {
        (self.as_usize() + 1) << PAGE_SHIFT
    }
}

/// 为页号类型实现 [`PageNum`] 与 usize 加减
macro_rules! impl_page_num {
    ($type:ident) => {
        impl PageNum for $type {
            fn as_usize(&self) -> usize {
                self.0
            }

            fn from_usize(value: usize) -> Self {
                Self(value)
            }
        }

        impl Add<usize> for $type {
            type Output = Self;

            fn add(self, rhs: usize) -> Self {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $type {
            type Output = Self;

            fn sub(self, rhs: usize) -> Self {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$type> for $type {
            type Output = usize;

            fn sub(self, rhs: $type) -> usize {
                self.0 - rhs.0
            }
        }
    };
}

/// 物理页帧号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Ppn(pub usize);
impl_page_num!(Ppn);

/// 虚拟页号
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Vpn(pub usize);
impl_page_num!(Vpn);

/// 页号区间 `[start, end)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageNumRange<T>
where
    T: PageNum,
{
    /// 起始页号（含）
    pub start: T,
    /// 结束页号（不含）
    pub end: T,
}

impl<T> PageNumRange<T>
where
    T: PageNum,
{
    /// 创建区间
    pub fn new(start: T, end: T) -> Self {
        Self { start, end }
    }

    /// 从起始页号与页数创建区间
    pub fn from_start_len(start: T, len: usize) -> Self {
        Self {
            start,
            end: T::from_usize(start.as_usize() + len),
        }
    }

    /// 同 [`PageNumRange::from_start_len`]，结束页号溢出时返回 `None`
    pub fn checked_from_start_len(start: T, len: usize) -> Option<Self> {
        let end = start.as_usize().checked_add(len)?;
        Some(Self {
            start,
            end: T::from_usize(end),
        })
    }

    /// 起始页号
    pub fn start(&self) -> T {
        self.start
    }

    /// 结束页号（不含）
    pub fn end(&self) -> T {
        self.end
    }

    /// 页数
    pub fn len(&self) -> usize {
        debug_assert!(self.end >= self.start);
        self.end.as_usize() - self.start.as_usize()
    }

    /// 是否为空区间
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// 是否包含某页
    pub fn contains(&self, page: T) -> bool {
        page >= self.start && page < self.end
    }

    /// 是否包含另一个区间
    pub fn contains_range(&self, other: &Self) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// 是否与另一个区间重叠；相邻区间不算重叠
    pub fn overlaps(&self, other: &Self) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    /// 两个区间的交集
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Self { start, end })
    }

    /// 升序迭代区间内的页号
    pub fn iter(&self) -> PageNumRangeIterator<T> {
        PageNumRangeIterator {
            range: *self,
            current: self.start,
        }
    }
}

impl<T> IntoIterator for PageNumRange<T>
where
    T: PageNum,
{
    type Item = T;
    type IntoIter = PageNumRangeIterator<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// 页号区间迭代器
pub struct PageNumRangeIterator<T>
where
    T: PageNum,
{
    range: PageNumRange<T>,
    current: T,
}

impl<T> Iterator for PageNumRangeIterator<T>
where
    T: PageNum,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.range.end {
            return None;
        }
        let result = self.current;
        self.current.step();
        Some(result)
    }
}

/// 物理页帧区间
pub type PpnRange = PageNumRange<Ppn>;
/// 虚拟页区间
pub type VpnRange = PageNumRange<Vpn>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_num_from_addr_floor_ceil() {
        assert_eq!(Vpn::from_addr_floor(4096), Vpn(1));
        assert_eq!(Vpn::from_addr_ceil(4096), Vpn(1));
        assert_eq!(Vpn::from_addr_floor(4097), Vpn(1));
        assert_eq!(Vpn::from_addr_ceil(4097), Vpn(2));
        assert_eq!(Vpn(1).start_addr(), 4096);
        assert_eq!(Vpn(1).end_addr(), 8192);
    }

    #[test]
    fn test_range_overlap_and_intersection() {
        let a = VpnRange::new(Vpn(10), Vpn(20));
        let b = VpnRange::new(Vpn(20), Vpn(30));
        let c = VpnRange::new(Vpn(15), Vpn(25));
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert_eq!(a.intersection(&c), Some(VpnRange::new(Vpn(15), Vpn(20))));
        assert_eq!(a.intersection(&b), None);
        assert_eq!(a.iter().count(), 10);
    }

    #[test]
    fn test_checked_constructors_reject_overflow() {
        assert_eq!(Vpn::checked_from_addr_ceil(usize::MAX), None);
        assert_eq!(Vpn::checked_from_addr_ceil(4097), Some(Vpn(2)));
        assert!(VpnRange::checked_from_start_len(Vpn(2), usize::MAX).is_none());
        assert_eq!(
            VpnRange::checked_from_start_len(Vpn(2), 3),
            Some(VpnRange::new(Vpn(2), Vpn(5)))
        );
    }
}
