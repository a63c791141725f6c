//! 页号抽象
//!
//! pager 只以页为单位操作物理帧与虚拟页，字节地址统一用 `usize` 表示。

pub mod page_num;

pub use page_num::{PageNum, PageNumRange, PageNumRangeIterator, Ppn, PpnRange, Vpn, VpnRange};
