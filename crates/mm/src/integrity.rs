//! 全局一致性检查
//!
//! 从任务目录（区域与打开文件）、共享内存段与对象表重新计算所有计数，逐项与记录值比对。
//! 用于测试与 pagerd 的调试命令；检查本身只读，不修改任何状态。

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::address::{PageNum, Ppn};
use crate::error::{invariant, MmResult};
use crate::manager::MemoryManager;
use crate::vm_object::{ObjectId, ObjectKind};

/// 检查结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    /// 检查过的对象数
    pub objects: usize,
    /// 检查过的驻留页数
    pub pages: usize,
    /// 检查过的映射数
    pub mappings: usize,
    /// 发现的问题
    pub violations: Vec<String>,
}

impl IntegrityReport {
    /// 没有发现问题
    pub fn is_ok(&self) -> bool {
        self.violations.is_empty()
    }
}

impl MemoryManager {
    /// 检查引用计数、链接计数、影子集合与页缓存的一致性
    pub fn check_integrity(&self) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut links: BTreeMap<ObjectId, usize> = BTreeMap::new();
        let mut map_count: BTreeMap<Ppn, usize> = BTreeMap::new();

        for seg in self.shm.segments().filter(|seg| !seg.removed) {
            *links.entry(seg.object).or_default() += 1;
            if !self.objects.contains(seg.object) {
                report
                    .violations
                    .push(format!("shm segment {} links missing {}", seg.id, seg.object));
            }
        }

        for task in self.tasks.values() {
            for (fd, file) in task.files() {
                *links.entry(file.object).or_default() += 1;
                if !self.objects.contains(file.object) {
                    report
                        .violations
                        .push(format!("task {} fd {} links missing {}", task.tid(), fd, file.object));
                }
            }
            for area in task.space.areas() {
                *links.entry(area.head()).or_default() += 1;
                if !self.objects.contains(area.head()) {
                    report
                        .violations
                        .push(format!("task {} area links missing {}", task.tid(), area.head()));
                    continue;
                }
                for (vpn, mapping) in area.mapped() {
                    report.mappings += 1;
                    *map_count.entry(mapping.ppn).or_default() += 1;
                    match self.objects.shadow_chain_lookup(area.head(), area.offset_of(*vpn)) {
                        Ok(Some((ppn, owner))) => {
                            if ppn != mapping.ppn {
                                report.violations.push(format!(
                                    "task {} vpn {:#x} maps frame {:#x} but chain holds {:#x}",
                                    task.tid(),
                                    vpn.as_usize(),
                                    mapping.ppn.as_usize(),
                                    ppn.as_usize()
                                ));
                            } else if mapping.writable && owner != area.head() {
                                report.violations.push(format!(
                                    "task {} vpn {:#x} writable below chain head",
                                    task.tid(),
                                    vpn.as_usize()
                                ));
                            }
                        }
                        _ => report.violations.push(format!(
                            "task {} vpn {:#x} maps frame {:#x} not found in its chain",
                            task.tid(),
                            vpn.as_usize(),
                            mapping.ppn.as_usize()
                        )),
                    }
                }
            }
        }

        let mut seen: BTreeSet<Ppn> = BTreeSet::new();
        for obj in self.objects.iter() {
            report.objects += 1;
            let id = obj.id();

            let expected_links = links.get(&id).copied().unwrap_or(0);
            if obj.refcount() != expected_links {
                report.violations.push(format!(
                    "{} has {} links, holders count {}",
                    id,
                    obj.refcount(),
                    expected_links
                ));
            }

            let shadowers: BTreeSet<ObjectId> = self
                .objects
                .iter()
                .filter(|o| o.shadow_of() == Some(id))
                .map(|o| o.id())
                .collect();
            if &shadowers != obj.shadowers() {
                report
                    .violations
                    .push(format!("{} shadower set disagrees with shadow_of links", id));
            }

            match (obj.kind(), obj.shadow_of()) {
                (ObjectKind::Shadow, None) => report.violations.push(format!("{} shadows nothing", id)),
                (ObjectKind::File(_), Some(_)) => {
                    report.violations.push(format!("file object {} has a lower object", id))
                }
                (_, Some(lower)) if !self.objects.contains(lower) => {
                    report.violations.push(format!("{} shadows missing {}", id, lower))
                }
                _ => {}
            }
            if obj.refcount() == 0 && obj.shadowers().is_empty() && !obj.cache().is_empty() {
                report
                    .violations
                    .push(format!("{} is unreachable but still caches pages", id));
            }

            for (&offset, &ppn) in obj.cache() {
                report.pages += 1;
                if !seen.insert(ppn) {
                    report
                        .violations
                        .push(format!("frame {:#x} cached by more than one object", ppn.as_usize()));
                }
                if !self.phys.is_allocated(ppn) {
                    report
                        .violations
                        .push(format!("frame {:#x} cached by {} but free in bitmap", ppn.as_usize(), id));
                }
                let page = match self.phys.page(ppn) {
                    Ok(page) => page,
                    Err(_) => {
                        report
                            .violations
                            .push(format!("frame {:#x} outside managed span", ppn.as_usize()));
                        continue;
                    }
                };
                if page.owner != Some(id) || page.offset != offset {
                    report.violations.push(format!(
                        "frame {:#x} descriptor says {:?}+{}, cache says {}+{}",
                        ppn.as_usize(),
                        page.owner,
                        page.offset,
                        id,
                        offset
                    ));
                }
                let expected = 1 + map_count.get(&ppn).copied().unwrap_or(0);
                if page.refcount != expected {
                    report.violations.push(format!(
                        "frame {:#x} refcount {} expected {}",
                        ppn.as_usize(),
                        page.refcount,
                        expected
                    ));
                }
            }
        }

        for (ppn, page) in self.phys.pages().snapshot() {
            if !page.is_free() && !seen.contains(&ppn) {
                report.violations.push(format!(
                    "frame {:#x} referenced ({}) but in no page cache",
                    ppn.as_usize(),
                    page.refcount
                ));
            }
        }

        for violation in &report.violations {
            log::error!("integrity: {}", violation);
        }
        report
    }

    /// 同 [`MemoryManager::check_integrity`]，发现问题时返回不变量错误
    pub fn assert_integrity(&self) -> MmResult<IntegrityReport> {
        let report = self.check_integrity();
        if report.is_ok() {
            Ok(report)
        } else {
            Err(invariant("integrity check failed"))
        }
    }
}
