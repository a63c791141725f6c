//! VM 对象模型
//!
//! VM 对象是页所有权的单位，分两种：
//!
//! - **文件对象**：带外部后备身份（匿名零页、启动镜像、VFS 文件）与 [`Pager`]
//! - **影子对象**：写时复制层，只保存相对下层已经分叉的页
//!
//! 对象存放在 [`ObjectTable`] 这个 arena 中，彼此之间用 [`ObjectId`] 引用：
//!
//! - `shadow_of`：拥有型引用，使下层对象保持存活
//! - `shadowers`、`Page::owner`：弱引用，只用于查找，从不经由它们释放对象
//! - `refcount`：指向该对象的 VM 区域链接数
//!
//! ## 链的维护
//!
//! 只有链顶对象可以被其所属任务直接写入。链接被释放时，
//! [`ObjectTable::unlink`] 会沿链向下回收无人引用的对象，
//! 并把只剩一个影子的中间影子对象合并进该影子，避免链无限增长。

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use hashbrown::HashMap;
use uapi::types::Vnum;

use crate::address::Ppn;
use crate::config::bytes_to_pages;
use crate::error::{defer_backing, finish_deferred, invariant, MmResult};
use crate::page::PageFlags;
use crate::pager::{FileKind, Pager};
use crate::phys::PhysicalMemory;

/// VM 对象标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

bitflags! {
    /// VM 对象标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObjectFlags: u32 {
        /// 可读
        const READ = 1 << 0;
        /// 位于私有链顶时可被原地写入（影子对象、匿名对象）
        const WRITE = 1 << 1;
        /// 匿名对象
        const ANONYMOUS = 1 << 2;
    }
}

/// 文件对象的后备身份
#[derive(Clone)]
pub struct FileObject {
    /// 种类
    pub kind: FileKind,
    /// 节点号
    pub vnum: Vnum,
    /// 文件长度（字节）
    pub length: usize,
    pager: Arc<dyn Pager>,
}

impl FileObject {
    /// 创建文件对象身份
    pub fn new(kind: FileKind, vnum: Vnum, length: usize, pager: Arc<dyn Pager>) -> Self {
        Self {
            kind,
            vnum,
            length,
            pager,
        }
    }

    /// 文件页数
    pub fn npages(&self) -> usize {
        bytes_to_pages(self.length)
    }

    /// 后备存储
    pub fn pager(&self) -> &Arc<dyn Pager> {
        &self.pager
    }
}

impl fmt::Debug for FileObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileObject")
            .field("kind", &self.kind)
            .field("vnum", &self.vnum)
            .field("length", &self.length)
            .finish()
    }
}

/// VM 对象的变体
#[derive(Debug, Clone)]
pub enum ObjectKind {
    /// 文件对象
    File(FileObject),
    /// 影子对象
    Shadow,
}

/// VM 对象
#[derive(Debug)]
pub struct VmObject {
    id: ObjectId,
    kind: ObjectKind,
    flags: ObjectFlags,
    refcount: usize,
    cache: BTreeMap<usize, Ppn>,
    shadow_of: Option<ObjectId>,
    shadowers: BTreeSet<ObjectId>,
}

impl VmObject {
    fn new(id: ObjectId, kind: ObjectKind, flags: ObjectFlags) -> Self {
        Self {
            id,
            kind,
            flags,
            refcount: 0,
            cache: BTreeMap::new(),
            shadow_of: None,
            shadowers: BTreeSet::new(),
        }
    }

    /// 标识
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// 变体
    pub fn kind(&self) -> &ObjectKind {
        &self.kind
    }

    /// 文件身份；影子对象返回 `None`
    pub fn as_file(&self) -> Option<&FileObject> {
        match &self.kind {
            ObjectKind::File(file) => Some(file),
            ObjectKind::Shadow => None,
        }
    }

    /// 是否为影子对象
    pub fn is_shadow(&self) -> bool {
        matches!(self.kind, ObjectKind::Shadow)
    }

    /// 标志
    pub fn flags(&self) -> ObjectFlags {
        self.flags
    }

    /// VM 区域链接数
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// 页缓存
    pub fn cache(&self) -> &BTreeMap<usize, Ppn> {
        &self.cache
    }

    /// 下层对象
    pub fn shadow_of(&self) -> Option<ObjectId> {
        self.shadow_of
    }

    /// 以本对象为下层的影子对象集合
    pub fn shadowers(&self) -> &BTreeSet<ObjectId> {
        &self.shadowers
    }

    /// 影子数（link_count）
    pub fn shadow_count(&self) -> usize {
        self.shadowers.len()
    }

    /// 是否可以安全删除
    fn is_unreferenced(&self) -> bool {
        self.refcount == 0 && self.shadowers.is_empty()
    }
}

/// 对象统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectStats {
    /// 文件对象数
    pub files: usize,
    /// 影子对象数
    pub shadows: usize,
    /// 缓存中的页数
    pub cached_pages: usize,
}

/// VM 对象 arena
pub struct ObjectTable {
    objects: HashMap<ObjectId, VmObject>,
    next_id: u32,
    files: BTreeMap<(FileKind, Vnum), ObjectId>,
}

impl ObjectTable {
    /// 创建空表
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
            files: BTreeMap::new(),
        }
    }

    /// 创建对象：引用计数、页缓存和影子链接均为空
    pub fn object_create(&mut self, kind: ObjectKind, flags: ObjectFlags) -> ObjectId {
        let id = ObjectId(self.next_id);
        self.next_id += 1;
        if let ObjectKind::File(file) = &kind {
            self.files.insert((file.kind, file.vnum), id);
        }
        log::debug!("vm_object: create {} {:?}", id, kind);
        self.objects.insert(id, VmObject::new(id, kind, flags));
        id
    }

    /// 查找已登记的文件对象
    pub fn find_file(&self, kind: FileKind, vnum: Vnum) -> Option<ObjectId> {
        self.files.get(&(kind, vnum)).copied()
    }

    /// 按 ID 取对象；ID 悬空视为不变量错误
    pub fn get(&self, id: ObjectId) -> MmResult<&VmObject> {
        self.objects.get(&id).ok_or_else(|| invariant("dangling object id"))
    }

    fn get_mut(&mut self, id: ObjectId) -> MmResult<&mut VmObject> {
        self.objects
            .get_mut(&id)
            .ok_or_else(|| invariant("dangling object id"))
    }

    /// 对象是否存在
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    /// 遍历所有对象
    pub fn iter(&self) -> impl Iterator<Item = &VmObject> {
        self.objects.values()
    }

    /// 对象数量
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// 是否没有对象
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// 更新文件长度（只增不减）
    pub fn grow_file(&mut self, id: ObjectId, length: usize) -> MmResult<()> {
        if let ObjectKind::File(file) = &mut self.get_mut(id)?.kind {
            file.length = file.length.max(length);
        }
        Ok(())
    }

    // ========================================================================
    // 页缓存
    // ========================================================================

    /// 在对象自身的页缓存中查找
    pub fn page_lookup(&self, id: ObjectId, offset: usize) -> MmResult<Option<Ppn>> {
        Ok(self.get(id)?.cache.get(&offset).copied())
    }

    /// 把帧插入对象的页缓存，并让描述符回指该对象。
    ///
    /// 偏移已被占用属于编程错误。
    pub fn page_insert(&mut self, phys: &PhysicalMemory, id: ObjectId, offset: usize, ppn: Ppn) -> MmResult<()> {
        let obj = self.get_mut(id)?;
        if obj.cache.contains_key(&offset) {
            return Err(invariant("page cache offset already occupied"));
        }
        phys.adopt(ppn, id, offset)?;
        obj.cache.insert(offset, ppn);
        Ok(())
    }

    /// 自上而下沿 `shadow_of` 查找偏移处的页，返回页及其所属对象
    pub fn shadow_chain_lookup(&self, head: ObjectId, offset: usize) -> MmResult<Option<(Ppn, ObjectId)>> {
        let mut cur = Some(head);
        let mut depth = 0;
        while let Some(id) = cur {
            let obj = self.get(id)?;
            if let Some(&ppn) = obj.cache.get(&offset) {
                return Ok(Some((ppn, id)));
            }
            depth += 1;
            if depth > self.objects.len() {
                return Err(invariant("cycle in shadow chain"));
            }
            cur = obj.shadow_of;
        }
        Ok(None)
    }

    /// 链底的文件对象
    pub fn terminal(&self, head: ObjectId) -> MmResult<ObjectId> {
        let mut id = head;
        for _ in 0..=self.objects.len() {
            let obj = self.get(id)?;
            match (obj.shadow_of, &obj.kind) {
                (None, ObjectKind::File(_)) => return Ok(id),
                (None, ObjectKind::Shadow) => return Err(invariant("shadow object without lower object")),
                (Some(lower), _) => id = lower,
            }
        }
        Err(invariant("cycle in shadow chain"))
    }

    /// 链的深度（含链顶）
    pub fn chain_depth(&self, head: ObjectId) -> MmResult<usize> {
        let mut depth = 1;
        let mut id = head;
        while let Some(lower) = self.get(id)?.shadow_of {
            depth += 1;
            if depth > self.objects.len() {
                return Err(invariant("cycle in shadow chain"));
            }
            id = lower;
        }
        Ok(depth)
    }

    // ========================================================================
    // 影子与链接
    // ========================================================================

    /// 在 `lower` 之上新建一个空的影子对象
    pub fn shadow_create(&mut self, lower: ObjectId) -> MmResult<ObjectId> {
        self.get(lower)?;
        let id = self.object_create(ObjectKind::Shadow, ObjectFlags::READ | ObjectFlags::WRITE);
        self.get_mut(id)?.shadow_of = Some(lower);
        self.get_mut(lower)?.shadowers.insert(id);
        Ok(id)
    }

    /// 新增一条 VM 区域链接
    pub fn link(&mut self, id: ObjectId) -> MmResult<()> {
        self.get_mut(id)?.refcount += 1;
        Ok(())
    }

    /// 释放一条 VM 区域链接，并回收因此失去引用的对象
    pub fn unlink(&mut self, phys: &PhysicalMemory, id: ObjectId) -> MmResult<()> {
        let obj = self.get_mut(id)?;
        if obj.refcount == 0 {
            return Err(invariant("unlinking an object with no links"));
        }
        obj.refcount -= 1;
        self.reap(phys, id)
    }

    /// 从 `id` 开始向下回收：
    ///
    /// - 无链接且无影子：释放页缓存并删除，然后检查下层对象
    /// - 无链接、恰好一个影子的影子对象：并入该影子
    ///
    /// 脏页写回失败不会中断回收；所有对象处理完之后返回第一个后备存储错误。
    fn reap(&mut self, phys: &PhysicalMemory, mut id: ObjectId) -> MmResult<()> {
        let mut pending = None;
        loop {
            let obj = self.get(id)?;
            if obj.is_unreferenced() {
                defer_backing(&mut pending, self.release_cache(phys, id))?;
                match self.object_delete(id)? {
                    Some(lower) => id = lower,
                    None => break,
                }
            } else if obj.refcount == 0 && obj.is_shadow() && obj.shadowers.len() == 1 {
                self.merge_into_shadower(phys, id)?;
                break;
            } else {
                break;
            }
        }
        finish_deferred(pending)
    }

    /// 释放对象页缓存中的全部帧。
    ///
    /// 文件对象先写回脏页、通知 pager 再回收；影子对象没有外部后备，直接回收。
    /// 写回或通知失败时帧照常回收，随后返回 [`crate::MmError::BackingStore`]。
    pub fn release_cache(&mut self, phys: &PhysicalMemory, id: ObjectId) -> MmResult<()> {
        let obj = self.get_mut(id)?;
        let cache = core::mem::take(&mut obj.cache);
        let mut pending = None;
        if let ObjectKind::File(file) = &obj.kind {
            for (&offset, &ppn) in cache.iter() {
                if !phys.page(ppn)?.flags.contains(PageFlags::DIRTY) {
                    continue;
                }
                let written = file.pager.page_out(file.vnum, offset, ppn, phys.frames());
                if let Err(err) = &written {
                    log::error!("vm_object: writeback of {} page {} failed, data lost: {}", id, offset, err);
                }
                defer_backing(&mut pending, written)?;
            }
            defer_backing(&mut pending, file.pager.release_pages(file.vnum))?;
        }
        for ppn in cache.into_values() {
            phys.release_cached(ppn)?;
        }
        finish_deferred(pending)
    }

    /// 删除对象。
    ///
    /// 前置条件：无链接、无影子、页缓存为空；任何一项不满足都是不变量错误，
    /// 因为被删除的对象仍可能被上游使用。
    /// 返回失去这个影子的下层对象，由调用方决定是否继续回收。
    pub fn object_delete(&mut self, id: ObjectId) -> MmResult<Option<ObjectId>> {
        let obj = self.get(id)?;
        if obj.refcount != 0 {
            return Err(invariant("deleting an object that is still linked"));
        }
        if !obj.shadowers.is_empty() {
            return Err(invariant("deleting an object that is still shadowed"));
        }
        if !obj.cache.is_empty() {
            return Err(invariant("deleting an object with resident pages"));
        }

        let obj = self
            .objects
            .remove(&id)
            .ok_or_else(|| invariant("dangling object id"))?;
        if let ObjectKind::File(file) = &obj.kind {
            if self.files.get(&(file.kind, file.vnum)) == Some(&id) {
                self.files.remove(&(file.kind, file.vnum));
            }
        }
        log::debug!("vm_object: delete {}", id);

        if let Some(lower) = obj.shadow_of {
            self.get_mut(lower)?.shadowers.remove(&id);
            return Ok(Some(lower));
        }
        Ok(None)
    }

    // ========================================================================
    // 链收缩
    // ========================================================================

    /// 把无链接、只剩一个影子的影子对象 `redundant` 并入该影子：
    /// 影子没有的页上移，两者都有的页以影子的版本为准，下层副本被回收。
    fn merge_into_shadower(&mut self, phys: &PhysicalMemory, redundant: ObjectId) -> MmResult<()> {
        let (upper, lower, cache) = {
            let obj = self.get_mut(redundant)?;
            let upper = obj
                .shadowers
                .pop_first()
                .ok_or_else(|| invariant("merging a shadow with no shadower"))?;
            if !obj.shadowers.is_empty() {
                return Err(invariant("merging a shadow with several shadowers"));
            }
            let lower = obj
                .shadow_of
                .take()
                .ok_or_else(|| invariant("shadow object without lower object"))?;
            (upper, lower, core::mem::take(&mut obj.cache))
        };

        let mut moved = 0;
        for (offset, ppn) in cache {
            let upper_obj = self.get_mut(upper)?;
            if upper_obj.cache.contains_key(&offset) {
                phys.release_cached(ppn)?;
            } else {
                phys.reassign(ppn, redundant, upper)?;
                upper_obj.cache.insert(offset, ppn);
                moved += 1;
            }
        }

        self.get_mut(upper)?.shadow_of = Some(lower);
        let lower_obj = self.get_mut(lower)?;
        lower_obj.shadowers.remove(&redundant);
        lower_obj.shadowers.insert(upper);

        log::debug!(
            "vm_object: merged {} into {} ({} pages moved up)",
            redundant,
            upper,
            moved
        );
        self.object_delete(redundant).map(|_| ())
    }

    /// 若 `top` 的下层影子对象中的每一页在 `top` 中都有副本，
    /// 则 `top` 可以越过它直接指向更下一层。
    ///
    /// 返回是否发生了越过。
    pub fn try_bypass(&mut self, phys: &PhysicalMemory, top: ObjectId) -> MmResult<bool> {
        let Some(lower) = self.get(top)?.shadow_of else {
            return Ok(false);
        };
        let lower_obj = self.get(lower)?;
        let Some(next) = lower_obj.shadow_of else {
            return Ok(false);
        };
        if !lower_obj.is_shadow() {
            return Ok(false);
        }
        let top_cache = &self.get(top)?.cache;
        if !lower_obj.cache.keys().all(|off| top_cache.contains_key(off)) {
            return Ok(false);
        }

        self.get_mut(top)?.shadow_of = Some(next);
        self.get_mut(next)?.shadowers.insert(top);
        self.get_mut(lower)?.shadowers.remove(&top);
        log::debug!("vm_object: {} bypasses {}", top, lower);
        self.reap(phys, lower)?;
        Ok(true)
    }

    /// 对象统计
    pub fn stats(&self) -> ObjectStats {
        let mut stats = ObjectStats::default();
        for obj in self.objects.values() {
            match obj.kind {
                ObjectKind::File(_) => stats.files += 1,
                ObjectKind::Shadow => stats.shadows += 1,
            }
            stats.cached_pages += obj.cache.len();
        }
        stats
    }

    /// 对象 ID 列表（按 ID 排序）
    pub fn ids(&self) -> Vec<ObjectId> {
        let mut ids: Vec<_> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTable")
            .field("objects", &self.objects.len())
            .field("files", &self.files.len())
            .finish()
    }
}
