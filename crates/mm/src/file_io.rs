//! 经页缓存的文件读写
//!
//! 任务的打开文件表把描述符映射到文件对象与读写位置。读写与缺页共用同一份
//! 页缓存：缺页时 pager 取进来的页、`mmap` 共享映射中写入的页以及这里写入的页
//! 是同一帧，互相立即可见。写入的页被标记为脏，在对象失去最后一条链接时写回。
//!
//! 每个描述符为其对象持有一条链接，和 VM 区域一样计入对象的链接数。

use alloc::sync::Arc;
use alloc::vec;

use uapi::mm::{VmFlags, SEEK_CUR, SEEK_END, SEEK_SET};
use uapi::types::{TaskId, Vnum};

use crate::address::Ppn;
use crate::config::{MAX_FILE_SIZE, PAGE_SIZE, TASK_OFILES_MAX};
use crate::error::{MmError, MmResult};
use crate::manager::MemoryManager;
use crate::page::PageFlags;
use crate::pager::{FileKind, Pager};
use crate::vm_object::{FileObject, ObjectId};

/// 文件描述符
pub type Fd = usize;

/// 打开文件表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFile {
    /// 文件对象
    pub object: ObjectId,
    /// 读写位置（字节）
    pub cursor: usize,
}

impl MemoryManager {
    /// 打开文件对象并装入任务的 `fd` 槽位，返回文件长度
    pub fn file_open(
        &mut self,
        tid: TaskId,
        fd: Fd,
        kind: FileKind,
        vnum: Vnum,
        length: usize,
        pager: Arc<dyn Pager>,
    ) -> MmResult<usize> {
        self.fd_check_free(tid, fd)?;
        let object = self.open_file(kind, vnum, length, pager)?;
        self.fd_install(tid, fd, object)?;
        let length = self.file_object(object)?.length;
        log::debug!("file_io: task {} fd {} -> {} ({} bytes)", tid, fd, object, length);
        Ok(length)
    }

    /// 把已有的文件对象装入 `fd` 槽位，并为其增加一条链接
    pub fn fd_install(&mut self, tid: TaskId, fd: Fd, object: ObjectId) -> MmResult<()> {
        self.fd_check_free(tid, fd)?;
        self.file_object(object)?;
        self.objects.link(object)?;
        let task = self.tasks.get_mut(&tid).ok_or(MmError::NotFound)?;
        task.files.insert(fd, OpenFile { object, cursor: 0 });
        Ok(())
    }

    /// 关闭描述符；对象失去最后一条链接时写回脏页并回收
    pub fn fd_close(&mut self, tid: TaskId, fd: Fd) -> MmResult<()> {
        let task = self.tasks.get_mut(&tid).ok_or(MmError::NotFound)?;
        let file = task.files.remove(&fd).ok_or(MmError::BadFd)?;
        log::debug!("file_io: task {} closed fd {}", tid, fd);
        self.objects.unlink(&self.phys, file.object)
    }

    /// 描述符对应的打开文件及其对象
    pub fn fd_get(&self, tid: TaskId, fd: Fd) -> MmResult<(OpenFile, &FileObject)> {
        let open = *self.task(tid)?.files.get(&fd).ok_or(MmError::BadFd)?;
        Ok((open, self.file_object(open.object)?))
    }

    /// 从当前位置读取至多 `count` 字节到任务的 `buf`，返回实际读取的字节数
    pub fn file_read(&mut self, tid: TaskId, fd: Fd, buf: usize, count: usize) -> MmResult<usize> {
        let (open, file) = self.fd_get(tid, fd)?;
        let count = count.min(file.length.saturating_sub(open.cursor));
        self.validate_task_range(tid, buf, count, VmFlags::WRITE)?;

        let mut data = vec![0u8; count];
        let n = self.object_read(open.object, open.cursor, &mut data)?;
        self.write_task_memory(tid, buf, &data[..n])?;
        self.fd_advance(tid, fd, n)?;
        Ok(n)
    }

    /// 把任务 `buf` 中的 `count` 字节写到当前位置，返回写入的字节数
    pub fn file_write(&mut self, tid: TaskId, fd: Fd, buf: usize, count: usize) -> MmResult<usize> {
        let (open, _) = self.fd_get(tid, fd)?;
        self.validate_task_range(tid, buf, count, VmFlags::READ)?;

        let mut data = vec![0u8; count];
        self.read_task_memory(tid, buf, &mut data)?;
        let n = self.object_write(open.object, open.cursor, &data)?;
        self.fd_advance(tid, fd, n)?;
        Ok(n)
    }

    /// 移动读写位置，返回新位置
    pub fn file_seek(&mut self, tid: TaskId, fd: Fd, offset: usize, whence: usize) -> MmResult<usize> {
        let (open, file) = self.fd_get(tid, fd)?;
        let base = match whence {
            SEEK_SET => 0,
            SEEK_CUR => open.cursor,
            SEEK_END => file.length,
            _ => return Err(MmError::InvalidArgument),
        };
        let cursor = base
            .checked_add(offset)
            .filter(|&cursor| cursor <= MAX_FILE_SIZE)
            .ok_or(MmError::InvalidArgument)?;
        self.fd_slot(tid, fd)?.cursor = cursor;
        Ok(cursor)
    }

    /// 从文件对象的 `offset` 处读入 `buf`，读到文件末尾为止
    pub fn object_read(&mut self, id: ObjectId, offset: usize, buf: &mut [u8]) -> MmResult<usize> {
        let length = self.file_object(id)?.length;
        if offset >= length {
            return Ok(0);
        }
        let count = buf.len().min(length - offset);
        let mut done = 0;
        while done < count {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(count - done);
            let ppn = self.file_page(id, pos / PAGE_SIZE)?;
            self.phys.frames().read(ppn, in_page, &mut buf[done..done + n]);
            done += n;
        }
        Ok(count)
    }

    /// 把 `data` 写到文件对象的 `offset` 处，必要时增长文件长度
    pub fn object_write(&mut self, id: ObjectId, offset: usize, data: &[u8]) -> MmResult<usize> {
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(MmError::InvalidArgument)?;
        self.file_object(id)?;
        self.objects.grow_file(id, end)?;

        let mut done = 0;
        while done < data.len() {
            let pos = offset + done;
            let in_page = pos % PAGE_SIZE;
            let n = (PAGE_SIZE - in_page).min(data.len() - done);
            let ppn = self.file_page(id, pos / PAGE_SIZE)?;
            self.phys.frames().write(ppn, in_page, &data[done..done + n]);
            self.phys.set_flags(ppn, PageFlags::DIRTY, true)?;
            done += n;
        }
        Ok(data.len())
    }

    /// 文件对象第 `page` 页所在的帧；不在页缓存中时向 pager 取页
    fn file_page(&mut self, id: ObjectId, page: usize) -> MmResult<Ppn> {
        if let Some(ppn) = self.objects.page_lookup(id, page)? {
            return Ok(ppn);
        }
        let file = self.file_object(id)?.clone();
        let ppn = self.phys.alloc_page()?;
        if let Err(err) = file.pager().page_in(file.vnum, page, ppn, self.phys.frames()) {
            log::warn!("file_io: page_in of {:?} vnum {} page {} failed: {}", file.kind, file.vnum, page, err);
            self.phys.free_unowned(ppn)?;
            return Err(err);
        }
        if let Err(err) = self.objects.page_insert(&self.phys, id, page, ppn) {
            self.phys.free_unowned(ppn)?;
            return Err(err);
        }
        Ok(ppn)
    }

    fn file_object(&self, id: ObjectId) -> MmResult<&FileObject> {
        self.objects.get(id)?.as_file().ok_or(MmError::InvalidArgument)
    }

    fn fd_check_free(&self, tid: TaskId, fd: Fd) -> MmResult<()> {
        if fd >= TASK_OFILES_MAX {
            return Err(MmError::BadFd);
        }
        if self.task(tid)?.files.contains_key(&fd) {
            return Err(MmError::AlreadyExists);
        }
        Ok(())
    }

    fn fd_slot(&mut self, tid: TaskId, fd: Fd) -> MmResult<&mut OpenFile> {
        self.tasks
            .get_mut(&tid)
            .ok_or(MmError::NotFound)?
            .files
            .get_mut(&fd)
            .ok_or(MmError::BadFd)
    }

    fn fd_advance(&mut self, tid: TaskId, fd: Fd, n: usize) -> MmResult<()> {
        let slot = self.fd_slot(tid, fd)?;
        slot.cursor = slot.cursor.checked_add(n).ok_or(MmError::InvalidArgument)?;
        Ok(())
    }
}
