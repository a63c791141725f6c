//! 内存中的 VFS 协作者
//!
//! 回答 pager 的后备存储标签。文件内容保存在堆上，页读写直接访问
//! 共享的 [`HeapFrames`]。服务线程在所有发送端关闭后退出，并把自身交回，
//! 方便调用方检查文件内容与请求计数。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mm::config::PAGE_SIZE;
use mm::{FrameMemory, Ppn};
use uapi::errno::{EINVAL, ENOENT, ENOSYS, errno_to_reg};
use uapi::ipc::{IpcTag, Message};
use uapi::types::{TaskId, Vnum};

use crate::frames::HeapFrames;
use crate::ipc::{IpcReceiver, Reply};

/// 请求计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RamFsStats {
    /// 打开
    pub opens: usize,
    /// 读页
    pub reads: usize,
    /// 写页
    pub writes: usize,
    /// 关闭
    pub closes: usize,
    /// 长度更新
    pub updates: usize,
    /// fork 通知
    pub forks: usize,
    /// 退出通知
    pub exits: usize,
}

/// 内存文件系统
pub struct RamFs {
    tid: TaskId,
    frames: Arc<HeapFrames>,
    files: BTreeMap<Vnum, Vec<u8>>,
    paths: BTreeMap<String, Vnum>,
    next_vnum: Vnum,
    stats: RamFsStats,
}

impl RamFs {
    /// 以任务 `tid` 的身份运行，页读写落在 `frames`
    pub fn new(tid: TaskId, frames: Arc<HeapFrames>) -> Self {
        Self {
            tid,
            frames,
            files: BTreeMap::new(),
            paths: BTreeMap::new(),
            next_vnum: 1,
            stats: RamFsStats::default(),
        }
    }

    /// 新建文件，返回其 vnum
    pub fn create(&mut self, path: &str, data: &[u8]) -> Vnum {
        let vnum = self.next_vnum;
        self.next_vnum += 1;
        self.files.insert(vnum, data.to_vec());
        self.paths.insert(String::from(path), vnum);
        vnum
    }

    /// 文件内容
    pub fn file(&self, vnum: Vnum) -> Option<&[u8]> {
        self.files.get(&vnum).map(Vec::as_slice)
    }

    /// 按路径查找
    pub fn lookup(&self, path: &str) -> Option<Vnum> {
        self.paths.get(path).copied()
    }

    /// 请求计数
    pub fn stats(&self) -> RamFsStats {
        self.stats
    }

    /// 在独立线程中服务 `rx`，直到所有发送端关闭
    pub fn spawn(mut self, rx: IpcReceiver) -> JoinHandle<RamFs> {
        thread::spawn(move || {
            while let Ok(req) = rx.recv() {
                let reply = self.handle(&req.msg, &req.payload);
                if req.reply(reply).is_err() {
                    log::warn!("ramfs: caller went away before reply");
                }
            }
            log::debug!("ramfs: all senders closed");
            self
        })
    }

    /// 处理一个请求
    pub fn handle(&mut self, msg: &Message, payload: &[u8]) -> Reply {
        let mr = &msg.mr;
        let result = match msg.tag {
            IpcTag::PagerOpen => self.open(mr[0] as Vnum).map(|len| [0, len, 0]),
            IpcTag::PagerOpenByPath => self.open_by_path(payload).map(|(vnum, len)| [0, vnum as usize, len]),
            IpcTag::PagerRead => self.read(mr[0] as Vnum, mr[1], mr[2], Ppn(mr[3])).map(|_| [0; 3]),
            IpcTag::PagerWrite => self.write(mr[0] as Vnum, mr[1], mr[2], Ppn(mr[3])).map(|_| [0; 3]),
            IpcTag::PagerClose => self.close(mr[0] as Vnum).map(|_| [0; 3]),
            IpcTag::PagerUpdateStats => self.update_stats(mr[0] as Vnum, mr[1]).map(|_| [0; 3]),
            IpcTag::NotifyFork => {
                self.stats.forks += 1;
                log::debug!("ramfs: task {} forked {}", mr[0], mr[1]);
                Ok([0; 3])
            }
            IpcTag::NotifyExit => {
                self.stats.exits += 1;
                log::debug!("ramfs: task {} exited with {}", mr[0], mr[1]);
                Ok([0; 3])
            }
            other => {
                log::warn!("ramfs: unsupported request {:?} from {}", other, msg.sender);
                Err(-ENOSYS)
            }
        };
        let mut reply = Message::reply(self.tid, 0);
        match result {
            Ok(regs) => {
                reply.mr[..3].copy_from_slice(&regs);
            }
            Err(errno) => reply.mr[0] = errno_to_reg(errno),
        }
        Reply::from(reply)
    }

    fn file_mut(&mut self, vnum: Vnum) -> Result<&mut Vec<u8>, isize> {
        self.files.get_mut(&vnum).ok_or(-ENOENT)
    }

    fn open(&mut self, vnum: Vnum) -> Result<usize, isize> {
        let len = self.file_mut(vnum)?.len();
        self.stats.opens += 1;
        Ok(len)
    }

    fn open_by_path(&mut self, payload: &[u8]) -> Result<(Vnum, usize), isize> {
        let path = std::str::from_utf8(payload).map_err(|_| -EINVAL)?;
        let vnum = self.lookup(path).ok_or(-ENOENT)?;
        Ok((vnum, self.open(vnum)?))
    }

    fn read(&mut self, vnum: Vnum, page_offset: usize, npages: usize, ppn: Ppn) -> Result<(), isize> {
        let frames = self.frames.clone();
        let data = self.file_mut(vnum)?;
        for i in 0..npages {
            let mut page = [0u8; PAGE_SIZE];
            let start = (page_offset + i) * PAGE_SIZE;
            if start < data.len() {
                let end = data.len().min(start + PAGE_SIZE);
                page[..end - start].copy_from_slice(&data[start..end]);
            }
            frames.write(ppn + i, 0, &page);
        }
        self.stats.reads += 1;
        Ok(())
    }

    /// 只写回文件长度以内的部分
    fn write(&mut self, vnum: Vnum, page_offset: usize, npages: usize, ppn: Ppn) -> Result<(), isize> {
        let frames = self.frames.clone();
        let data = self.file_mut(vnum)?;
        for i in 0..npages {
            let start = (page_offset + i) * PAGE_SIZE;
            if start >= data.len() {
                break;
            }
            let end = data.len().min(start + PAGE_SIZE);
            frames.read(ppn + i, 0, &mut data[start..end]);
        }
        self.stats.writes += 1;
        Ok(())
    }

    fn close(&mut self, vnum: Vnum) -> Result<(), isize> {
        self.file_mut(vnum)?;
        self.stats.closes += 1;
        Ok(())
    }

    fn update_stats(&mut self, vnum: Vnum, length: usize) -> Result<(), isize> {
        let data = self.file_mut(vnum)?;
        if length > data.len() {
            data.resize(length, 0);
        }
        self.stats.updates += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc;
    use crate::vfs::{VfsClient, VfsPager};
    use mm::{MmError, Pager};

    fn start(files: &[(&str, &[u8])]) -> (Arc<HeapFrames>, VfsClient, JoinHandle<RamFs>) {
        let frames = Arc::new(HeapFrames::new(Ppn(0x80), 8));
        let mut fs = RamFs::new(2, frames.clone());
        for (path, data) in files {
            fs.create(path, data);
        }
        let (tx, rx) = ipc::channel();
        let handle = fs.spawn(rx);
        (frames, VfsClient::new(1, Arc::new(tx)), handle)
    }

    #[test]
    fn test_open_read_write_through_client() {
        let mut data = vec![0u8; PAGE_SIZE + 100];
        data[0] = 0x11;
        data[PAGE_SIZE] = 0x22;
        let (frames, client, handle) = start(&[("/bin/sh", data.as_slice())]);

        let (vnum, len) = client.open_by_path("/bin/sh").unwrap();
        assert_eq!(len, PAGE_SIZE + 100);
        assert_eq!(client.open(vnum).unwrap(), PAGE_SIZE + 100);

        client.read(vnum, 1, 1, Ppn(0x83)).unwrap();
        let mut buf = [0xffu8; 2];
        frames.read(Ppn(0x83), 0, &mut buf);
        assert_eq!(buf, [0x22, 0]);
        frames.read(Ppn(0x83), 100, &mut buf);
        assert_eq!(buf, [0, 0]);

        frames.write(Ppn(0x84), 0, &[0x33; PAGE_SIZE]);
        client.write(vnum, 1, 1, Ppn(0x84)).unwrap();
        client.close(vnum).unwrap();
        drop(client);

        let fs = handle.join().unwrap();
        let file = fs.file(vnum).unwrap();
        assert_eq!(file.len(), PAGE_SIZE + 100);
        assert_eq!(file[PAGE_SIZE], 0x33);
        assert_eq!(file[PAGE_SIZE + 99], 0x33);
        assert_eq!(file[0], 0x11);
        let stats = fs.stats();
        assert_eq!((stats.opens, stats.reads, stats.writes, stats.closes), (2, 1, 1, 1));
    }

    #[test]
    fn test_errors_become_backing_store_errors() {
        let (_frames, client, handle) = start(&[]);
        assert_eq!(client.open(9), Err(MmError::BackingStore(-ENOENT)));
        assert_eq!(
            client.open_by_path("/missing"),
            Err(MmError::BackingStore(-ENOENT))
        );
        drop(client);
        handle.join().unwrap();
    }

    #[test]
    fn test_update_stats_grows_file() {
        let (_frames, client, handle) = start(&[("/tmp/log", &b"abc"[..])]);
        client.update_stats(1, 2 * PAGE_SIZE).unwrap();
        client.notify_fork(10, 11).unwrap();
        client.notify_exit(11, 0).unwrap();
        drop(client);
        let fs = handle.join().unwrap();
        assert_eq!(fs.file(1).unwrap().len(), 2 * PAGE_SIZE);
        assert_eq!(&fs.file(1).unwrap()[..3], b"abc");
        assert_eq!((fs.stats().forks, fs.stats().exits, fs.stats().updates), (1, 1, 1));
    }

    #[test]
    fn test_vfs_pager_page_in_and_out() {
        let (frames, client, handle) = start(&[("/data", &[7u8; 16][..])]);
        let pager = VfsPager::new(Arc::new(client));
        pager.page_in(1, 0, Ppn(0x81), frames.as_ref()).unwrap();
        assert_eq!(frames_first(&frames, Ppn(0x81)), 7);

        frames.write(Ppn(0x81), 0, &[9u8]);
        pager.page_out(1, 0, Ppn(0x81), frames.as_ref()).unwrap();
        pager.release_pages(1).unwrap();
        assert_eq!(
            pager.page_in(2, 0, Ppn(0x82), frames.as_ref()),
            Err(MmError::BackingStore(-ENOENT))
        );
        drop(pager);

        let fs = handle.join().unwrap();
        assert_eq!(fs.file(1).unwrap()[0], 9);
        assert_eq!(fs.file(1).unwrap().len(), 16);
    }

    fn frames_first(frames: &HeapFrames, ppn: Ppn) -> u8 {
        let mut buf = [0u8; 1];
        frames.read(ppn, 0, &mut buf);
        buf[0]
    }
}
