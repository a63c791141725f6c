//! 宿主上的同步 IPC
//!
//! 每个服务任务拥有一个 [`IpcReceiver`]；调用方持有可克隆的 [`IpcSender`]，
//! `call` 发送请求后阻塞直到对方回复，语义与内核的 send/receive 一致。
//! 除固定的消息寄存器外，请求与回复还可携带一段字节负载（例如路径名）。

use std::fmt;
use std::sync::mpsc;

use uapi::ipc::Message;

/// IPC 传输错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcError {
    /// 对端已关闭
    Disconnected,
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcError::Disconnected => f.write_str("peer disconnected"),
        }
    }
}

/// 一次回复
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// 回复消息
    pub msg: Message,
    /// 附加负载
    pub payload: Vec<u8>,
}

impl From<Message> for Reply {
    fn from(msg: Message) -> Self {
        Self {
            msg,
            payload: Vec::new(),
        }
    }
}

/// 一次待处理的请求
pub struct Request {
    /// 请求消息
    pub msg: Message,
    /// 附加负载
    pub payload: Vec<u8>,
    reply_to: mpsc::Sender<Reply>,
}

impl Request {
    /// 回复请求方
    pub fn reply(self, reply: impl Into<Reply>) -> Result<(), IpcError> {
        self.reply_to.send(reply.into()).map_err(|_| IpcError::Disconnected)
    }
}

/// 同步调用端
pub trait Endpoint: Send + Sync {
    /// 发送请求并等待回复
    fn call(&self, msg: Message, payload: Vec<u8>) -> Result<Reply, IpcError>;
}

/// 服务任务的发送端
#[derive(Clone)]
pub struct IpcSender {
    tx: mpsc::Sender<Request>,
}

impl Endpoint for IpcSender {
    fn call(&self, msg: Message, payload: Vec<u8>) -> Result<Reply, IpcError> {
        let (reply_to, reply) = mpsc::channel();
        self.tx
            .send(Request {
                msg,
                payload,
                reply_to,
            })
            .map_err(|_| IpcError::Disconnected)?;
        reply.recv().map_err(|_| IpcError::Disconnected)
    }
}

/// 服务任务的接收端
pub struct IpcReceiver {
    rx: mpsc::Receiver<Request>,
}

impl IpcReceiver {
    /// 阻塞等待下一个请求；所有发送端都关闭后返回 `Disconnected`
    pub fn recv(&self) -> Result<Request, IpcError> {
        self.rx.recv().map_err(|_| IpcError::Disconnected)
    }
}

/// 创建一个服务端点
pub fn channel() -> (IpcSender, IpcReceiver) {
    let (tx, rx) = mpsc::channel();
    (IpcSender { tx }, IpcReceiver { rx })
}
