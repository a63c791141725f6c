//! 基础类型别名

/// 任务（线程组）标识
pub type TaskId = usize;

/// 容器标识
pub type ContainerId = usize;

/// 能力标识
pub type CapId = u32;

/// 文件节点号（由 VFS 分配）
pub type Vnum = u64;

/// 任务 ID 的“无效”取值
pub const TASK_ID_INVALID: TaskId = usize::MAX;
