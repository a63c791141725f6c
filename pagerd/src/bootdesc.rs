//! 启动描述符
//!
//! 内核把启动镜像的位置打包成一段连续字节交给 pager，格式为小端：
//!
//! ```text
//! +----------------+------------------+
//! | desc_size: u32 | total_images: u32|
//! +----------------+------------------+
//! | name: [u8; 32] | phys_start: u64  | phys_end: u64 |   × total_images
//! +----------------+------------------+---------------+
//! ```
//!
//! `desc_size` 是整个描述符（含头部）的字节数。名称以 NUL 结尾或填满 32 字节。

use std::fmt;

/// 头部长度
pub const HEADER_SIZE: usize = 8;
/// 名称字段长度
pub const NAME_LEN: usize = 32;
/// 单条镜像记录长度
pub const RECORD_SIZE: usize = NAME_LEN + 16;

/// 描述符解析错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootDescError {
    /// 字节数不足
    Truncated,
    /// `desc_size` 与镜像数不符
    SizeMismatch {
        /// 头部声明
        declared: usize,
        /// 按镜像数计算
        expected: usize,
    },
    /// 名称为空或不是 UTF-8
    BadName(usize),
    /// 物理区间为空或倒置
    InvalidRange(usize),
}

impl fmt::Display for BootDescError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootDescError::Truncated => f.write_str("descriptor truncated"),
            BootDescError::SizeMismatch { declared, expected } => {
                write!(f, "declared size {} but {} expected", declared, expected)
            }
            BootDescError::BadName(idx) => write!(f, "image {} has a bad name", idx),
            BootDescError::InvalidRange(idx) => write!(f, "image {} has an invalid range", idx),
        }
    }
}

/// 单个启动镜像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImageDesc {
    /// 名称
    pub name: String,
    /// 起始物理地址（含）
    pub phys_start: u64,
    /// 结束物理地址（不含）
    pub phys_end: u64,
}

/// 解析后的启动描述符
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootDesc {
    /// 镜像列表
    pub images: Vec<BootImageDesc>,
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, BootDescError> {
    let raw = bytes.get(at..at + 4).ok_or(BootDescError::Truncated)?;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(raw);
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, BootDescError> {
    let raw = bytes.get(at..at + 8).ok_or(BootDescError::Truncated)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(raw);
    Ok(u64::from_le_bytes(buf))
}

impl BootDesc {
    /// 从原始字节解析
    pub fn parse(bytes: &[u8]) -> Result<Self, BootDescError> {
        let declared = read_u32(bytes, 0)? as usize;
        let total = read_u32(bytes, 4)? as usize;
        let expected = HEADER_SIZE + total * RECORD_SIZE;
        if declared != expected {
            return Err(BootDescError::SizeMismatch { declared, expected });
        }
        if bytes.len() < expected {
            return Err(BootDescError::Truncated);
        }

        let mut images = Vec::with_capacity(total);
        for idx in 0..total {
            let base = HEADER_SIZE + idx * RECORD_SIZE;
            let raw_name = &bytes[base..base + NAME_LEN];
            let len = raw_name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            let name = std::str::from_utf8(&raw_name[..len])
                .ok()
                .filter(|s| !s.is_empty())
                .ok_or(BootDescError::BadName(idx))?;
            let phys_start = read_u64(bytes, base + NAME_LEN)?;
            let phys_end = read_u64(bytes, base + NAME_LEN + 8)?;
            if phys_start >= phys_end {
                return Err(BootDescError::InvalidRange(idx));
            }
            images.push(BootImageDesc {
                name: String::from(name),
                phys_start,
                phys_end,
            });
        }
        Ok(Self { images })
    }

    /// 编码为原始字节；名称超过 32 字节时截断
    pub fn encode(&self) -> Vec<u8> {
        let size = HEADER_SIZE + self.images.len() * RECORD_SIZE;
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(&(size as u32).to_le_bytes());
        out.extend_from_slice(&(self.images.len() as u32).to_le_bytes());
        for image in &self.images {
            let mut name = [0u8; NAME_LEN];
            let raw = image.name.as_bytes();
            let len = raw.len().min(NAME_LEN);
            name[..len].copy_from_slice(&raw[..len]);
            out.extend_from_slice(&name);
            out.extend_from_slice(&image.phys_start.to_le_bytes());
            out.extend_from_slice(&image.phys_end.to_le_bytes());
        }
        out
    }
}
