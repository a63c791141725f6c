//! 启动流程
//!
//! 1. 经 `capability_control(NCAPS / READ)` 读出内核下发的能力；
//! 2. 找到物理内存能力，以其区间建立帧分配器；
//! 3. 用读出的能力初始化 pager 侧的注册表；
//! 4. 解析启动描述符，保留每个镜像所在的帧并登记一个启动文件对象。
//!
//! 任何一步失败都意味着 pager 无法安全运行，直接返回错误。

use std::sync::Arc;

use cap::{CapControl, CapReply, Capability, CapabilityRegistry, ResourceType};
use mm::{FrameMemory, KernelOps, MemoryManager, MmParams, PageNum, Ppn, PpnRange};

use crate::bootdesc::BootDesc;
use crate::config::PagerConfig;
use crate::error::{PagerError, PagerResult};

/// 启动所需的外部资源
pub struct BootParams<'a> {
    /// 运行配置
    pub config: &'a PagerConfig,
    /// 内核接口
    pub kernel: Arc<dyn KernelOps>,
    /// 帧内容访问
    pub frames: Arc<dyn FrameMemory>,
    /// 打包的启动描述符
    pub bootdesc: &'a [u8],
}

/// 读出 pager 可见的全部能力
fn read_capabilities(kernel: &dyn KernelOps, pager: usize) -> PagerResult<Vec<Capability>> {
    let ncaps = match kernel.capability_control(pager, CapControl::Ncaps)? {
        CapReply::Count(n) => n,
        other => return Err(PagerError::Boot(format!("unexpected NCAPS reply {:?}", other))),
    };
    let caps = match kernel.capability_control(pager, CapControl::Read)? {
        CapReply::Caps(caps) => caps,
        other => return Err(PagerError::Boot(format!("unexpected READ reply {:?}", other))),
    };
    if caps.len() != ncaps {
        log::warn!("init: kernel reported {} capabilities but returned {}", ncaps, caps.len());
    }
    Ok(caps)
}

/// 完成启动，返回内存管理上下文
pub fn boot(params: BootParams<'_>) -> PagerResult<MemoryManager> {
    let config = params.config;
    let caps = read_capabilities(params.kernel.as_ref(), config.pager_tid)?;
    log::info!("init: {} capabilities from kernel", caps.len());

    let physmem = caps
        .iter()
        .find(|c| c.rtype == ResourceType::Physmem && c.resid == config.container && c.is_range())
        .ok_or_else(|| PagerError::Boot(String::from("no physical memory capability")))?;
    let span = PpnRange::new(Ppn(physmem.start), Ppn(physmem.end));

    let registry = CapabilityRegistry::from_inventory(config.container, caps.iter().cloned())?;
    let mut mm = MemoryManager::new(MmParams {
        pager_tid: config.pager_tid,
        container: config.container,
        span,
        frames: params.frames,
        kernel: params.kernel,
        caps: registry.into_shared(),
    });

    let desc = BootDesc::parse(params.bootdesc)?;
    for image in &desc.images {
        if mm.boot_images().iter().any(|b| b.name == image.name) {
            return Err(PagerError::Boot(format!("duplicate boot image '{}'", image.name)));
        }
        let range = PpnRange::new(
            Ppn::from_addr_floor(image.phys_start as usize),
            Ppn::from_addr_ceil(image.phys_end as usize),
        );
        mm.register_boot_image(&image.name, range)?;
        mm.open_boot_file(&image.name)?;
    }

    let stats = mm.stats();
    log::info!(
        "init: {} boot images, {}/{} frames free",
        desc.images.len(),
        stats.frames.free,
        stats.frames.total
    );
    Ok(mm)
}
