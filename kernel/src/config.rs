use log::LevelFilter;

use crate::container::Limits;

/// 进程表容量
pub const NPROC: usize = 64;
/// 容器表容量，槽位 0 固定为根容器
pub const NCONTAINERS: usize = 4;
/// 最大支持的核心数量
pub const NCPU: usize = 8;
/// 每个进程的打开文件数
pub const NOFILE: usize = 16;

/// Process name length, terminator included.
pub const PROC_NAME_LEN: usize = 16;
/// Container and virtual console name length.
pub const CNAME: usize = 32;
pub const MAXPATH: usize = 128;

/// Pages every new process is expected to need (trapframe, tables, stack).
pub const PROC_OVERHEAD_PAGES: usize = 5;
/// Pages charged to a container for its first member: two for code and
/// data plus two for the stack, on top of the per-process overhead.
pub const CSTART_PAGES: usize = 9;

/// Time-base cycles between timer interrupts.
pub const TIMER_INTERVAL: u64 = 1_000_000;

/// Filesystem size in blocks.
pub const FSSIZE: usize = 2000;
pub const CDISKDEFAULT: usize = FSSIZE / 4;

pub const TOTALPAGES: usize = 32768;
pub const CMEMPGS: usize = TOTALPAGES / 4;
pub const KILOMEM: usize = 1024;

// 日志配置
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Runtime knobs handed to [`crate::Kernel::new`].
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    pub log_level: LevelFilter,
    /// Quotas of the root container.
    pub root_limits: Limits,
    /// Quotas stamped on every other container slot.
    pub container_limits: Limits,
    /// Pages reported as the physical limit to root-access callers.
    pub total_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL,
            root_limits: Limits {
                procs: NPROC,
                mem_pages: TOTALPAGES,
                disk_blocks: FSSIZE,
            },
            container_limits: Limits {
                procs: NPROC,
                mem_pages: CMEMPGS,
                disk_blocks: CDISKDEFAULT,
            },
            total_pages: TOTALPAGES,
        }
    }
}
