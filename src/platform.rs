use crate::stats::{Result, StatsError};
use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};

/// Linux 上除 alpha 与 ia64 外所有架构的 CLK_TCK
pub const DEFAULT_CLOCK_TICKS: f64 = 100.0;

/// 常见的内存页大小
pub const DEFAULT_PAGE_SIZE: u64 = 4096;

/// 进程内跨越 FFI 边界的调用计数
static FOREIGN_CALLS: AtomicU64 = AtomicU64::new(0);

/// 记录一次跨 FFI 边界的调用
///
/// 宿主服务可以在自己的 FFI 调用处调用此函数，计数会出现在 `runtime` 快照中。
#[inline]
pub fn record_foreign_call() {
    FOREIGN_CALLS.fetch_add(1, Ordering::Relaxed);
}

/// 累计的 FFI 调用次数
#[inline]
pub fn foreign_calls() -> u64 {
    FOREIGN_CALLS.load(Ordering::Relaxed)
}

/// 启动时确定的平台常量
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Platform {
    /// 每秒时钟滴答数
    pub clock_ticks: f64,
    /// 内存页大小（字节）
    pub page_size: u64,
}

impl Default for Platform {
    #[inline]
    fn default() -> Self {
        Self {
            clock_ticks: DEFAULT_CLOCK_TICKS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Platform {
    /// 向操作系统查询平台常量，查询失败时使用默认值
    pub fn detect() -> Self {
        let platform = Self {
            clock_ticks: query_clock_ticks().unwrap_or_else(|e| {
                debug!("查询 CLK_TCK 失败: {e}，使用默认值 {DEFAULT_CLOCK_TICKS}");
                DEFAULT_CLOCK_TICKS
            }),
            page_size: query_page_size().unwrap_or_else(|e| {
                debug!("查询页大小失败: {e}，使用默认值 {DEFAULT_PAGE_SIZE}");
                DEFAULT_PAGE_SIZE
            }),
        };
        debug!(
            "平台常量 - CLK_TCK: {}, 页大小: {} 字节",
            platform.clock_ticks, platform.page_size
        );
        platform
    }
}

#[cfg(unix)]
fn sysconf(name: libc::c_int) -> Result<i64> {
    record_foreign_call();
    // SAFETY: sysconf 只读取配置值，没有副作用
    let value = unsafe { libc::sysconf(name) };
    if value > 0 {
        Ok(value as i64)
    } else {
        Err(StatsError::IoError(std::io::Error::last_os_error()))
    }
}

#[cfg(unix)]
pub(crate) fn query_clock_ticks() -> Result<f64> {
    sysconf(libc::_SC_CLK_TCK).map(|hz| hz as f64)
}

#[cfg(unix)]
pub(crate) fn query_page_size() -> Result<u64> {
    sysconf(libc::_SC_PAGESIZE).map(|size| size as u64)
}

#[cfg(not(unix))]
pub(crate) fn query_clock_ticks() -> Result<f64> {
    Err(StatsError::UnsupportedPlatform)
}

#[cfg(not(unix))]
pub(crate) fn query_page_size() -> Result<u64> {
    Err(StatsError::UnsupportedPlatform)
}
