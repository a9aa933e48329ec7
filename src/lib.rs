//! 进程自省指标库
//!
//! 按需读取本进程的 `/proc/self/stat`、CPU 时间与 tokio 运行时计数器，
//! 以稳定的键名注册到 [`Registry`] 中，渲染为 JSON 兼容的文本。

pub mod cputime;
pub mod platform;
pub mod procstat;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod stats;

// 重新导出主要的公共类型
pub use cputime::{CpuTimeProvider, CpuTimeSample};
pub use platform::{Platform, record_foreign_call};
pub use procstat::ProcStatProvider;
pub use registry::{
    CPU_SECONDS_KEY, MetricsConfig, PROC_STAT_KEY, RUNTIME_KEY, RUNTIME_METRICS_KEY, Registry,
    Renderable,
};
pub use runtime::{MetricsSource, RuntimeMetrics, RuntimeSnapshot, TokioMetricsSource};
pub use server::{Config, StatusServer};
pub use stats::{StatsError, StatusRecord};
