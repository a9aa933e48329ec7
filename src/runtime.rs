//! 运行时指标
//!
//! - `runtime`：CPU 数、FFI 调用数、存活任务数与编译器版本的粗粒度快照
//! - `runtime.metrics`：启动时枚举的一组命名指标，每次渲染时在锁内整体刷新

use crate::platform::foreign_calls;
use crate::registry::{ObjectWriter, Renderable};
use log::warn;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use tokio::runtime::Handle;

pub const WORKERS_METRIC: &str = "/sched/workers:threads";
pub const ALIVE_TASKS_METRIC: &str = "/sched/tasks:alive";
pub const GLOBAL_QUEUE_METRIC: &str = "/sched/queue/global:tasks";
pub const BUSY_SECONDS_METRIC: &str = "/sched/workers/busy:seconds";
pub const PARKS_METRIC: &str = "/sched/workers/parks:total";
pub const FOREIGN_CALLS_METRIC: &str = "/process/foreign-calls:calls";

/// 编译器版本，构建脚本获取失败时为 None
pub const RUSTC_VERSION: Option<&str> = option_env!("SYSMETRICS_RUSTC_VERSION");

/// 分布类指标的值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Histogram {
    pub counts: Vec<u64>,
    pub buckets: Vec<f64>,
}

/// 单个指标的取值
#[derive(Debug, Clone, Default, PartialEq)]
pub enum MetricValue {
    /// 当前不可用
    #[default]
    Bad,
    Uint64(u64),
    Float64(f64),
    Histogram(Histogram),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescription {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub value: MetricValue,
}

/// 指标来源
///
/// `describe` 只在构造 [`RuntimeMetrics`] 时调用一次；
/// `read` 按名称批量刷新全部样本，无法识别的名称应置为 [`MetricValue::Bad`]。
pub trait MetricsSource: Send + Sync {
    fn describe(&self) -> Vec<MetricDescription>;

    fn read(&self, samples: &mut [Sample]);
}

/// `runtime.metrics`
pub struct RuntimeMetrics {
    source: Box<dyn MetricsSource>,
    descriptions: Vec<MetricDescription>,
    samples: Mutex<Vec<Sample>>,
}

impl RuntimeMetrics {
    pub fn new<S>(source: S) -> Self
    where
        S: MetricsSource + 'static,
    {
        let descriptions = source.describe();
        let samples = descriptions
            .iter()
            .map(|desc| Sample {
                name: desc.name.clone(),
                value: MetricValue::Bad,
            })
            .collect();

        Self {
            source: Box::new(source),
            descriptions,
            samples: Mutex::new(samples),
        }
    }

    /// 启动时确定的指标名称
    pub fn names(&self) -> Vec<&str> {
        self.descriptions
            .iter()
            .map(|desc| desc.name.as_str())
            .collect()
    }

    /// 启动时确定的指标说明，顺序与渲染顺序一致
    #[inline]
    pub fn descriptions(&self) -> &[MetricDescription] {
        &self.descriptions
    }

    fn lock_samples(&self) -> MutexGuard<'_, Vec<Sample>> {
        self.samples.lock().unwrap_or_else(|poisoned| {
            warn!("运行时指标锁已中毒，继续使用其中的数据");
            poisoned.into_inner()
        })
    }
}

impl Renderable for RuntimeMetrics {
    fn render(&self) -> String {
        // 刷新与格式化在同一把锁内完成，读者不会看到刷新到一半的样本
        let mut samples = self.lock_samples();
        self.source.read(&mut samples);

        let mut writer = ObjectWriter::with_capacity(48 * samples.len());
        for sample in samples.iter() {
            match sample.value {
                MetricValue::Uint64(v) => writer.field(&sample.name, v),
                MetricValue::Float64(v) if v.is_finite() => writer.field(&sample.name, v),
                _ => {}
            }
        }
        writer.finish()
    }
}

/// 从 tokio 运行时读取调度器指标
pub struct TokioMetricsSource {
    handle: Option<Handle>,
}

impl TokioMetricsSource {
    #[inline]
    pub fn new(handle: Option<Handle>) -> Self {
        Self { handle }
    }
}

impl MetricsSource for TokioMetricsSource {
    fn describe(&self) -> Vec<MetricDescription> {
        [
            (WORKERS_METRIC, "运行时工作线程数"),
            (ALIVE_TASKS_METRIC, "当前存活的任务数"),
            (GLOBAL_QUEUE_METRIC, "全局队列中等待调度的任务数"),
            (BUSY_SECONDS_METRIC, "所有工作线程累计忙碌时间"),
            (PARKS_METRIC, "所有工作线程累计休眠次数"),
            (FOREIGN_CALLS_METRIC, "累计跨 FFI 边界的调用次数"),
        ]
        .into_iter()
        .map(|(name, description)| MetricDescription {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect()
    }

    fn read(&self, samples: &mut [Sample]) {
        let metrics = self.handle.as_ref().map(Handle::metrics);

        for sample in samples.iter_mut() {
            sample.value = match (sample.name.as_str(), &metrics) {
                (FOREIGN_CALLS_METRIC, _) => MetricValue::Uint64(foreign_calls()),
                (_, None) => MetricValue::Bad,
                (WORKERS_METRIC, Some(m)) => MetricValue::Uint64(m.num_workers() as u64),
                (ALIVE_TASKS_METRIC, Some(m)) => MetricValue::Uint64(m.num_alive_tasks() as u64),
                (GLOBAL_QUEUE_METRIC, Some(m)) => {
                    MetricValue::Uint64(m.global_queue_depth() as u64)
                }
                (BUSY_SECONDS_METRIC, Some(m)) => MetricValue::Float64(
                    (0..m.num_workers())
                        .map(|worker| m.worker_total_busy_duration(worker).as_secs_f64())
                        .sum(),
                ),
                (PARKS_METRIC, Some(m)) => MetricValue::Uint64(
                    (0..m.num_workers())
                        .map(|worker| m.worker_park_count(worker))
                        .sum(),
                ),
                _ => MetricValue::Bad,
            };
        }
    }
}

/// `runtime` 快照的输出结构
#[derive(Debug, Clone, Serialize)]
struct SnapshotFields {
    #[serde(rename = "NumCPU")]
    num_cpu: usize,
    #[serde(rename = "NumCgoCall")]
    num_foreign_call: u64,
    #[serde(rename = "NumGoroutine")]
    num_task: usize,
    #[serde(rename = "Version", skip_serializing_if = "Option::is_none")]
    version: Option<&'static str>,
}

/// `runtime`
pub struct RuntimeSnapshot {
    handle: Option<Handle>,
}

impl RuntimeSnapshot {
    #[inline]
    pub fn new(handle: Option<Handle>) -> Self {
        Self { handle }
    }

    fn fields(&self) -> SnapshotFields {
        SnapshotFields {
            num_cpu: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            num_foreign_call: foreign_calls(),
            num_task: self
                .handle
                .as_ref()
                .map(|handle| handle.metrics().num_alive_tasks())
                .unwrap_or(0),
            version: RUSTC_VERSION,
        }
    }
}

impl Renderable for RuntimeSnapshot {
    fn render(&self) -> String {
        serde_json::to_string(&self.fields()).unwrap_or_else(|_| "{}".to_string())
    }
}
