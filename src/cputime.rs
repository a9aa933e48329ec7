use crate::registry::{ObjectWriter, Renderable};
use crate::stats::{StatusRecord, read_status_line};
use log::debug;
use std::path::PathBuf;

/// utime 与 stime 均存在所需的最少字段数
pub const MIN_CPU_FIELDS: usize = 15;

const UTIME_INDEX: usize = 13;
const STIME_INDEX: usize = 14;

/// 进程 CPU 时间（秒）
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CpuTimeSample {
    pub user: f64,
    pub system: f64,
    pub total: f64,
}

impl CpuTimeSample {
    /// 渲染为 JSON 对象，整数秒不带小数部分
    pub fn to_json(&self) -> String {
        let mut writer = ObjectWriter::with_capacity(64);
        writer.field("user", self.user);
        writer.field("system", self.system);
        writer.field("total", self.total);
        writer.finish()
    }

    /// 从状态记录换算 CPU 时间，字段不足时返回 None
    pub fn from_record(record: &StatusRecord<'_>, clock_ticks: f64) -> Option<Self> {
        if record.len() < MIN_CPU_FIELDS {
            return None;
        }

        let utime = parse_ticks(record.get(UTIME_INDEX));
        let stime = parse_ticks(record.get(STIME_INDEX));

        Some(Self {
            user: utime / clock_ticks,
            system: stime / clock_ticks,
            total: (utime + stime) / clock_ticks,
        })
    }
}

/// 非数字或非有限值一律按 0 处理
#[inline]
fn parse_ticks(field: Option<&str>) -> f64 {
    field
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// `proc.cpu.seconds`：进程用户态、内核态及总 CPU 时间
#[derive(Debug, Clone)]
pub struct CpuTimeProvider {
    path: PathBuf,
    clock_ticks: f64,
}

impl CpuTimeProvider {
    pub fn new(path: impl Into<PathBuf>, clock_ticks: f64) -> Self {
        Self {
            path: path.into(),
            clock_ticks,
        }
    }

    /// 读取一次样本，任何失败都返回 None
    pub fn sample(&self) -> Option<CpuTimeSample> {
        let line = match read_status_line(&self.path) {
            Ok(line) => line,
            Err(e) => {
                debug!("读取 {} 失败: {e}", self.path.display());
                return None;
            }
        };

        let record = StatusRecord::parse(&line);
        let sample = CpuTimeSample::from_record(&record, self.clock_ticks);
        if sample.is_none() {
            debug!(
                "{} 字段数不足: {} < {MIN_CPU_FIELDS}",
                self.path.display(),
                record.len()
            );
        }
        sample
    }
}

impl Renderable for CpuTimeProvider {
    fn render(&self) -> String {
        self.sample()
            .map(|sample| sample.to_json())
            .unwrap_or_else(|| "{}".to_string())
    }
}
