//! 指标注册表
//!
//! 启动时一次性构建，之后只读。每个键对应一个可渲染的指标提供者，
//! 读取时由提供者现场采样并格式化为 JSON 兼容的文本。

use crate::cputime::CpuTimeProvider;
use crate::platform::Platform;
use crate::procstat::ProcStatProvider;
use crate::runtime::{RuntimeMetrics, RuntimeSnapshot, TokioMetricsSource};
use crate::stats::{DEFAULT_STAT_PATH, Result, StatsError};
use log::info;
use std::collections::BTreeMap;
use std::fmt::{Display, Write};
use std::path::PathBuf;
use tokio::runtime::Handle;

pub const RUNTIME_KEY: &str = "runtime";
pub const PROC_STAT_KEY: &str = "proc.stat";
pub const CPU_SECONDS_KEY: &str = "proc.cpu.seconds";
pub const RUNTIME_METRICS_KEY: &str = "runtime.metrics";

/// 按需生成文本快照的能力
pub trait Renderable: Send + Sync {
    fn render(&self) -> String;
}

impl<F> Renderable for F
where
    F: Fn() -> String + Send + Sync,
{
    #[inline]
    fn render(&self) -> String {
        self()
    }
}

/// 指标配置
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// 状态文件路径
    pub stat_path: PathBuf,
    /// 平台常量
    pub platform: Platform,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            stat_path: PathBuf::from(DEFAULT_STAT_PATH),
            platform: Platform::detect(),
        }
    }
}

/// 键到指标提供者的映射，键按字典序排列
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<String, Box<dyn Renderable>>,
}

impl Registry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置提供者
    ///
    /// 若当前处于 tokio 运行时中，运行时相关指标读取该运行时；否则这些指标被省略。
    pub fn with_defaults(config: &MetricsConfig) -> Result<Self> {
        let handle = Handle::try_current().ok();
        if handle.is_none() {
            info!("未检测到 tokio 运行时，运行时指标将为空");
        }

        let mut registry = Self::new();
        registry.publish(RUNTIME_KEY, RuntimeSnapshot::new(handle.clone()))?;
        registry.publish(
            PROC_STAT_KEY,
            ProcStatProvider::new(config.stat_path.clone(), config.platform.page_size),
        )?;
        registry.publish(
            CPU_SECONDS_KEY,
            CpuTimeProvider::new(config.stat_path.clone(), config.platform.clock_ticks),
        )?;
        registry.publish(
            RUNTIME_METRICS_KEY,
            RuntimeMetrics::new(TokioMetricsSource::new(handle)),
        )?;

        info!("已注册 {} 个指标键: {:?}", registry.len(), registry.keys());
        Ok(registry)
    }

    /// 注册一个提供者，键已存在时返回错误
    pub fn publish<R>(&mut self, key: impl Into<String>, provider: R) -> Result<()>
    where
        R: Renderable + 'static,
    {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return Err(StatsError::DuplicateKey(key));
        }
        self.entries.insert(key, Box::new(provider));
        Ok(())
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&dyn Renderable> {
        self.entries.get(key).map(|provider| provider.as_ref())
    }

    #[inline]
    pub fn render(&self, key: &str) -> Option<String> {
        self.get(key).map(|provider| provider.render())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 渲染全部键，生成一个完整的 JSON 对象
    pub fn render_all(&self) -> String {
        let mut out = String::with_capacity(4096);
        out.push_str("{\n");
        for (i, (key, provider)) in self.entries.iter().enumerate() {
            if i > 0 {
                out.push_str(",\n");
            }
            let _ = write!(out, "{}: {}", quote(key), provider.render());
        }
        out.push_str("\n}");
        out
    }
}

/// 按 JSON 规则给名称加引号并转义
#[inline]
pub(crate) fn quote(name: &str) -> String {
    serde_json::Value::from(name).to_string()
}

/// 逐字段拼接 JSON 对象，字段之间以 ",\n" 分隔，结尾不留分隔符
pub(crate) struct ObjectWriter {
    buf: String,
    empty: bool,
}

impl ObjectWriter {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let mut buf = String::with_capacity(capacity);
        buf.push('{');
        Self { buf, empty: true }
    }

    /// 写入一个字段，值按 Display 原样输出
    pub(crate) fn field(&mut self, name: &str, value: impl Display) {
        if !self.empty {
            self.buf.push_str(",\n");
        }
        self.empty = false;
        let _ = write!(self.buf, "{}: {value}", quote(name));
    }

    pub(crate) fn finish(mut self) -> String {
        self.buf.push('}');
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn fixture_config(line: &str) -> (tempfile::NamedTempFile, MetricsConfig) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{line}").unwrap();
        let config = MetricsConfig {
            stat_path: file.path().to_path_buf(),
            platform: Platform::default(),
        };
        (file, config)
    }

    #[test]
    fn test_object_writer_empty() {
        assert_eq!(ObjectWriter::with_capacity(8).finish(), "{}");
    }

    #[test]
    fn test_object_writer_no_trailing_separator() {
        let mut writer = ObjectWriter::with_capacity(64);
        writer.field("a", 1);
        writer.field("b", "2");
        let text = writer.finish();
        assert_eq!(text, "{\"a\": 1,\n\"b\": 2}");
        assert!(!text.contains(",}"));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("plain"), "\"plain\"");
        assert_eq!(quote("a\"b"), "\"a\\\"b\"");
    }

    #[test]
    fn test_publish_and_render() {
        let mut registry = Registry::new();
        assert!(registry.is_empty());
        registry.publish("answer", || "42".to_string()).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.render("answer").as_deref(), Some("42"));
        assert!(registry.render("missing").is_none());
    }

    #[test]
    fn test_publish_duplicate_key() {
        let mut registry = Registry::new();
        registry.publish("k", || "1".to_string()).unwrap();
        let result = registry.publish("k", || "2".to_string());
        assert!(matches!(result, Err(StatsError::DuplicateKey(ref k)) if k == "k"));
        // 原有条目保持不变
        assert_eq!(registry.render("k").as_deref(), Some("1"));
    }

    #[test]
    fn test_render_all_sorted_and_valid_json() {
        let mut registry = Registry::new();
        registry.publish("zeta", || "{}".to_string()).unwrap();
        registry.publish("alpha", || "[1, 2]".to_string()).unwrap();

        let text = registry.render_all();
        assert_eq!(text, "{\n\"alpha\": [1, 2],\n\"zeta\": {}\n}");
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.get("alpha").is_some());
    }

    #[test]
    fn test_render_all_empty_registry() {
        let text = Registry::new().render_all();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(value.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_with_defaults_registers_all_keys() {
        let (_file, config) = fixture_config("1 (a) S 0 0 0 0 0 0 0 0 0 0 200 50");
        let registry = Registry::with_defaults(&config).unwrap();

        assert_eq!(
            registry.keys(),
            vec![
                CPU_SECONDS_KEY,
                PROC_STAT_KEY,
                RUNTIME_KEY,
                RUNTIME_METRICS_KEY
            ]
        );
        // 同一个键多次查找始终可用
        for _ in 0..3 {
            for key in [RUNTIME_KEY, PROC_STAT_KEY, CPU_SECONDS_KEY, RUNTIME_METRICS_KEY] {
                assert!(registry.get(key).is_some(), "键 {key} 应该存在");
            }
        }
    }

    #[test]
    fn test_with_defaults_render_all_is_valid_json() {
        let (_file, config) = fixture_config("1 (a) S 0 0 0 0 0 0 0 0 0 0 200 50");
        let registry = Registry::with_defaults(&config).unwrap();

        let value: serde_json::Value = serde_json::from_str(&registry.render_all()).unwrap();
        assert_eq!(value[CPU_SECONDS_KEY]["user"].as_f64(), Some(2.0));
        assert_eq!(value[PROC_STAT_KEY]["pid"].as_u64(), Some(1));
        assert!(value[RUNTIME_KEY]["NumCPU"].as_u64().unwrap() >= 1);
        // 没有运行时，运行时指标中只剩 FFI 计数
        let metrics = value[RUNTIME_METRICS_KEY].as_object().unwrap();
        assert_eq!(metrics.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_with_defaults_inside_runtime() {
        let (_file, config) = fixture_config("1 (a) S 0 0 0 0 0 0 0 0 0 0 200 50");
        let registry = Registry::with_defaults(&config).unwrap();

        let text = registry.render(RUNTIME_METRICS_KEY).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["/sched/workers:threads"].as_u64(), Some(2));
    }

    #[test]
    fn test_render_is_idempotent_for_unchanged_file() {
        let (_file, config) = fixture_config("7 (a) S 0 0 0 0 0 0 0 0 0 0 120 30 0 0 0 0 1 0 0 0 12");
        let registry = Registry::with_defaults(&config).unwrap();

        for key in [PROC_STAT_KEY, CPU_SECONDS_KEY] {
            assert_eq!(registry.render(key), registry.render(key));
        }
    }
}
