//! `proc.stat`：按 proc(5) 的字段布局将 `/proc/<pid>/stat` 渲染为名称到值的对象

use crate::registry::{ObjectWriter, Renderable};
use crate::stats::{StatusRecord, read_status_line};
use log::debug;
use std::path::PathBuf;

/// 由 rss 页数换算得到的字节数字段
pub const RSS_BYTES_FIELD: &str = "rssBytes";

const RSS_FIELD: &str = "rss";

/// 字段位置到名称的映射，空字符串表示不输出
///
/// 未命名的位置为保留字段、随内核版本变化的字段或地址类字段。
/// 超出表长度的新字段直接忽略。
pub const FIELD_NAMES: [&str; 52] = [
    "pid",         // 01
    "",            // 02 comm，最多 16 字节，括号包围
    "",            // 03 state
    "ppid",        // 04
    "pgrp",        // 05
    "session",     // 06
    "tty_nr",      // 07
    "tpgid",       // 08
    "flags",       // 09
    "minflt",      // 10
    "cminflt",     // 11
    "majflt",      // 12
    "cmajflt",     // 13
    "utime",       // 14
    "stime",       // 15
    "cutime",      // 16
    "cstime",      // 17
    "priority",    // 18
    "nice",        // 19
    "num_threads", // 20
    "itrealvalue", // 21
    "starttime",   // 22
    "vsize",       // 23
    "rss",         // 24
    "",            // 25 rsslim
    "",            // 26 startcode
    "",            // 27 endcode
    "",            // 28 startstack
    "",            // 29 kstkesp
    "",            // 30 kstkeip
    "",            // 31 signal
    "",            // 32 blocked
    "",            // 33 sigignore
    "",            // 34 sigcatch
    "",            // 35 wchan
    "",            // 36 nswap
    "",            // 37 cnswap
    "",            // 38 exit_signal
    "",            // 39 processor
    "",            // 40 rt_priority
    "",            // 41 policy
    "",            // 42 delayacct_blkio_ticks
    "guest_time",  // 43
    "cguest_time", // 44
    "",            // 45 start_data
    "",            // 46 end_data
    "",            // 47 start_brk
    "",            // 48 arg_start
    "",            // 49 arg_end
    "",            // 50 env_start
    "",            // 51 env_end
    "",            // 52 exit_code
];

/// 查找位置对应的字段名，未命名或超出范围返回 None
#[inline]
pub fn field_name(index: usize) -> Option<&'static str> {
    FIELD_NAMES.get(index).copied().filter(|name| !name.is_empty())
}

#[derive(Debug, Clone)]
pub struct ProcStatProvider {
    path: PathBuf,
    page_size: u64,
}

impl ProcStatProvider {
    pub fn new(path: impl Into<PathBuf>, page_size: u64) -> Self {
        Self {
            path: path.into(),
            page_size,
        }
    }

    /// 将一条状态记录格式化为 JSON 对象文本
    pub fn render_record(&self, record: &StatusRecord<'_>) -> String {
        let mut writer = ObjectWriter::with_capacity(512);

        for (index, value) in record.fields() {
            let Some(name) = field_name(index) else {
                continue;
            };
            writer.field(name, value);

            if name == RSS_FIELD {
                // 只跳过派生字段，原始 rss 已经输出
                match value
                    .parse::<u64>()
                    .ok()
                    .and_then(|pages| pages.checked_mul(self.page_size))
                {
                    Some(bytes) => writer.field(RSS_BYTES_FIELD, bytes),
                    None => debug!("无法换算 rss 字节数: {value:?}"),
                }
            }
        }

        writer.finish()
    }
}

impl Renderable for ProcStatProvider {
    fn render(&self) -> String {
        match read_status_line(&self.path) {
            Ok(line) => self.render_record(&StatusRecord::parse(&line)),
            Err(e) => {
                debug!("读取 {} 失败: {e}", self.path.display());
                "{}".to_string()
            }
        }
    }
}
