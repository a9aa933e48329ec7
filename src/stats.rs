use std::path::Path;

/// 当前进程的内核状态文件
pub const DEFAULT_STAT_PATH: &str = "/proc/self/stat";

/// 指标采集错误类型
#[derive(Debug)]
pub enum StatsError {
    IoError(std::io::Error),
    ParseError(String),
    DuplicateKey(String),
    UnsupportedPlatform,
}

impl From<std::io::Error> for StatsError {
    #[inline]
    fn from(error: std::io::Error) -> Self {
        StatsError::IoError(error)
    }
}

impl std::fmt::Display for StatsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatsError::IoError(e) => write!(f, "IO 错误: {e}"),
            StatsError::ParseError(s) => write!(f, "解析错误: {s}"),
            StatsError::DuplicateKey(k) => write!(f, "重复注册的键: {k}"),
            StatsError::UnsupportedPlatform => write!(f, "不支持的平台"),
        }
    }
}

impl std::error::Error for StatsError {}

pub type Result<T> = std::result::Result<T, StatsError>;

/// 读取状态文件的第一行
///
/// 每次调用都重新读取文件，不做任何缓存。
pub fn read_status_line(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    let line = content.lines().next().unwrap_or("").trim_end();
    if line.is_empty() {
        return Err(StatsError::ParseError(format!(
            "状态文件为空: {}",
            path.display()
        )));
    }
    Ok(line.to_string())
}

/// 一行内核状态记录，按位置切分的字段
///
/// 第 2 个字段 (comm) 被括号包围且可能含有空格，
/// 括号内的整段视为一个字段，保证后续字段的位置不发生偏移。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord<'a> {
    fields: Vec<&'a str>,
}

impl<'a> StatusRecord<'a> {
    pub fn parse(line: &'a str) -> Self {
        let mut fields = Vec::with_capacity(52);

        match comm_span(line) {
            Some((open, close)) => {
                fields.extend(line[..open].split_whitespace());
                fields.push(&line[open..=close]);
                fields.extend(line[close + 1..].split_whitespace());
            }
            None => fields.extend(line.split_whitespace()),
        }

        Self { fields }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// 按从 0 开始的位置取字段
    #[inline]
    pub fn get(&self, index: usize) -> Option<&'a str> {
        self.fields.get(index).copied()
    }

    pub fn fields(&self) -> impl Iterator<Item = (usize, &'a str)> + '_ {
        self.fields.iter().copied().enumerate()
    }
}

/// 定位被括号包围的 comm 字段
///
/// `(` 必须位于字段开头、`)` 必须位于字段结尾，否则返回 None，按空白切分。
fn comm_span(line: &str) -> Option<(usize, usize)> {
    let open = line.find('(')?;
    let close = line.rfind(')')?;
    if open >= close {
        return None;
    }

    let starts_token = line[..open]
        .chars()
        .next_back()
        .is_none_or(char::is_whitespace);
    let ends_token = line[close + 1..]
        .chars()
        .next()
        .is_none_or(char::is_whitespace);

    (starts_token && ends_token).then_some((open, close))
}
