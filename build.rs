use std::env;
use std::process::Command;

/// 记录编译器版本，供 `runtime` 快照中的 Version 字段使用
fn main() {
    println!("cargo:rerun-if-env-changed=RUSTC");

    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string());

    // 获取失败时不设置变量，运行时 Version 字段将被省略
    if let Some(version) = version.filter(|v| !v.is_empty()) {
        println!("cargo:rustc-env=SYSMETRICS_RUSTC_VERSION={version}");
    }
}
