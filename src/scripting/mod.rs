//! 脚本辅助模块
//!
//! - `json` - 每个桥接自动注册的 `json` 模块
//! - `worker` - 在专用线程上驱动解释器的 [`ScriptWorker`]

pub mod json;
pub mod worker;

pub use worker::ScriptWorker;
