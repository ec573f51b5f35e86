//! 核心模块
//!
//! 包含桥接的核心功能：
//! - `bridge` - 桥接入口和执行接口
//! - `registry` - 跨线程共享的函数表、模块列表和文件钩子
//! - `threads` - 线程本地解释器状态
//! - `error` - 错误类型定义

pub mod bridge;
pub mod error;
pub mod registry;
pub(crate) mod threads;
#[macro_use]
pub mod macros;

// 重新导出错误类型
pub use error::{BridgeError, BridgeResult};

// 重新导出主要类型
pub use bridge::Bridge;
pub use registry::Registry;
