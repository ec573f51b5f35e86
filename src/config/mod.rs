/// 统一配置系统
///
/// 提供TOML/JSON配置文件、环境变量覆盖和日志初始化
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::bindings::Runtime;
use crate::impl_default;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 文件读取错误
    #[error("Config file error: {0}")]
    FileError(#[from] std::io::Error),
    /// 解析错误
    #[error("Config parse error: {0}")]
    ParseError(String),
    /// 验证错误
    #[error("Config validation error: {0}")]
    ValidationError(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 桥接主配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// 启用的运行时
    #[serde(default)]
    pub runtimes: RuntimesConfig,

    /// Lua 配置
    #[serde(default)]
    pub lua: LuaConfig,

    /// JavaScript 配置
    #[serde(default)]
    pub javascript: JavaScriptConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BridgeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从TOML文件加载配置
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_toml_str(&content)
    }

    /// 从TOML字符串解析配置
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 从JSON文件加载配置
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(ConfigError::FileError)?;
        Self::from_json_str(&content)
    }

    /// 从JSON字符串解析配置
    pub fn from_json_str(content: &str) -> ConfigResult<Self> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// 保存为TOML文件
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        fs::write(path, content).map_err(ConfigError::FileError)
    }

    /// 从环境变量覆盖配置
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// 按键名查询覆盖值，便于测试时不依赖进程环境
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }

        // 运行时开关
        if let Some(enabled) = parse(lookup("BRIDGE_LUA")) {
            self.runtimes.lua = enabled;
        }
        if let Some(enabled) = parse(lookup("BRIDGE_JAVASCRIPT")) {
            self.runtimes.javascript = enabled;
        }
        if let Some(enabled) = parse(lookup("BRIDGE_PYTHON")) {
            self.runtimes.python = enabled;
        }

        // Lua
        if let Some(limit) = parse(lookup("BRIDGE_LUA_MEMORY_LIMIT")) {
            self.lua.memory_limit = Some(limit);
        }

        // JavaScript
        if let Some(limit) = parse(lookup("BRIDGE_JS_MEMORY_LIMIT")) {
            self.javascript.memory_limit = Some(limit);
        }
        if let Some(size) = parse(lookup("BRIDGE_JS_MAX_STACK_SIZE")) {
            self.javascript.max_stack_size = Some(size);
        }

        // 日志
        if let Some(level) = lookup("BRIDGE_LOG_LEVEL").and_then(|v| LogLevel::parse(&v)) {
            self.logging.level = level;
        }
    }

    /// 验证配置
    pub fn validate(&self) -> ConfigResult<()> {
        self.lua.validate()?;
        self.javascript.validate()?;
        Ok(())
    }

    /// 运行时是否启用
    pub fn is_enabled(&self, runtime: Runtime) -> bool {
        match runtime {
            Runtime::Lua => self.runtimes.lua,
            Runtime::JavaScript => self.runtimes.javascript,
            Runtime::Python => self.runtimes.python,
            Runtime::Php => false,
        }
    }

    /// 自动查找并加载配置文件
    ///
    /// 按以下顺序查找：
    /// 1. ./bridge.toml
    /// 2. ./bridge.json
    /// 3. ~/.config/script_bridge/bridge.toml
    /// 4. 使用默认配置
    ///
    /// 找到的配置都会再应用一次环境变量覆盖。
    pub fn load_or_default() -> Self {
        let mut config = Self::find_config_file().unwrap_or_else(|| {
            tracing::debug!(target: "bridge", "Using default configuration");
            Self::default()
        });
        config.apply_env_overrides();
        config
    }

    fn find_config_file() -> Option<Self> {
        if let Ok(config) = Self::from_toml_file("bridge.toml") {
            tracing::debug!(target: "bridge", "Loaded config from bridge.toml");
            return Some(config);
        }

        if let Ok(config) = Self::from_json_file("bridge.json") {
            tracing::debug!(target: "bridge", "Loaded config from bridge.json");
            return Some(config);
        }

        let home = env::var_os("HOME")?;
        let config_path = PathBuf::from(home)
            .join(".config")
            .join("script_bridge")
            .join("bridge.toml");
        let config = Self::from_toml_file(&config_path).ok()?;
        tracing::debug!(target: "bridge", "Loaded config from {:?}", config_path);
        Some(config)
    }
}

/// 运行时开关
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimesConfig {
    pub lua: bool,
    pub javascript: bool,
    pub python: bool,
}

impl_default!(RuntimesConfig {
    lua: true,
    javascript: true,
    python: true,
});

/// Lua 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LuaConfig {
    /// 内存上限（字节），`None` 表示不限制
    pub memory_limit: Option<usize>,

    /// `require` 通过文件钩子查找模块时使用的扩展名
    pub module_extension: String,
}

impl_default!(LuaConfig {
    memory_limit: None,
    module_extension: ".lua".to_string(),
});

impl LuaConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.memory_limit == Some(0) {
            return Err(ConfigError::ValidationError(
                "lua.memory_limit must be greater than zero".to_string(),
            ));
        }
        if !self.module_extension.starts_with('.') {
            return Err(ConfigError::ValidationError(format!(
                "lua.module_extension must start with '.', got {:?}",
                self.module_extension
            )));
        }
        Ok(())
    }
}

/// JavaScript 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JavaScriptConfig {
    /// 内存上限（字节）
    pub memory_limit: Option<usize>,

    /// 最大栈大小（字节）
    pub max_stack_size: Option<usize>,
}

impl_default!(JavaScriptConfig {
    memory_limit: None,
    max_stack_size: Some(1024 * 1024),
});

impl JavaScriptConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.memory_limit == Some(0) || self.max_stack_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "javascript limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    pub level: LogLevel,

    /// 是否输出到控制台
    pub log_to_console: bool,
}

impl_default!(LoggingConfig {
    level: LogLevel::Info,
    log_to_console: true,
});

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// 跟踪
    Trace,
    /// 调试
    Debug,
    /// 信息
    Info,
    /// 警告
    Warn,
    /// 错误
    Error,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// 初始化日志
///
/// `RUST_LOG` 优先，否则使用配置的级别。重复调用无副作用。
pub fn init_logging(config: &LoggingConfig) {
    if !config.log_to_console {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.level.as_directive()));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    tracing::info!(target: "bridge", "Script bridge starting");
}
