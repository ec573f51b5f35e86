//! 桥接入口
//!
//! [`Bridge`] 是宿主代码使用的唯一句柄：注册模块、执行脚本、调用脚本函数、
//! 管理线程状态。克隆是廉价的，所有克隆共享同一个 [`Registry`]。
//!
//! ## 示例
//!
//! ```ignore
//! use script_bridge::{Bridge, BridgeConfig, Callback, Runtime, Var};
//!
//! let bridge = Bridge::new(BridgeConfig::default())?;
//! bridge.add_callback(Callback::new("answer", |_, _| Var::new_i64(42)))?;
//! assert_eq!(bridge.execute(Runtime::Lua, "assert(answer() == 42)", "main.lua"), "");
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::bindings::{Runtime, ScriptAdapter};
use crate::config::{init_logging, BridgeConfig};
use crate::core::error::{BridgeError, BridgeResult};
use crate::core::registry::Registry;
use crate::core::threads;
use crate::dispatch::Callback;
use crate::hooks::{LoadFileFn, ReadDirFn, WriteFileFn};
use crate::module::{Module, SealedModule};
use crate::scripting::json;
use crate::value::{Var, VarList};

static NEXT_BRIDGE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct BridgeShared {
    id: u64,
    registry: Arc<Registry>,
    finalized: AtomicBool,
}

/// 脚本桥接
#[derive(Debug, Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl Bridge {
    /// 创建桥接并注册内置的 `json` 模块
    pub fn new(config: BridgeConfig) -> BridgeResult<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new(config));
        registry.seal(json::module(Arc::downgrade(&registry)))?;

        let id = NEXT_BRIDGE_ID.fetch_add(1, Ordering::Relaxed);
        info!(target: "bridge", id, "bridge initialized");
        Ok(Self {
            shared: Arc::new(BridgeShared {
                id,
                registry,
                finalized: AtomicBool::new(false),
            }),
        })
    }

    /// 初始化日志后创建桥接
    pub fn initialize(config: BridgeConfig) -> BridgeResult<Self> {
        init_logging(&config.logging);
        Self::new(config)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    pub fn config(&self) -> &BridgeConfig {
        self.shared.registry.config()
    }

    pub fn is_finalized(&self) -> bool {
        self.shared.finalized.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> BridgeResult<()> {
        if self.is_finalized() {
            Err(BridgeError::Finalized)
        } else {
            Ok(())
        }
    }

    /// 在当前线程的 `runtime` 解释器上执行 `f`
    fn with_runtime<R>(
        &self,
        runtime: Runtime,
        f: impl FnOnce(&crate::bindings::Adapter) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        self.ensure_live()?;
        if !self.config().is_enabled(runtime) {
            return Err(BridgeError::RuntimeUnavailable(runtime));
        }
        threads::with_adapter(self.shared.id, &self.shared.registry, runtime, f)
    }

    // ---- 注册 ----

    /// 封装模块，之后每个线程的解释器都会安装它
    pub fn add_module(&self, module: Module) -> BridgeResult<Arc<SealedModule>> {
        self.ensure_live()?;
        self.shared.registry.seal(module)
    }

    /// 向隐式顶层模块添加变量
    pub fn add_variable(&self, name: impl Into<String>, var: Var) -> BridgeResult<()> {
        let mut module = Module::top_level();
        module.add_variable(name, var);
        self.add_module(module).map(drop)
    }

    /// 向隐式顶层模块添加函数
    pub fn add_callback(&self, callback: Callback) -> BridgeResult<()> {
        let mut module = Module::top_level();
        module.add_callback(callback);
        self.add_module(module).map(drop)
    }

    /// 向隐式顶层模块添加对象构造函数
    pub fn add_object(&self, constructor: Callback) -> BridgeResult<()> {
        let mut module = Module::top_level();
        module.add_object(constructor);
        self.add_module(module).map(drop)
    }

    // ---- 执行 ----

    /// 执行代码。成功返回空字符串，否则返回可读的错误信息。
    pub fn execute(&self, runtime: Runtime, code: &str, file_name: &str) -> String {
        match self.try_execute(runtime, code, file_name) {
            Ok(()) => String::new(),
            Err(err) => {
                debug!(target: "bridge", %runtime, file = file_name, %err, "execute failed");
                err.to_string()
            }
        }
    }

    pub fn try_execute(&self, runtime: Runtime, code: &str, file_name: &str) -> BridgeResult<()> {
        self.with_runtime(runtime, |adapter| adapter.execute(code, file_name))
    }

    pub fn eval(&self, runtime: Runtime, code: &str) -> BridgeResult<Var> {
        self.with_runtime(runtime, |adapter| adapter.eval(code))
    }

    pub fn call_function(&self, runtime: Runtime, name: &str, args: VarList) -> BridgeResult<Var> {
        self.with_runtime(runtime, |adapter| adapter.call_function(name, args))
    }

    /// 调用脚本产生的 `Function`
    pub fn var_call(&self, function: &Var, args: VarList) -> BridgeResult<Var> {
        let runtime = script_runtime(function)?;
        self.with_runtime(runtime, |adapter| adapter.var_call(function, args))
    }

    /// 调用 `Object` 或 `HostObject` 上的方法
    pub fn object_call(
        &self,
        runtime: Runtime,
        object: &Var,
        method: &str,
        args: VarList,
    ) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            self.ensure_live()?;
            return host.call_method(runtime, method, args);
        }
        let owner = script_runtime(object)?;
        self.with_runtime(owner, |adapter| adapter.object_call(object, method, args))
    }

    pub fn get_property(&self, object: &Var, name: &str) -> BridgeResult<Var> {
        if let Var::HostObject(host) = object {
            return Ok(host.get_property(name));
        }
        let runtime = script_runtime(object)?;
        self.with_runtime(runtime, |adapter| adapter.get_property(object, name))
    }

    pub fn set_property(&self, object: &Var, name: &str, value: Var) -> BridgeResult<()> {
        if let Var::HostObject(host) = object {
            host.set_property(name, value);
            return Ok(());
        }
        let runtime = script_runtime(object)?;
        self.with_runtime(runtime, |adapter| adapter.set_property(object, name, value))
    }

    // ---- 线程 ----

    /// 为当前线程创建解释器并安装所有已封装的模块
    pub fn start_thread(&self) -> BridgeResult<()> {
        self.ensure_live()?;
        threads::start_thread(self.shared.id, &self.shared.registry)
    }

    /// 销毁当前线程的解释器
    pub fn stop_thread(&self) {
        threads::stop_thread(self.shared.id);
    }

    /// 清空当前线程的缓存；`collect` 时当前线程立即回收，其他线程下次进入时回收
    pub fn clear_state(&self, collect: bool) {
        threads::clear_state(self.shared.id, &self.shared.registry, collect);
    }

    /// 当前线程已启动的运行时
    pub fn running_runtimes(&self) -> Vec<Runtime> {
        threads::running(self.shared.id)
    }

    // ---- 文件钩子 ----

    pub fn set_file_reader(&self, reader: Arc<LoadFileFn>) {
        self.shared.registry.hooks().set_reader(reader);
    }

    pub fn set_file_writer(&self, writer: Arc<WriteFileFn>) {
        self.shared.registry.hooks().set_writer(writer);
    }

    pub fn set_dir_reader(&self, dir_reader: Arc<ReadDirFn>) {
        self.shared.registry.hooks().set_dir_reader(dir_reader);
    }

    /// 结束桥接。当前线程的解释器立即销毁，之后的操作返回 [`BridgeError::Finalized`]。
    pub fn finalize(&self) {
        if self.shared.finalized.swap(true, Ordering::SeqCst) {
            return;
        }
        threads::stop_thread(self.shared.id);
        info!(target: "bridge", id = self.shared.id, "bridge finalized");
    }
}

/// The runtime that owns a script value.
fn script_runtime(var: &Var) -> BridgeResult<Runtime> {
    var.as_script_ref()
        .map(|script_ref| script_ref.runtime())
        .ok_or_else(|| BridgeError::TypeMismatch {
            expected: crate::value::VarType::Object,
            found: var.tag(),
        })
}
