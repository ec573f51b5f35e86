//! 线程本地解释器状态
//!
//! 每个线程为每个桥接实例维护自己的一组解释器。解释器在第一次使用时创建，
//! 每次进入前补装新封装的模块，并在垃圾回收纪元变化时执行一次回收。
//!
//! 线程本地表只在短借用内访问，适配器本身通过 `Rc` 取出后再调用，
//! 因此回调可以安全地重入桥接（包括 `stop_thread`）。

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use tracing::{debug, error, trace};

use crate::bindings::{Adapter, Runtime, ScriptAdapter};
use crate::core::error::BridgeResult;
use crate::core::registry::Registry;

struct AdapterSlot {
    adapter: Adapter,
    /// 已安装的模块数量
    installed: Cell<usize>,
    /// 最近一次回收时的纪元
    epoch: Cell<u64>,
}

#[derive(Default)]
struct ThreadRuntimes {
    adapters: HashMap<Runtime, Rc<AdapterSlot>>,
}

thread_local! {
    static RUNTIMES: RefCell<HashMap<u64, ThreadRuntimes>> = RefCell::new(HashMap::new());
}

/// 为当前线程启动所有启用且可用的解释器
pub(crate) fn start_thread(bridge: u64, registry: &Arc<Registry>) -> BridgeResult<()> {
    RUNTIMES.with(|runtimes| {
        runtimes.borrow_mut().entry(bridge).or_default();
    });
    for runtime in Runtime::ALL {
        if registry.config().is_enabled(runtime) && runtime.is_available() {
            with_adapter(bridge, registry, runtime, |_| Ok(()))?;
        }
    }
    debug!(target: "bridge", thread = ?thread::current().id(), "thread started");
    Ok(())
}

/// 关闭当前线程的解释器
pub(crate) fn stop_thread(bridge: u64) {
    let removed = RUNTIMES.with(|runtimes| runtimes.borrow_mut().remove(&bridge));
    if let Some(removed) = removed {
        let count = removed.adapters.len();
        // 在借用之外析构，析构函数可能再次访问线程本地表
        drop(removed);
        debug!(target: "bridge", thread = ?thread::current().id(), count, "thread stopped");
    }
}

/// 当前线程上已启动的运行时
pub(crate) fn running(bridge: u64) -> Vec<Runtime> {
    let mut running: Vec<Runtime> = RUNTIMES.with(|runtimes| {
        runtimes
            .borrow()
            .get(&bridge)
            .map(|thread| thread.adapters.keys().copied().collect())
            .unwrap_or_default()
    });
    running.sort_by_key(|runtime| *runtime as i32);
    running
}

/// 在当前线程的解释器上执行 `f`，必要时先创建解释器并同步模块
pub(crate) fn with_adapter<R>(
    bridge: u64,
    registry: &Arc<Registry>,
    runtime: Runtime,
    f: impl FnOnce(&Adapter) -> BridgeResult<R>,
) -> BridgeResult<R> {
    let slot = slot(bridge, registry, runtime)?;
    sync(&slot, registry)?;
    f(&slot.adapter)
}

fn slot(bridge: u64, registry: &Arc<Registry>, runtime: Runtime) -> BridgeResult<Rc<AdapterSlot>> {
    let existing = RUNTIMES.with(|runtimes| {
        runtimes
            .borrow()
            .get(&bridge)
            .and_then(|thread| thread.adapters.get(&runtime).cloned())
    });
    if let Some(slot) = existing {
        return Ok(slot);
    }

    let created = Rc::new(AdapterSlot {
        adapter: Adapter::new(runtime, Arc::clone(registry))?,
        installed: Cell::new(0),
        epoch: Cell::new(registry.collect_epoch()),
    });
    let slot = RUNTIMES.with(|runtimes| {
        Rc::clone(
            runtimes
                .borrow_mut()
                .entry(bridge)
                .or_default()
                .adapters
                .entry(runtime)
                .or_insert_with(|| Rc::clone(&created)),
        )
    });
    debug!(target: "bridge", %runtime, thread = ?thread::current().id(), "interpreter started");
    Ok(slot)
}

/// 安装尚未安装的模块，并响应回收请求
///
/// 安装失败的模块同样计入已安装数量，错误只报告一次，之后的调用不受影响。
fn sync(slot: &AdapterSlot, registry: &Registry) -> BridgeResult<()> {
    let mut failure = None;
    for module in registry.modules_since(slot.installed.get()) {
        slot.installed.set(slot.installed.get() + 1);
        if let Err(err) = slot.adapter.install_module(&module) {
            error!(
                target: "bridge",
                runtime = %slot.adapter.runtime(),
                module = %module.path,
                %err,
                "failed to install module"
            );
            failure.get_or_insert(err);
        }
    }
    let epoch = registry.collect_epoch();
    if slot.epoch.get() != epoch {
        slot.epoch.set(epoch);
        trace!(target: "bridge", runtime = %slot.adapter.runtime(), epoch, "scheduled collection");
        slot.adapter.collect_garbage();
    }
    failure.map_or(Ok(()), Err)
}

/// 清空当前线程解释器的缓存；`collect` 时请求所有线程回收垃圾
pub(crate) fn clear_state(bridge: u64, registry: &Registry, collect: bool) {
    let slots: Vec<Rc<AdapterSlot>> = RUNTIMES.with(|runtimes| {
        runtimes
            .borrow()
            .get(&bridge)
            .map(|thread| thread.adapters.values().cloned().collect())
            .unwrap_or_default()
    });
    for slot in &slots {
        slot.adapter.clear_caches();
    }
    if collect {
        let epoch = registry.request_collect();
        for slot in &slots {
            slot.epoch.set(epoch);
            slot.adapter.collect_garbage();
        }
    }
}
