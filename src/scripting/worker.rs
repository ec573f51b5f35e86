use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::bindings::{ScriptCommand, ScriptResult};
use crate::core::bridge::Bridge;
use crate::core::error::{BridgeError, BridgeResult};
use crate::value::VarList;

enum Message {
    Run(ScriptCommand),
    Shutdown,
}

/// 在专用线程上运行脚本的工作者
///
/// 线程启动时调用 `start_thread`，按顺序执行收到的命令并回传结果，
/// 关闭时调用 `stop_thread`。每条命令恰好对应一条结果。
pub struct ScriptWorker {
    /// 命令发送器
    command_sender: Sender<Message>,
    /// 结果接收器
    result_receiver: Receiver<ScriptResult>,
    /// 工作线程句柄
    worker_thread: Option<thread::JoinHandle<()>>,
}

impl ScriptWorker {
    /// 启动工作线程。解释器创建失败时返回错误。
    pub fn spawn(bridge: Bridge) -> BridgeResult<Self> {
        let (cmd_tx, cmd_rx) = unbounded::<Message>();
        let (result_tx, result_rx) = unbounded::<ScriptResult>();
        let (ready_tx, ready_rx) = unbounded::<BridgeResult<()>>();

        let worker_thread = thread::Builder::new()
            .name(format!("script-worker-{}", bridge.id()))
            .spawn(move || Self::worker_loop(bridge, cmd_rx, result_tx, ready_tx))
            .map_err(|e| BridgeError::Callback(format!("cannot spawn worker thread: {e}")))?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(BridgeError::Callback("worker thread exited during startup".to_string()))
        });
        let worker = Self {
            command_sender: cmd_tx,
            result_receiver: result_rx,
            worker_thread: Some(worker_thread),
        };
        ready.map(|()| worker)
    }

    /// 工作线程主循环
    fn worker_loop(
        bridge: Bridge,
        cmd_rx: Receiver<Message>,
        result_tx: Sender<ScriptResult>,
        ready_tx: Sender<BridgeResult<()>>,
    ) {
        let started = bridge.start_thread();
        let failed = started.is_err();
        let _ = ready_tx.send(started);
        if failed {
            bridge.stop_thread();
            return;
        }
        debug!(target: "bridge::worker", "worker started");

        // 通道关闭时退出循环
        while let Ok(Message::Run(command)) = cmd_rx.recv() {
            let result = Self::run(&bridge, command);
            if result.is_error() {
                warn!(target: "bridge::worker", ?result, "command failed");
            }
            if result_tx.send(result).is_err() {
                break;
            }
        }

        bridge.stop_thread();
        debug!(target: "bridge::worker", "worker stopped");
    }

    fn run(bridge: &Bridge, command: ScriptCommand) -> ScriptResult {
        match command {
            ScriptCommand::Execute {
                runtime,
                code,
                file_name,
            } => bridge.try_execute(runtime, &code, &file_name).into(),
            ScriptCommand::Eval { runtime, code } => bridge.eval(runtime, &code).into(),
            ScriptCommand::CallFunction {
                runtime,
                name,
                args,
            } => bridge
                .call_function(runtime, &name, VarList::from(args))
                .into(),
            ScriptCommand::ClearState { collect } => {
                bridge.clear_state(collect);
                ScriptResult::Success
            }
        }
    }

    /// 发送命令，不等待结果
    pub fn send(&self, command: ScriptCommand) -> BridgeResult<()> {
        self.command_sender
            .send(Message::Run(command))
            .map_err(|e| BridgeError::Callback(format!("Failed to send command: {e}")))
    }

    /// 发送命令并等待它的结果
    pub fn request(&self, command: ScriptCommand) -> BridgeResult<ScriptResult> {
        self.send(command)?;
        self.result_receiver
            .recv()
            .map_err(|e| BridgeError::Callback(format!("worker stopped: {e}")))
    }

    /// 获取所有已完成的结果
    pub fn poll_results(&self) -> Vec<ScriptResult> {
        self.result_receiver.try_iter().collect()
    }

    /// 关闭工作线程并等待其退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.command_sender.send(Message::Shutdown);
        if let Some(handle) = self.worker_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ScriptWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(all(test, feature = "lua"))]
mod tests {
    use super::*;
    use crate::bindings::Runtime;
    use crate::config::BridgeConfig;
    use crate::value::Var;

    #[test]
    fn test_worker_runs_commands_in_order() {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        let worker = ScriptWorker::spawn(bridge.clone()).unwrap();

        let result = worker
            .request(ScriptCommand::Execute {
                runtime: Runtime::Lua,
                code: "function add(a, b) return a + b end".to_string(),
                file_name: "add.lua".to_string(),
            })
            .unwrap();
        assert_eq!(result, ScriptResult::Success);

        let result = worker
            .request(ScriptCommand::CallFunction {
                runtime: Runtime::Lua,
                name: "add".to_string(),
                args: vec![Var::new_i64(1), Var::new_i64(2)],
            })
            .unwrap();
        assert_eq!(result, ScriptResult::Value(Var::new_i64(3)));

        // 工作线程的解释器与当前线程无关
        assert_eq!(bridge.eval(Runtime::Lua, "add"), Ok(Var::Null));
        bridge.stop_thread();
        worker.shutdown();
    }

    #[test]
    fn test_errors_are_reported_as_results() {
        let bridge = Bridge::new(BridgeConfig::default()).unwrap();
        let worker = ScriptWorker::spawn(bridge).unwrap();
        let result = worker
            .request(ScriptCommand::Eval {
                runtime: Runtime::Lua,
                code: "error('boom')".to_string(),
            })
            .unwrap();
        let ScriptResult::Error(message) = result else {
            panic!("expected an error, got {result:?}");
        };
        assert!(message.contains("boom"), "{message}");

        let result = worker
            .request(ScriptCommand::ClearState { collect: true })
            .unwrap();
        assert_eq!(result, ScriptResult::Success);
        assert!(worker.poll_results().is_empty());
        worker.shutdown();
    }
}
