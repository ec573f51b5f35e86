//! 内置 `json` 模块
//!
//! 脚本侧接口：
//! - `json.encode(value, pretty?)` → 字符串
//! - `json.decode(text)` → 值（对象解码为 `JsonObject`）
//! - `json.load(path)` → 通过文件读取钩子读取并解码
//! - `json.save(path, value)` → 编码后通过文件写入钩子保存

use std::sync::{Arc, Weak};

use crate::core::error::{BridgeError, BridgeResult};
use crate::core::registry::Registry;
use crate::dispatch::{fail, Callback, Opaque};
use crate::module::Module;
use crate::value::{from_json_str, to_json, Var};

pub const MODULE_NAME: &str = "json";

/// 脚本参数（跳过第 0 位的运行时标识）
fn arg(args: &Var, index: usize) -> Var {
    args.as_list()
        .and_then(|list| list.get(index as i64 + 1))
        .cloned()
        .unwrap_or_default()
}

fn encode(value: &Var, pretty: bool) -> BridgeResult<String> {
    let json = to_json(value)?;
    let text = if pretty {
        serde_json::to_string_pretty(&json)
    } else {
        serde_json::to_string(&json)
    };
    text.map_err(|e| BridgeError::Conversion(e.to_string()))
}

fn registry(opaque: &Opaque) -> Option<Arc<Registry>> {
    opaque.get::<Weak<Registry>>().and_then(Weak::upgrade)
}

/// 构建 `json` 模块。`weak_registry` 用于访问文件钩子。
pub fn module(weak_registry: Weak<Registry>) -> Module {
    let hooks = Opaque::new(weak_registry);
    let mut module = Module::new(MODULE_NAME);

    module.add_callback(Callback::new("encode", |args, _| {
        let pretty = arg(args, 1).as_bool();
        match encode(&arg(args, 0), pretty) {
            Ok(text) => Var::String(text),
            Err(err) => fail(err.to_string()),
        }
    }));

    module.add_callback(Callback::new("decode", |args, _| {
        let text = arg(args, 0);
        match text.try_str().and_then(from_json_str) {
            Ok(value) => value,
            Err(err) => fail(err.to_string()),
        }
    }));

    module.add_callback(
        Callback::new("load", |args, opaque| {
            let Some(registry) = registry(opaque) else {
                return fail("json.load: bridge is gone");
            };
            let path = arg(args, 0);
            let Ok(path) = path.try_str() else {
                return fail("json.load: path must be a string");
            };
            let Some(text) = registry.hooks().read_file(path) else {
                return fail(format!("json.load: cannot read {path}"));
            };
            from_json_str(&text).unwrap_or_else(|err| fail(format!("json.load: {path}: {err}")))
        })
        .with_opaque(hooks.clone()),
    );

    module.add_callback(
        Callback::new("save", |args, opaque| {
            let Some(registry) = registry(opaque) else {
                return fail("json.save: bridge is gone");
            };
            let path = arg(args, 0);
            let Ok(path) = path.try_str() else {
                return fail("json.save: path must be a string");
            };
            let saved = encode(&arg(args, 1), true)
                .and_then(|text| registry.hooks().write_file(path, &text));
            match saved {
                Ok(()) => Var::new_bool(true),
                Err(err) => fail(format!("json.save: {path}: {err}")),
            }
        })
        .with_opaque(hooks),
    );

    module
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::Runtime;
    use crate::config::BridgeConfig;
    use crate::value::VarList;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn call(registry: &Registry, name: &str, args: Vec<Var>) -> BridgeResult<Var> {
        let id = registry
            .functions()
            .lookup(MODULE_NAME, name)
            .expect("json function registered");
        let mut argv = VarList::new();
        argv.add(Runtime::Lua.as_var());
        for arg in args {
            argv.add(arg);
        }
        registry.call(id, argv)
    }

    #[test]
    fn test_encode_and_decode() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        registry.seal(module(Arc::downgrade(&registry))).unwrap();

        let list = Var::from(vec![Var::new_i64(1), Var::new_string("a"), Var::Null]);
        assert_eq!(
            call(&registry, "encode", vec![list]).unwrap(),
            Var::new_string(r#"[1,"a",null]"#)
        );
        let decoded = call(&registry, "decode", vec![Var::new_string(r#"{"n": 2}"#)]).unwrap();
        assert_eq!(decoded.as_host_object().unwrap().get_property("n"), Var::new_i64(2));
        assert!(call(&registry, "decode", vec![Var::new_string("{")]).is_err());
    }

    #[test]
    fn test_load_and_save_use_hooks() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        registry.seal(module(Arc::downgrade(&registry))).unwrap();

        let files: Arc<Mutex<HashMap<String, String>>> = Arc::default();
        let store = Arc::clone(&files);
        registry.hooks().set_writer(Arc::new(move |path: &str, text: &str| {
            store.lock().unwrap().insert(path.to_string(), text.to_string());
            Ok(())
        }));
        let source = Arc::clone(&files);
        registry
            .hooks()
            .set_reader(Arc::new(move |path: &str| source.lock().unwrap().get(path).cloned()));

        let saved = call(
            &registry,
            "save",
            vec![Var::new_string("out.json"), Var::from(vec![Var::new_i64(7)])],
        );
        assert_eq!(saved, Ok(Var::new_bool(true)));
        let loaded = call(&registry, "load", vec![Var::new_string("out.json")]).unwrap();
        assert!(loaded.equivalent(&Var::from(vec![Var::new_i64(7)])));
        assert!(call(&registry, "load", vec![Var::new_string("missing.json")]).is_err());
    }
}
