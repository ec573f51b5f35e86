use mlua::prelude::*;
use tracing::{debug, trace};

use super::{convert, shared, LuaShared};
use crate::bindings::Runtime;
use crate::core::error::BridgeResult;
use crate::dispatch::FunctionId;
use crate::module::SealedModule;
use crate::value::VarList;

/// Install a sealed module.
///
/// Members of the top-level module become globals. Every named module, at any depth, gets a
/// `package.preload` entry under its dotted path; children are also reachable as fields of
/// their parent's table.
pub(super) fn install(lua: &Lua, shared: &LuaShared, module: &SealedModule) -> BridgeResult<()> {
    if module.is_top_level() {
        fill_members(lua, shared, &lua.globals(), module)?;
        for child in &module.children {
            preload(lua, shared, child)?;
        }
    } else {
        preload(lua, shared, module)?;
    }
    Ok(())
}

fn preload(lua: &Lua, shared: &LuaShared, module: &SealedModule) -> BridgeResult<()> {
    let table = build_table(lua, shared, module)?;
    let package: LuaTable = lua.globals().get("package")?;
    let preload: LuaTable = package.get("preload")?;
    register_tree(lua, &preload, module, table)?;
    debug!(target: "bridge::lua", module = %module.path, "module installed");
    Ok(())
}

fn register_tree(
    lua: &Lua,
    preload: &LuaTable,
    module: &SealedModule,
    table: LuaTable,
) -> BridgeResult<()> {
    for child in &module.children {
        let child_table: LuaTable = table.raw_get(child.name.as_str())?;
        register_tree(lua, preload, child, child_table)?;
    }
    let loader = lua.create_function(move |_, _: LuaMultiValue| Ok(table.clone()))?;
    preload.set(module.path.as_str(), loader)?;
    Ok(())
}

fn build_table(lua: &Lua, shared: &LuaShared, module: &SealedModule) -> BridgeResult<LuaTable> {
    let table = lua.create_table()?;
    fill_members(lua, shared, &table, module)?;
    for child in &module.children {
        table.raw_set(child.name.as_str(), build_table(lua, shared, child)?)?;
    }
    Ok(table)
}

fn fill_members(
    lua: &Lua,
    shared: &LuaShared,
    table: &LuaTable,
    module: &SealedModule,
) -> BridgeResult<()> {
    for (name, var) in &module.variables {
        table.set(name.as_str(), convert::into_lua(lua, shared, var)?)?;
    }
    for callable in module.callables() {
        table.set(callable.name.as_str(), native_function(lua, callable.id)?)?;
    }
    Ok(())
}

/// A Lua function dispatching to a registered callback.
pub(super) fn native_function(lua: &Lua, id: FunctionId) -> LuaResult<LuaFunction> {
    lua.create_function(move |lua, args: LuaMultiValue| {
        let shared = shared(lua)?;
        let mut argv = VarList::with_capacity(args.len() + 1);
        argv.add(Runtime::Lua.as_var());
        for arg in args {
            argv.add(convert::from_lua(&shared, arg)?);
        }
        let result = shared.registry.call(id, argv)?;
        Ok(convert::into_lua(lua, &shared, &result)?)
    })
}

/// Append a `package.searchers` entry that resolves `require("a.b")` through the file reader
/// hook, trying `a/b<ext>` and then `a/b/init<ext>` when the directory lists an init file.
pub(super) fn install_searcher(lua: &Lua, extension: String) -> LuaResult<()> {
    let package: LuaTable = lua.globals().get("package")?;
    let searchers: LuaTable = package.get("searchers")?;
    let searcher = lua.create_function(move |lua, name: String| {
        let shared = shared(lua)?;
        let hooks = shared.registry.hooks();
        let base = name.replace('.', "/");
        let init = format!("init{extension}");

        let mut candidates = vec![format!("{base}{extension}")];
        if hooks.read_dir(&base).iter().any(|entry| *entry == init) {
            candidates.push(format!("{base}/{init}"));
        }

        for path in candidates {
            if let Some(source) = hooks.read_file(&path) {
                trace!(target: "bridge::lua", module = %name, %path, "loading module");
                let chunk = lua.load(source).set_name(format!("@{path}")).into_function()?;
                return Ok(LuaMultiValue::from_vec(vec![
                    LuaValue::Function(chunk),
                    LuaValue::String(lua.create_string(&path)?),
                ]));
            }
        }
        let reason = format!("\n\tno file '{base}{extension}' from the file reader");
        Ok(LuaMultiValue::from_vec(vec![LuaValue::String(
            lua.create_string(&reason)?,
        )]))
    })?;
    searchers.raw_set(searchers.raw_len() + 1, searcher)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::LuaAdapter;
    use crate::bindings::protocol::ScriptAdapter;
    use crate::config::BridgeConfig;
    use crate::core::registry::Registry;
    use crate::dispatch::Callback;
    use crate::module::Module;
    use crate::value::Var;

    #[test]
    fn test_named_modules_are_required() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        let mut game = Module::new("game");
        game.add_variable("title", Var::new_string("demo"));
        let mut math = Module::new("math2");
        math.add_callback(Callback::new("double", |args, _| {
            let n = args.as_list().and_then(|l| l.get(1)).map_or(0, Var::as_i64);
            Var::new_i64(n * 2)
        }));
        game.add_module(math);
        let sealed = registry.seal(game).unwrap();

        let lua = LuaAdapter::new(registry).unwrap();
        lua.install_module(&sealed).unwrap();
        assert_eq!(lua.eval("game").unwrap(), Var::Null);
        assert_eq!(
            lua.eval("require('game').title").unwrap(),
            Var::new_string("demo")
        );
        assert_eq!(
            lua.eval("require('game.math2').double(21)").unwrap(),
            Var::new_i64(42)
        );
        assert_eq!(
            lua.eval("require('game').math2 == require('game.math2')").unwrap(),
            Var::new_bool(true)
        );
    }

    #[test]
    fn test_require_through_file_reader() {
        let registry = Arc::new(Registry::new(BridgeConfig::default()));
        registry.hooks().set_reader(Arc::new(|path: &str| match path {
            "util/strings.lua" => Some("return { shout = string.upper }".to_string()),
            "pkg/init.lua" => Some("return { name = 'pkg' }".to_string()),
            _ => None,
        }));
        registry
            .hooks()
            .set_dir_reader(Arc::new(|path: &str| match path {
                "pkg" => vec!["init.lua".to_string()],
                _ => Vec::new(),
            }));

        let lua = LuaAdapter::new(registry).unwrap();
        assert_eq!(
            lua.eval("require('util.strings').shout('hi')").unwrap(),
            Var::new_string("HI")
        );
        assert_eq!(lua.eval("require('pkg').name").unwrap(), Var::new_string("pkg"));
        assert!(lua.execute("require('missing')", "main.lua").is_err());
    }
}
