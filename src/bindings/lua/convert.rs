use mlua::prelude::*;

use super::{object, LuaShared};
use crate::core::error::{BridgeError, BridgeResult};
use crate::value::{u64_to_i64, Var, VarList};

/// Nesting limit for list conversion; also stops self-referencing tables.
const MAX_DEPTH: usize = 64;

pub(super) fn into_lua(lua: &Lua, shared: &LuaShared, var: &Var) -> BridgeResult<LuaValue> {
    into_lua_at(lua, shared, var, 0)
}

pub(super) fn into_lua_multi(
    lua: &Lua,
    shared: &LuaShared,
    args: VarList,
) -> BridgeResult<LuaMultiValue> {
    args.iter()
        .map(|arg| into_lua(lua, shared, arg))
        .collect::<BridgeResult<Vec<_>>>()
        .map(LuaMultiValue::from_vec)
}

fn into_lua_at(lua: &Lua, shared: &LuaShared, var: &Var, depth: usize) -> BridgeResult<LuaValue> {
    Ok(match var {
        Var::Int64(i) => LuaValue::Integer(*i),
        Var::UInt64(u) => LuaValue::Integer(u64_to_i64(*u)?),
        Var::Float64(f) => LuaValue::Number(*f),
        Var::Bool(b) => LuaValue::Boolean(*b),
        Var::Null => LuaValue::Nil,
        Var::String(s) => LuaValue::String(lua.create_string(s)?),
        Var::List(list) => {
            if depth >= MAX_DEPTH {
                return Err(BridgeError::Conversion(format!(
                    "lists nested deeper than {MAX_DEPTH} levels"
                )));
            }
            let table = lua.create_table()?;
            for (index, item) in list.iter().enumerate() {
                table.raw_set(index + 1, into_lua_at(lua, shared, item, depth + 1)?)?;
            }
            table.set_metatable(Some(shared.list_meta.clone()));
            LuaValue::Table(table)
        }
        Var::HostObject(host) => object::wrap(lua, shared, host)?,
        Var::Object(script_ref) | Var::Function(script_ref) => {
            let key = shared.keys.resolve(script_ref)?;
            match shared.refs.raw_get::<LuaValue>(key)? {
                LuaValue::Nil => return Err(BridgeError::NotFound(format!("{script_ref:?}"))),
                value => value,
            }
        }
    })
}

pub(super) fn from_lua(shared: &LuaShared, value: LuaValue) -> BridgeResult<Var> {
    from_lua_at(shared, value, 0)
}

fn from_lua_at(shared: &LuaShared, value: LuaValue, depth: usize) -> BridgeResult<Var> {
    Ok(match value {
        LuaValue::Nil => Var::Null,
        LuaValue::Boolean(b) => Var::Bool(b),
        LuaValue::Integer(i) => Var::Int64(i),
        LuaValue::Number(n) => Var::Float64(n),
        LuaValue::String(s) => Var::String(String::from_utf8_lossy(&s.as_bytes()).into_owned()),
        LuaValue::Table(table) => {
            if is_list(shared, &table)? {
                if depth >= MAX_DEPTH {
                    return Err(BridgeError::Conversion(format!(
                        "tables nested deeper than {MAX_DEPTH} levels"
                    )));
                }
                let mut list = VarList::with_capacity(table.raw_len());
                for item in table.clone().sequence_values::<LuaValue>() {
                    list.add(from_lua_at(shared, item?, depth + 1)?);
                }
                Var::List(list)
            } else {
                Var::Object(park(shared, LuaValue::Table(table))?)
            }
        }
        LuaValue::Function(function) => Var::Function(park(shared, LuaValue::Function(function))?),
        LuaValue::UserData(userdata) => match object::unwrap(&userdata) {
            Some(host) => Var::HostObject(host),
            None => Var::Object(park(shared, LuaValue::UserData(userdata))?),
        },
        other => {
            return Err(BridgeError::Conversion(format!(
                "a Lua {} cannot cross the bridge",
                other.type_name()
            )))
        }
    })
}

/// Store a value in the reference table and return its reference.
fn park(shared: &LuaShared, value: LuaValue) -> BridgeResult<crate::value::ScriptRef> {
    let key = shared.keys.next_key();
    shared.refs.raw_set(key, value)?;
    Ok(shared.keys.make_ref(key))
}

/// Tables created from a `List` carry the list metatable. Other tables count as lists when they
/// are non-empty sequences with no other keys and no metatable.
fn is_list(shared: &LuaShared, table: &LuaTable) -> BridgeResult<bool> {
    match table.get_metatable() {
        Some(meta) => Ok(meta.to_pointer() == shared.list_meta.to_pointer()),
        None => {
            let len = table.raw_len();
            if len == 0 {
                return Ok(false);
            }
            let mut entries = 0usize;
            for pair in table.clone().pairs::<LuaValue, LuaValue>() {
                pair?;
                entries += 1;
                if entries > len {
                    return Ok(false);
                }
            }
            Ok(entries == len)
        }
    }
}
