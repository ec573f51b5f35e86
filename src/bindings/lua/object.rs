use std::sync::Arc;

use mlua::prelude::*;

use super::{convert, shared, LuaShared};
use crate::bindings::Runtime;
use crate::object::PixelObject;
use crate::value::Var;

/// Userdata wrapper around a host object.
pub(super) struct LuaHostObject(Arc<PixelObject>);

impl LuaUserData for LuaHostObject {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(LuaMetaMethod::Index, |lua, this, key: LuaValue| {
            let LuaValue::String(key) = key else {
                return Ok(LuaValue::Nil);
            };
            let key = key.to_str()?.to_string();
            if this.0.has_method(&key) {
                return method_function(lua, Arc::clone(&this.0), key).map(LuaValue::Function);
            }
            let shared = shared(lua)?;
            Ok(convert::into_lua(lua, &shared, &this.0.get_property(&key))?)
        });

        methods.add_meta_method(
            LuaMetaMethod::NewIndex,
            |lua, this, (key, value): (String, LuaValue)| {
                if this.0.has_method(&key) {
                    return Err(LuaError::RuntimeError(format!(
                        "cannot overwrite method `{key}` of {}",
                        this.0.type_name()
                    )));
                }
                let shared = shared(lua)?;
                this.0.set_property(key, convert::from_lua(&shared, value)?);
                Ok(())
            },
        );

        methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
            Ok(format!("{}: {}", this.0.type_name(), this.0.id()))
        });
    }
}

/// A Lua function calling `method` on `object`.
///
/// `obj:method(...)` passes the object again as the first argument; it is dropped so that
/// the callback always sees `[runtime, self, args...]`, whichever call syntax the script used.
///
/// Lua gives the callee no way to tell `obj:method(x)` from `obj.method(obj, x)`, so a dot call
/// whose first argument is the receiver itself loses that argument. Pass the object in another
/// position, or call through a different object, when a method needs its own receiver twice.
fn method_function(lua: &Lua, object: Arc<PixelObject>, method: String) -> LuaResult<LuaFunction> {
    lua.create_function(move |lua, args: LuaMultiValue| {
        let shared = shared(lua)?;
        let mut args = args.into_iter().peekable();
        let is_self = matches!(
            args.peek(),
            Some(LuaValue::UserData(ud)) if unwrap(ud).is_some_and(|o| Arc::ptr_eq(&o, &object))
        );
        if is_self {
            args.next();
        }
        let args = args
            .map(|arg| convert::from_lua(&shared, arg))
            .collect::<Result<Vec<Var>, _>>()?;
        let result = object.call_method(Runtime::Lua, &method, args)?;
        Ok(convert::into_lua(lua, &shared, &result)?)
    })
}

/// The userdata for `object`, reusing the live one if the script still holds it.
pub(super) fn wrap(
    lua: &Lua,
    shared: &LuaShared,
    object: &Arc<PixelObject>,
) -> LuaResult<LuaValue> {
    let id = object.id();
    if let LuaValue::UserData(existing) = shared.wrappers.raw_get::<LuaValue>(id)? {
        return Ok(LuaValue::UserData(existing));
    }
    let userdata = lua.create_userdata(LuaHostObject(Arc::clone(object)))?;
    shared.wrappers.raw_set(id, userdata.clone())?;
    Ok(LuaValue::UserData(userdata))
}

pub(super) fn unwrap(userdata: &LuaAnyUserData) -> Option<Arc<PixelObject>> {
    userdata
        .borrow::<LuaHostObject>()
        .ok()
        .map(|host| Arc::clone(&host.0))
}
