/// Script engine bridge — embedded Lua 5.4 behind a typed value boundary.
///
/// All values cross the boundary as one of the six supported kinds
/// (`schema::value::Value`); no function values, no opaque handles.

use mlua::{Lua, Table, Value as LuaValue, Variadic};
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::schema::value::Value;

/// Nesting bound for table conversion. Guards against self-referential
/// tables built by script code.
const MAX_TABLE_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
    #[error("unrepresentable script value: {0}")]
    Value(String),
    #[error("no function named '{0}'")]
    NoSuchFunction(String),
}

/// One persistent Lua environment.
///
/// The global table doubles as the story's global variable tier, so the
/// engine records the set of names present at construction (the standard
/// library) and treats everything else as story state.
pub struct LuaEngine {
    lua: Lua,
    baseline: FxHashSet<String>,
}

impl LuaEngine {
    pub fn new() -> Result<LuaEngine, ScriptError> {
        let lua = Lua::new();
        let mut baseline = FxHashSet::default();
        for pair in lua.globals().pairs::<LuaValue, LuaValue>() {
            let (key, _) = pair?;
            if let LuaValue::String(name) = key {
                baseline.insert(name.to_string_lossy().to_string());
            }
        }
        Ok(LuaEngine { lua, baseline })
    }

    /// Execute a code fragment and return its result.
    ///
    /// Expressions evaluate to their value; statement blocks evaluate to
    /// whatever they `return`, or nil. `label` names the chunk in error
    /// messages.
    pub fn execute(&self, code: &str, label: &str) -> Result<Value, ScriptError> {
        let result = self.lua.load(code).set_name(label).eval::<LuaValue>()?;
        self.from_lua(result, 0)
    }

    pub fn get_global(&self, name: &str) -> Result<Value, ScriptError> {
        let value: LuaValue = self.lua.globals().get(name)?;
        self.from_lua(value, 0)
    }

    pub fn set_global(&self, name: &str, value: &Value) -> Result<(), ScriptError> {
        let lua_value = self.to_lua(value)?;
        self.lua.globals().set(name, lua_value)?;
        Ok(())
    }

    /// Invoke a named global function with positional arguments.
    pub fn call_named(&self, name: &str, args: &[Value]) -> Result<Value, ScriptError> {
        let target: LuaValue = self.lua.globals().get(name)?;
        let LuaValue::Function(function) = target else {
            return Err(ScriptError::NoSuchFunction(name.to_string()));
        };
        let mut lua_args = Vec::with_capacity(args.len());
        for arg in args {
            lua_args.push(self.to_lua(arg)?);
        }
        let result: LuaValue = function.call(Variadic::from_iter(lua_args))?;
        self.from_lua(result, 0)
    }

    /// All story-defined globals, as a sorted mapping.
    ///
    /// Standard-library names and values that cannot cross the boundary
    /// (functions, userdata) are omitted.
    pub fn get_all_globals(&self) -> Result<BTreeMap<String, Value>, ScriptError> {
        let mut globals = BTreeMap::new();
        for pair in self.lua.globals().pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            let LuaValue::String(name) = key else {
                continue;
            };
            let name = name.to_string_lossy().to_string();
            if self.baseline.contains(&name) {
                continue;
            }
            if let Ok(value) = self.from_lua(value, 0) {
                globals.insert(name, value);
            }
        }
        Ok(globals)
    }

    /// Remove every story-defined global, leaving the standard library.
    pub fn clear_globals(&self) -> Result<(), ScriptError> {
        let doomed: Vec<String> = self.get_all_globals()?.into_keys().collect();
        for name in doomed {
            self.lua.globals().set(name.as_str(), LuaValue::Nil)?;
        }
        Ok(())
    }

    fn to_lua(&self, value: &Value) -> Result<LuaValue, ScriptError> {
        Ok(match value {
            Value::Nil => LuaValue::Nil,
            Value::Bool(b) => LuaValue::Boolean(*b),
            Value::Int(i) => LuaValue::Integer(*i),
            Value::Float(x) => LuaValue::Number(*x),
            Value::Str(s) => LuaValue::String(self.lua.create_string(s)?),
            Value::List(items) => {
                let table = self.lua.create_table()?;
                for (i, item) in items.iter().enumerate() {
                    table.raw_set(i as i64 + 1, self.to_lua(item)?)?;
                }
                LuaValue::Table(table)
            }
            Value::Map(entries) => {
                let table = self.lua.create_table()?;
                for (key, item) in entries {
                    table.raw_set(key.as_str(), self.to_lua(item)?)?;
                }
                LuaValue::Table(table)
            }
        })
    }

    fn from_lua(&self, value: LuaValue, depth: usize) -> Result<Value, ScriptError> {
        Ok(match value {
            LuaValue::Nil => Value::Nil,
            LuaValue::Boolean(b) => Value::Bool(b),
            LuaValue::Integer(i) => Value::Int(i),
            LuaValue::Number(x) => Value::Float(x),
            LuaValue::String(s) => Value::Str(s.to_string_lossy().to_string()),
            LuaValue::Table(table) => self.table_to_value(&table, depth)?,
            other => {
                return Err(ScriptError::Value(format!(
                    "{} values cannot cross the script boundary",
                    other.type_name()
                )))
            }
        })
    }

    /// A table with consecutive integer keys 1..n is an ordered list;
    /// anything else is a mapping with stringified scalar keys.
    fn table_to_value(&self, table: &Table, depth: usize) -> Result<Value, ScriptError> {
        if depth >= MAX_TABLE_DEPTH {
            return Err(ScriptError::Value(
                "table nesting exceeds the conversion bound".to_string(),
            ));
        }

        let mut pairs = Vec::new();
        for pair in table.clone().pairs::<LuaValue, LuaValue>() {
            pairs.push(pair?);
        }

        let is_list = !pairs.is_empty()
            && pairs
                .iter()
                .all(|(key, _)| matches!(key, LuaValue::Integer(i) if *i >= 1));
        if is_list {
            let mut indexed = Vec::with_capacity(pairs.len());
            for (key, value) in pairs {
                let LuaValue::Integer(i) = key else {
                    unreachable!()
                };
                indexed.push((i, self.from_lua(value, depth + 1)?));
            }
            indexed.sort_by_key(|(i, _)| *i);
            let consecutive = indexed
                .iter()
                .enumerate()
                .all(|(slot, (i, _))| *i == slot as i64 + 1);
            if consecutive {
                return Ok(Value::List(indexed.into_iter().map(|(_, v)| v).collect()));
            }
            let mut map = BTreeMap::new();
            for (i, value) in indexed {
                map.insert(i.to_string(), value);
            }
            return Ok(Value::Map(map));
        }

        let mut map = BTreeMap::new();
        for (key, value) in pairs {
            let key = match key {
                LuaValue::String(s) => s.to_string_lossy().to_string(),
                LuaValue::Integer(i) => i.to_string(),
                LuaValue::Number(x) => x.to_string(),
                LuaValue::Boolean(b) => b.to_string(),
                other => {
                    return Err(ScriptError::Value(format!(
                        "{} table keys cannot cross the script boundary",
                        other.type_name()
                    )))
                }
            };
            map.insert(key, self.from_lua(value, depth + 1)?);
        }
        Ok(Value::Map(map))
    }
}
