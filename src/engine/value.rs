//! Script values.
//!
//! Data values (`undefined`, `null`, booleans, numbers, strings, arrays)
//! compare structurally. Objects, functions, promises and externals compare
//! by identity.

use super::object::{ScriptFunction, ScriptObject};
use super::promise::Promise;
use crate::error::ScriptError;
use serde_json::{Map, Number, Value};
use std::any::Any;
use std::sync::Arc;

/// Largest integer an `f64` represents exactly (2^53)
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A value in the script runtime
#[derive(Clone, Debug, Default)]
pub enum ScriptValue {
    /// `undefined`
    #[default]
    Undefined,
    /// `null`
    Null,
    /// A boolean
    Bool(bool),
    /// A number
    Number(f64),
    /// A string
    String(String),
    /// An array
    Array(Vec<ScriptValue>),
    /// An object
    Object(ScriptObject),
    /// A function
    Function(ScriptFunction),
    /// A promise
    Promise(Promise),
    /// An error value
    Error(ScriptError),
    /// An opaque carrier for a native value
    External(External),
}

impl ScriptValue {
    /// `undefined` check
    pub fn is_undefined(&self) -> bool {
        matches!(self, ScriptValue::Undefined)
    }

    /// `null` check
    pub fn is_null(&self) -> bool {
        matches!(self, ScriptValue::Null)
    }

    /// Borrow the string contents
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the numeric value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Borrow the object
    pub fn as_object(&self) -> Option<&ScriptObject> {
        match self {
            ScriptValue::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Borrow the function
    pub fn as_function(&self) -> Option<&ScriptFunction> {
        match self {
            ScriptValue::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Borrow the promise
    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            ScriptValue::Promise(p) => Some(p),
            _ => None,
        }
    }

    /// Borrow the external carrier
    pub fn as_external(&self) -> Option<&External> {
        match self {
            ScriptValue::External(e) => Some(e),
            _ => None,
        }
    }

    /// Name of the value's type, as `typeof` would report it
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Undefined => "undefined",
            ScriptValue::Bool(_) => "boolean",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Function(_) => "function",
            _ => "object",
        }
    }

    /// Convert to JSON.
    ///
    /// Returns `Ok(None)` for values with no JSON form (`undefined`,
    /// functions, externals) and a `TypeError` for cyclic structures.
    pub fn to_json(&self) -> Result<Option<Value>, ScriptError> {
        let mut stack = Vec::new();
        self.to_json_inner(&mut stack)
    }

    fn to_json_inner(&self, stack: &mut Vec<usize>) -> Result<Option<Value>, ScriptError> {
        let json = match self {
            ScriptValue::Undefined | ScriptValue::Function(_) | ScriptValue::External(_) => {
                return Ok(None)
            }
            ScriptValue::Null => Value::Null,
            ScriptValue::Bool(b) => Value::Bool(*b),
            ScriptValue::Number(n) => number_to_json(*n),
            ScriptValue::String(s) => Value::String(s.clone()),
            ScriptValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.to_json_inner(stack)?.unwrap_or(Value::Null));
                }
                Value::Array(out)
            }
            ScriptValue::Object(object) => {
                let id = object.id();
                if stack.contains(&id) {
                    return Err(ScriptError::type_error(
                        "Converting circular structure to JSON",
                    ));
                }
                stack.push(id);
                let mut map = Map::new();
                for (key, value) in object.own_properties() {
                    if let Some(member) = value.to_json_inner(stack)? {
                        map.insert(key, member);
                    }
                }
                stack.pop();
                Value::Object(map)
            }
            // Promises and errors have no own enumerable properties
            ScriptValue::Promise(_) | ScriptValue::Error(_) => Value::Object(Map::new()),
        };
        Ok(Some(json))
    }

    /// Build a script value from JSON
    pub fn from_json(json: &Value) -> ScriptValue {
        match json {
            Value::Null => ScriptValue::Null,
            Value::Bool(b) => ScriptValue::Bool(*b),
            Value::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => ScriptValue::String(s.clone()),
            Value::Array(items) => {
                ScriptValue::Array(items.iter().map(ScriptValue::from_json).collect())
            }
            Value::Object(map) => {
                let object = ScriptObject::new();
                for (key, value) in map {
                    object.set(key, ScriptValue::from_json(value));
                }
                ScriptValue::Object(object)
            }
        }
    }
}

fn number_to_json(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < MAX_SAFE_INTEGER {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Undefined, ScriptValue::Undefined) => true,
            (ScriptValue::Null, ScriptValue::Null) => true,
            (ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::Array(a), ScriptValue::Array(b)) => a == b,
            (ScriptValue::Object(a), ScriptValue::Object(b)) => a.ptr_eq(b),
            (ScriptValue::Function(a), ScriptValue::Function(b)) => a.ptr_eq(b),
            (ScriptValue::Promise(a), ScriptValue::Promise(b)) => a.ptr_eq(b),
            (ScriptValue::Error(a), ScriptValue::Error(b)) => a == b,
            (ScriptValue::External(a), ScriptValue::External(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Bool(b)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<u32> for ScriptValue {
    fn from(n: u32) -> Self {
        ScriptValue::Number(n as f64)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::String(s.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(s)
    }
}

impl From<ScriptObject> for ScriptValue {
    fn from(o: ScriptObject) -> Self {
        ScriptValue::Object(o)
    }
}

impl From<ScriptFunction> for ScriptValue {
    fn from(f: ScriptFunction) -> Self {
        ScriptValue::Function(f)
    }
}

impl From<Promise> for ScriptValue {
    fn from(p: Promise) -> Self {
        ScriptValue::Promise(p)
    }
}

impl From<ScriptError> for ScriptValue {
    fn from(e: ScriptError) -> Self {
        ScriptValue::Error(e)
    }
}

impl From<External> for ScriptValue {
    fn from(e: External) -> Self {
        ScriptValue::External(e)
    }
}

/// Opaque carrier that smuggles a native value through script code
#[derive(Clone)]
pub struct External(Arc<dyn Any + Send + Sync>);

impl External {
    /// Wrap a native value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        External(Arc::new(value))
    }

    /// Borrow the carried value if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &External) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for External {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("External")
    }
}
