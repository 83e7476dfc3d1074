//! Objects, functions and class templates.

use super::value::ScriptValue;
use crate::error::ScriptError;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

/// Host callback backing a [`ScriptFunction`]
pub type NativeCallback = dyn Fn(&CallInfo) -> Result<ScriptValue, ScriptError> + Send + Sync;

/// Read-only accessor installed on a class prototype
pub type Accessor = dyn Fn(&ScriptObject) -> ScriptValue + Send + Sync;

struct Property {
    value: ScriptValue,
    writable: bool,
}

struct ObjectData {
    class: Option<Arc<ClassTemplate>>,
    properties: RwLock<BTreeMap<String, Property>>,
    internal: OnceCell<Arc<dyn Any + Send + Sync>>,
}

/// A script object.
///
/// Cloning yields another reference to the same object.
#[derive(Clone)]
pub struct ScriptObject(Arc<ObjectData>);

impl ScriptObject {
    /// Create a plain object
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create an instance of a class
    pub fn with_class(class: Arc<ClassTemplate>) -> Self {
        Self::build(Some(class))
    }

    fn build(class: Option<Arc<ClassTemplate>>) -> Self {
        ScriptObject(Arc::new(ObjectData {
            class,
            properties: RwLock::new(BTreeMap::new()),
            internal: OnceCell::new(),
        }))
    }

    /// Name of the class this object was constructed from
    pub fn class_name(&self) -> Option<&str> {
        self.0.class.as_ref().map(|c| c.name())
    }

    /// Read a property, falling back to class accessors and methods
    pub fn get(&self, key: &str) -> ScriptValue {
        if let Some(property) = self.0.properties.read().get(key) {
            return property.value.clone();
        }
        let Some(class) = &self.0.class else {
            return ScriptValue::Undefined;
        };
        if let Some(accessor) = class.accessors.get(key) {
            return accessor(self);
        }
        class
            .methods
            .get(key)
            .map(|m| ScriptValue::Function(m.clone()))
            .unwrap_or_default()
    }

    /// Assign a property. Returns `false` if the property is read-only.
    pub fn set(&self, key: impl Into<String>, value: ScriptValue) -> bool {
        let key = key.into();
        let previous = {
            let mut properties = self.0.properties.write();
            match properties.get_mut(&key) {
                Some(property) if !property.writable => return false,
                Some(property) => std::mem::replace(&mut property.value, value),
                None => {
                    properties.insert(key, Property { value, writable: true });
                    ScriptValue::Undefined
                }
            }
        };
        // previous value may own this object's last reference elsewhere
        drop(previous);
        true
    }

    /// Define a read-only property, replacing any existing one
    pub fn define_readonly(&self, key: impl Into<String>, value: ScriptValue) {
        let previous = self
            .0
            .properties
            .write()
            .insert(key.into(), Property { value, writable: false });
        drop(previous);
    }

    /// Whether the object or its class defines `key`
    pub fn has(&self, key: &str) -> bool {
        if self.0.properties.read().contains_key(key) {
            return true;
        }
        self.0
            .class
            .as_ref()
            .map_or(false, |c| c.accessors.contains_key(key) || c.methods.contains_key(key))
    }

    /// Own property names, in key order
    pub fn keys(&self) -> Vec<String> {
        self.0.properties.read().keys().cloned().collect()
    }

    pub(crate) fn own_properties(&self) -> Vec<(String, ScriptValue)> {
        self.0
            .properties
            .read()
            .iter()
            .map(|(k, p)| (k.clone(), p.value.clone()))
            .collect()
    }

    /// Invoke a method with `this` bound to the object
    pub fn call_method(&self, name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        match self.get(name) {
            ScriptValue::Function(f) => f.call(Some(self), args),
            _ => Err(ScriptError::type_error(format!("{} is not a function", name))),
        }
    }

    /// Attach the native payload. Returns `false` if one is already attached.
    pub fn set_internal(&self, value: Arc<dyn Any + Send + Sync>) -> bool {
        self.0.internal.set(value).is_ok()
    }

    /// Borrow the native payload if it has type `T`
    pub fn internal<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.internal.get()?.clone().downcast::<T>().ok()
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ScriptObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Create a weak reference
    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Arc::downgrade(&self.0))
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl Default for ScriptObject {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptObject")
            .field("class", &self.class_name())
            .field("keys", &self.keys())
            .finish()
    }
}

/// Weak reference to a [`ScriptObject`]
#[derive(Clone)]
pub struct WeakObject(Weak<ObjectData>);

impl WeakObject {
    /// Upgrade to a strong reference if the object is still alive
    pub fn upgrade(&self) -> Option<ScriptObject> {
        self.0.upgrade().map(ScriptObject)
    }

    /// Whether the object has been collected
    pub fn is_dead(&self) -> bool {
        self.0.strong_count() == 0
    }
}

/// Arguments of a function invocation
pub struct CallInfo {
    this: Option<ScriptObject>,
    args: Vec<ScriptValue>,
    is_construct_call: bool,
}

impl CallInfo {
    /// Argument `index`, or `undefined` if it was not supplied
    pub fn arg(&self, index: usize) -> &ScriptValue {
        static UNDEFINED: ScriptValue = ScriptValue::Undefined;
        self.args.get(index).unwrap_or(&UNDEFINED)
    }

    /// Number of supplied arguments
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether no arguments were supplied
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// The receiver, if any
    pub fn this(&self) -> Option<&ScriptObject> {
        self.this.as_ref()
    }

    /// The receiver, or a `TypeError` when called unbound
    pub fn this_object(&self) -> Result<&ScriptObject, ScriptError> {
        self.this
            .as_ref()
            .ok_or_else(|| ScriptError::type_error("Illegal invocation"))
    }

    /// Whether the function was invoked with `new`
    pub fn is_construct_call(&self) -> bool {
        self.is_construct_call
    }
}

struct FunctionData {
    name: String,
    callback: Box<NativeCallback>,
    class: Option<Arc<ClassTemplate>>,
}

/// A host function callable from script code
#[derive(Clone)]
pub struct ScriptFunction(Arc<FunctionData>);

impl ScriptFunction {
    /// Create a plain function
    pub fn new<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&CallInfo) -> Result<ScriptValue, ScriptError> + Send + Sync + 'static,
    {
        ScriptFunction(Arc::new(FunctionData {
            name: name.into(),
            callback: Box::new(callback),
            class: None,
        }))
    }

    /// Function name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Whether the function can be used with `new`
    pub fn is_constructor(&self) -> bool {
        self.0.class.is_some()
    }

    /// Call the function
    pub fn call(&self, this: Option<&ScriptObject>, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        let info = CallInfo {
            this: this.cloned(),
            args,
            is_construct_call: false,
        };
        (self.0.callback)(&info)
    }

    /// Invoke as a constructor (`new f(...args)`)
    pub fn construct(&self, args: Vec<ScriptValue>) -> Result<ScriptObject, ScriptError> {
        let class = self
            .0
            .class
            .as_ref()
            .ok_or_else(|| ScriptError::type_error(format!("{} is not a constructor", self.0.name)))?;
        let object = ScriptObject::with_class(class.clone());
        let info = CallInfo {
            this: Some(object.clone()),
            args,
            is_construct_call: true,
        };
        (self.0.callback)(&info)?;
        Ok(object)
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[Function: {}]", self.0.name)
    }
}

/// Prototype shared by all instances of a bound class
pub struct ClassTemplate {
    name: String,
    methods: HashMap<String, ScriptFunction>,
    accessors: HashMap<String, Box<Accessor>>,
}

impl ClassTemplate {
    /// Class name
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Builder for a [`ClassTemplate`] and its constructor
pub struct ClassBuilder {
    name: String,
    methods: HashMap<String, ScriptFunction>,
    accessors: HashMap<String, Box<Accessor>>,
}

impl ClassBuilder {
    /// Start a class
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            accessors: HashMap::new(),
        }
    }

    /// Add a prototype method
    pub fn method<F>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(&CallInfo) -> Result<ScriptValue, ScriptError> + Send + Sync + 'static,
    {
        self.methods
            .insert(name.to_string(), ScriptFunction::new(name, callback));
        self
    }

    /// Add a read-only accessor
    pub fn accessor<F>(mut self, name: &str, getter: F) -> Self
    where
        F: Fn(&ScriptObject) -> ScriptValue + Send + Sync + 'static,
    {
        self.accessors.insert(name.to_string(), Box::new(getter));
        self
    }

    /// Finish the class and return its constructor
    pub fn constructor<F>(self, body: F) -> ScriptFunction
    where
        F: Fn(&CallInfo) -> Result<ScriptValue, ScriptError> + Send + Sync + 'static,
    {
        let class = Arc::new(ClassTemplate {
            name: self.name.clone(),
            methods: self.methods,
            accessors: self.accessors,
        });
        ScriptFunction(Arc::new(FunctionData {
            name: self.name,
            callback: Box::new(body),
            class: Some(class),
        }))
    }
}
