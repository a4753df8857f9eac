//! Name-addressed methods for targets that need dynamic forwarding.
//!
//! A [`MethodTable`] pairs a target with a table of named methods built
//! once. Lookups happen at call time, so redefining a method between calls
//! changes what the next call runs.

use std::any::{Any, type_name};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use marshal_types::{MarshalError, TargetError};

/// Type-erased argument or return value.
pub type Value = Box<dyn Any + Send>;

/// A named method on a target of type `T`.
pub type Method<T> = Arc<dyn Fn(&T, Args) -> Result<Value, TargetError> + Send + Sync>;

/// Positional arguments for a named method call.
#[derive(Default)]
pub struct Args {
    values: VecDeque<Value>,
    position: usize,
}

impl Args {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument.
    #[must_use]
    pub fn with<V: Any + Send>(mut self, value: V) -> Self {
        self.values.push_back(Box::new(value));
        self
    }

    /// Take the next argument as a `V`.
    pub fn take<V: Any>(&mut self) -> Result<V, MarshalError> {
        let position = self.position;
        let value = self
            .values
            .pop_front()
            .ok_or(MarshalError::MissingArgument { position })?;
        self.position += 1;
        value
            .downcast::<V>()
            .map(|v| *v)
            .map_err(|_| MarshalError::ArgumentType {
                position,
                expected: type_name::<V>(),
            })
    }

    /// Take the next argument if present, else `default`.
    pub fn take_or<V: Any>(&mut self, default: V) -> Result<V, MarshalError> {
        if self.values.is_empty() {
            self.position += 1;
            Ok(default)
        } else {
            self.take()
        }
    }

    /// Remaining arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("remaining", &self.values.len())
            .field("position", &self.position)
            .finish()
    }
}

/// Build [`Args`] from a list of values.
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        $crate::Args::new()$(.with($value))*
    };
}

/// A target plus its named methods.
pub struct MethodTable<T> {
    target: T,
    methods: RwLock<HashMap<String, Method<T>>>,
}

impl<T> MethodTable<T> {
    #[must_use]
    pub fn new(target: T) -> Self {
        Self {
            target,
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Builder form of [`MethodTable::define`].
    #[must_use]
    pub fn with_method<F>(self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&T, Args) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        self.define(name, method);
        self
    }

    /// Define or replace the method called `name`.
    pub fn define<F>(&self, name: impl Into<String>, method: F)
    where
        F: Fn(&T, Args) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        let mut methods = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        methods.insert(name.into(), Arc::new(method));
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut methods = self.methods.write().unwrap_or_else(PoisonError::into_inner);
        methods.remove(name).is_some()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);
        methods.contains_key(name)
    }

    #[must_use]
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Look up `name` and run it against the target.
    ///
    /// The table lock is released before the method runs, so a method may
    /// redefine itself or its siblings.
    pub fn invoke(&self, name: &str, args: Args) -> Result<Value, TargetError> {
        let method = {
            let methods = self.methods.read().unwrap_or_else(PoisonError::into_inner);
            methods.get(name).cloned()
        };
        let method = method.ok_or_else(|| MarshalError::UnknownMethod {
            name: name.to_string(),
        })?;
        method(&self.target, args)
    }
}
