//! Proxies: forward calls on a wrapped target to the owner thread.

use std::sync::Arc;

use marshal_types::{ContextId, TargetError};

use crate::dispatch::{Dispatcher, ExceptionHandler, FireAndForget, Synchronous};
use crate::handlers;
use crate::marshal::Marshal;
use crate::methods::{Args, MethodTable, Value};

/// Fire-and-forget proxy: calls return immediately with no result.
pub type MuteProxy<T> = Proxy<T, FireAndForget>;

/// Ordinary proxy: calls block and return the target's result.
pub type SyncProxy<T> = Proxy<T, Synchronous>;

/// Wraps `target` so calls on it run on the owner thread via `D`.
///
/// Nothing about the target is resolved until a call actually executes on
/// the owner thread.
pub struct Proxy<T, D> {
    target: Arc<T>,
    context: ContextId,
    marshal: Marshal,
    dispatcher: D,
}

impl<T, D: Clone> Clone for Proxy<T, D> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            context: self.context,
            marshal: self.marshal.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<T, D> Proxy<T, D>
where
    T: Send + Sync + 'static,
    D: Dispatcher,
{
    /// Marshal `f(&target)` to the owner thread.
    pub fn call<R, E, F>(&self, f: F) -> D::Output<R, E>
    where
        F: FnOnce(&T) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<TargetError> + Send + 'static,
    {
        let target = Arc::clone(&self.target);
        self.dispatcher
            .dispatch(&self.marshal, self.context, move || f(&target))
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    #[must_use]
    pub fn target(&self) -> &Arc<T> {
        &self.target
    }
}

impl<T, D> Proxy<MethodTable<T>, D>
where
    T: Send + Sync + 'static,
    D: Dispatcher,
{
    /// Forwarder for the method called `name`. The name is looked up on the
    /// owner thread each time the forwarder is invoked.
    #[must_use]
    pub fn method(&self, name: impl Into<String>) -> Forwarder<'_, T, D> {
        Forwarder {
            proxy: self,
            name: name.into(),
        }
    }
}

/// A named method bound to a proxy, ready to be invoked with arguments.
pub struct Forwarder<'a, T, D> {
    proxy: &'a Proxy<MethodTable<T>, D>,
    name: String,
}

impl<T, D> Forwarder<'_, T, D>
where
    T: Send + Sync + 'static,
    D: Dispatcher,
{
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoke(&self, args: Args) -> D::Output<Value, TargetError> {
        let name = self.name.clone();
        self.proxy.call(move |table| table.invoke(&name, args))
    }
}

/// Builds proxies whose calls run on one context.
pub struct ProxyBuilder {
    marshal: Marshal,
    context: ContextId,
}

impl ProxyBuilder {
    pub(crate) fn new(marshal: Marshal, context: ContextId) -> Self {
        let event = marshal.options().call_event.clone();
        marshal.bind(context, &event, handlers::handle_call);
        Self { marshal, context }
    }

    #[must_use]
    pub fn context(&self) -> ContextId {
        self.context
    }

    /// Proxy whose calls never block or report back. Errors go to
    /// `on_error` on the owner thread when given.
    #[must_use]
    pub fn mute_proxy<T>(
        &self,
        target: Arc<T>,
        on_error: Option<ExceptionHandler>,
    ) -> MuteProxy<T> {
        let dispatcher = match on_error {
            Some(handler) => FireAndForget::with_handler(handler),
            None => FireAndForget::new(),
        };
        self.wrap(target, dispatcher)
    }

    /// Proxy whose calls block until the owner thread returns a result.
    #[must_use]
    pub fn proxy<T>(&self, target: Arc<T>) -> SyncProxy<T> {
        self.wrap(target, Synchronous)
    }

    fn wrap<T, D>(&self, target: Arc<T>, dispatcher: D) -> Proxy<T, D> {
        Proxy {
            target,
            context: self.context,
            marshal: self.marshal.clone(),
            dispatcher,
        }
    }
}
