//! Operation registry for dispatching inbound calls.
//!
//! The registry maps operation names to handlers and manages numeric
//! alias assignment. Aliases are assigned sequentially starting from 1
//! (0 is reserved), so a caller may address an operation either by its
//! name or by its alias.
//!
//! Dispatch runs the full pipeline for one call:
//! - resolve the binding (by name or alias)
//! - run before-filters
//! - decode arguments and await the handler body, capturing panics
//! - run after-filters
//!
//! Any error along the way is surfaced to the exception hook and
//! returned to the caller, who turns it into a failure reply.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::handler::{CallContext, Registry};
//!
//! let mut registry = Registry::new();
//!
//! registry.handle("sum", |args: (i32, i32), _ctx: CallContext| async move {
//!     Ok(args.0 + args.1)
//! })?;
//!
//! registry.handle_notify("log", |line: String, _ctx| async move {
//!     tracing::info!(%line, "peer log");
//!     Ok(())
//! })?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::{to_raw_value, RawValue};

use super::CallContext;
use crate::codec::JsonCodec;
use crate::error::{Result, SockwireError};
use crate::packet::ApiId;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one dispatched call: the encoded reply body, or `None`
/// when the binding produces no value.
pub type HandlerOutcome = Result<Option<Box<RawValue>>>;

/// Filter invoked around handler execution.
pub type CallFilter = Box<dyn Fn(&CallContext) -> Result<()> + Send + Sync>;

/// Hook invoked whenever dispatch fails, before the failure reply is sent.
pub type ExceptionHook = Box<dyn Fn(&CallContext, &SockwireError) + Send + Sync>;

/// Trait for bound operation handlers.
///
/// Implementors decode the packet body, run the operation, and encode
/// its result. Use [`Registry::handle`] or [`Registry::handle_notify`]
/// rather than implementing this directly.
pub trait Handler: Send + Sync + 'static {
    /// Handles an inbound call with the given raw body.
    fn call(&self, body: &RawValue, ctx: CallContext) -> BoxFuture<'static, HandlerOutcome>;
}

/// Adapter wrapping a typed async closure with a return value.
///
/// Decodes the body into `Args` before constructing the future, so the
/// returned future is `'static` and can outlive the raw body borrow.
pub struct TypedHandler<F, Args, R, Fut>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Args) -> (R, Fut)>,
}

impl<F, Args, R, Fut> TypedHandler<F, Args, R, Fut>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    /// Creates a new typed handler from a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Args, R, Fut> Handler for TypedHandler<F, Args, R, Fut>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn call(&self, body: &RawValue, ctx: CallContext) -> BoxFuture<'static, HandlerOutcome> {
        let args = match JsonCodec::decode::<Args>(body.get().as_bytes()) {
            Ok(args) => args,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = (self.handler)(args, ctx);
        Box::pin(async move {
            let value = fut.await?;
            Ok(Some(to_raw_value(&value)?))
        })
    }
}

/// Adapter wrapping a typed async closure with no return value.
///
/// Used for notification-style operations; the dispatch outcome is
/// always `None`, and a caller that still supplied a correlation id
/// receives a `null` reply body.
pub struct NotifyHandler<F, Args, Fut>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Args) -> Fut>,
}

impl<F, Args, Fut> NotifyHandler<F, Args, Fut>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    /// Creates a new notification handler from a closure.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Args, Fut> Handler for NotifyHandler<F, Args, Fut>
where
    F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
    Args: DeserializeOwned + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, body: &RawValue, ctx: CallContext) -> BoxFuture<'static, HandlerOutcome> {
        let args = match JsonCodec::decode::<Args>(body.get().as_bytes()) {
            Ok(args) => args,
            Err(e) => return Box::pin(async move { Err(e) }),
        };
        let fut = (self.handler)(args, ctx);
        Box::pin(async move {
            fut.await?;
            Ok(None)
        })
    }
}

/// One bound operation.
struct Binding {
    handler: Box<dyn Handler>,
    alias: u32,
}

/// Registry of bound operations with name and numeric-alias lookup.
pub struct Registry {
    bindings: HashMap<String, Binding>,
    alias_to_name: HashMap<u32, String>,
    next_alias: u32,
    before_filters: Vec<CallFilter>,
    after_filters: Vec<CallFilter>,
    exception_hook: Option<ExceptionHook>,
}

impl Registry {
    /// Creates an empty registry. Aliases start at 1; 0 is reserved.
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            alias_to_name: HashMap::new(),
            next_alias: 1,
            before_filters: Vec::new(),
            after_filters: Vec::new(),
            exception_hook: None,
        }
    }

    /// Binds an operation that produces a reply value.
    ///
    /// The closure receives the decoded arguments and the call context.
    /// Its return type must serialize; that requirement is checked here
    /// at compile time rather than at dispatch.
    pub fn handle<F, Args, R, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.insert(name, Box::new(TypedHandler::new(handler)))
    }

    /// Binds a notification-style operation with no reply value.
    pub fn handle_notify<F, Args, Fut>(&mut self, name: &str, handler: F) -> Result<()>
    where
        F: Fn(Args, CallContext) -> Fut + Send + Sync + 'static,
        Args: DeserializeOwned + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.insert(name, Box::new(NotifyHandler::new(handler)))
    }

    fn insert(&mut self, name: &str, handler: Box<dyn Handler>) -> Result<()> {
        if self.bindings.contains_key(name) {
            return Err(SockwireError::Binding(format!(
                "operation '{name}' is already bound"
            )));
        }
        let alias = self.next_alias;
        self.next_alias += 1;
        self.alias_to_name.insert(alias, name.to_string());
        self.bindings
            .insert(name.to_string(), Binding { handler, alias });
        Ok(())
    }

    /// Adds a filter that runs before every handler body.
    ///
    /// A filter returning `Err` aborts the call; the caller receives a
    /// failure reply with the filter's message.
    pub fn add_before_filter<F>(&mut self, filter: F)
    where
        F: Fn(&CallContext) -> Result<()> + Send + Sync + 'static,
    {
        self.before_filters.push(Box::new(filter));
    }

    /// Adds a filter that runs after every successful handler body.
    pub fn add_after_filter<F>(&mut self, filter: F)
    where
        F: Fn(&CallContext) -> Result<()> + Send + Sync + 'static,
    {
        self.after_filters.push(Box::new(filter));
    }

    /// Installs the exception hook invoked on every dispatch failure.
    ///
    /// The default hook logs the error at `error` level.
    pub fn set_exception_hook<F>(&mut self, hook: F)
    where
        F: Fn(&CallContext, &SockwireError) + Send + Sync + 'static,
    {
        self.exception_hook = Some(Box::new(hook));
    }

    /// Returns the numeric alias for a bound operation name.
    pub fn alias_of(&self, name: &str) -> Option<u32> {
        self.bindings.get(name).map(|b| b.alias)
    }

    /// Whether an operation is bound under this identifier.
    pub fn contains(&self, api: &ApiId) -> bool {
        self.lookup(api).is_some()
    }

    /// Number of bound operations.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no operations are bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn lookup(&self, api: &ApiId) -> Option<&Binding> {
        match api {
            ApiId::Name(name) => self.bindings.get(name),
            ApiId::Code(alias) => self
                .alias_to_name
                .get(alias)
                .and_then(|name| self.bindings.get(name)),
        }
    }

    /// Runs the full dispatch pipeline for one inbound call.
    ///
    /// Resolves the binding named by `ctx.api()`, runs before-filters,
    /// awaits the handler (capturing panics), then runs after-filters.
    /// Every failure is reported to the exception hook before being
    /// returned.
    pub async fn dispatch(&self, body: &RawValue, ctx: CallContext) -> HandlerOutcome {
        let result = self.run(body, &ctx).await;
        if let Err(err) = &result {
            match &self.exception_hook {
                Some(hook) => hook(&ctx, err),
                None => tracing::error!(
                    api = %ctx.api(),
                    correlation_id = ctx.correlation_id(),
                    error = %err,
                    "dispatch failed"
                ),
            }
        }
        result
    }

    async fn run(&self, body: &RawValue, ctx: &CallContext) -> HandlerOutcome {
        let binding = self
            .lookup(ctx.api())
            .ok_or_else(|| SockwireError::OperationNotFound(ctx.api().to_string()))?;
        for filter in &self.before_filters {
            filter(ctx)?;
        }
        let fut = binding.handler.call(body, ctx.clone());
        let value = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(outcome) => outcome?,
            Err(panic) => return Err(SockwireError::HandlerPanic(panic_message(panic))),
        };
        for filter in &self.after_filters {
            filter(ctx)?;
        }
        Ok(value)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    fn ctx_for(name: &str) -> CallContext {
        CallContext::new(ApiId::from(name), 1, true)
    }

    fn sum_registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .handle("sum", |args: (i32, i32), _ctx| async move {
                Ok(args.0 + args.1)
            })
            .unwrap();
        registry
    }

    #[test]
    fn test_aliases_assigned_from_one() {
        let mut registry = Registry::new();
        registry
            .handle("first", |_: (), _ctx| async { Ok(1i32) })
            .unwrap();
        registry
            .handle("second", |_: (), _ctx| async { Ok(2i32) })
            .unwrap();
        assert_eq!(registry.alias_of("first"), Some(1));
        assert_eq!(registry.alias_of("second"), Some(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = sum_registry();
        let err = registry
            .handle("sum", |_: (), _ctx| async { Ok(0i32) })
            .unwrap_err();
        assert!(matches!(err, SockwireError::Binding(_)));
    }

    #[test]
    fn test_contains_by_name_and_alias() {
        let registry = sum_registry();
        assert!(registry.contains(&ApiId::from("sum")));
        assert!(registry.contains(&ApiId::Code(1)));
        assert!(!registry.contains(&ApiId::from("missing")));
        assert!(!registry.contains(&ApiId::Code(9)));
    }

    #[tokio::test]
    async fn test_dispatch_by_name() {
        let registry = sum_registry();
        let body = registry
            .dispatch(&raw("[2,3]"), ctx_for("sum"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body.get(), "5");
    }

    #[tokio::test]
    async fn test_dispatch_by_alias() {
        let registry = sum_registry();
        let ctx = CallContext::new(ApiId::Code(1), 2, true);
        let body = registry.dispatch(&raw("[10,20]"), ctx).await.unwrap().unwrap();
        assert_eq!(body.get(), "30");
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let registry = sum_registry();
        let err = registry
            .dispatch(&raw("null"), ctx_for("missing"))
            .await
            .unwrap_err();
        match err {
            SockwireError::OperationNotFound(name) => assert_eq!(name, "missing"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_notify_binding_yields_no_value() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in = seen.clone();
        let mut registry = Registry::new();
        registry
            .handle_notify("log", move |_line: String, _ctx| {
                let seen = seen_in.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .unwrap();
        let outcome = registry
            .dispatch(&raw("\"hello\""), ctx_for("log"))
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_argument_decode_error() {
        let registry = sum_registry();
        let err = registry
            .dispatch(&raw("\"not a pair\""), ctx_for("sum"))
            .await
            .unwrap_err();
        assert!(matches!(err, SockwireError::Json(_)));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let mut registry = Registry::new();
        registry
            .handle("fail", |_: (), _ctx| async {
                Err::<i32, _>(SockwireError::Protocol("boom".to_string()))
            })
            .unwrap();
        let err = registry
            .dispatch(&raw("null"), ctx_for("fail"))
            .await
            .unwrap_err();
        assert!(matches!(err, SockwireError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let mut registry = Registry::new();
        registry
            .handle("explode", |_: (), _ctx| async {
                panic!("boom");
                #[allow(unreachable_code)]
                Ok(0i32)
            })
            .unwrap();
        let err = registry
            .dispatch(&raw("null"), ctx_for("explode"))
            .await
            .unwrap_err();
        match err {
            SockwireError::HandlerPanic(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_before_filter_blocks_call() {
        let mut registry = sum_registry();
        registry.add_before_filter(|_ctx| {
            Err(SockwireError::Protocol("denied".to_string()))
        });
        let err = registry
            .dispatch(&raw("[1,1]"), ctx_for("sum"))
            .await
            .unwrap_err();
        assert!(matches!(err, SockwireError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_after_filter_error_fails_call() {
        let mut registry = sum_registry();
        registry.add_after_filter(|_ctx| {
            Err(SockwireError::Protocol("audit failed".to_string()))
        });
        let err = registry
            .dispatch(&raw("[1,1]"), ctx_for("sum"))
            .await
            .unwrap_err();
        assert!(matches!(err, SockwireError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_filters_observe_context() {
        let calls = Arc::new(AtomicUsize::new(0));
        let before = calls.clone();
        let after = calls.clone();
        let mut registry = sum_registry();
        registry.add_before_filter(move |ctx| {
            assert_eq!(ctx.api(), &ApiId::Name("sum".to_string()));
            before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry.add_after_filter(move |_ctx| {
            after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        registry
            .dispatch(&raw("[1,1]"), ctx_for("sum"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exception_hook_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in = fired.clone();
        let mut registry = sum_registry();
        registry.set_exception_hook(move |ctx, err| {
            assert_eq!(ctx.api(), &ApiId::Name("missing".to_string()));
            assert!(matches!(err, SockwireError::OperationNotFound(_)));
            fired_in.fetch_add(1, Ordering::SeqCst);
        });
        let _ = registry.dispatch(&raw("null"), ctx_for("missing")).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hook_silent_on_success() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_in = fired.clone();
        let mut registry = sum_registry();
        registry.set_exception_hook(move |_ctx, _err| {
            fired_in.fetch_add(1, Ordering::SeqCst);
        });
        registry
            .dispatch(&raw("[1,2]"), ctx_for("sum"))
            .await
            .unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
