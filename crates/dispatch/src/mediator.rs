//! Command/query mediator: one registered handler per message type.
//!
//! The mediator decouples callers from handler implementations and is the
//! single place where expected failures become [`Outcome::Failure`] values.
//! Registration collisions are rejected immediately at registration time,
//! not discovered at dispatch time.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use trellis_core::{CoreError, CoreResult, Outcome};

use crate::hooks::{DispatchHook, MessageKind};

/// A typed intent to mutate state.
pub trait Command: Send + Sync + 'static {
    type Output: Send + 'static;
}

/// A typed intent to read state.
pub trait Query: Send + Sync + 'static {
    type Output: Send + 'static;
}

/// Handles one command type.
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    fn handle(&self, command: C) -> Outcome<C::Output, CoreError>;
}

/// Handles one query type.
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    fn handle(&self, query: Q) -> Outcome<Q::Output, CoreError>;
}

/// Type-erased registration: takes the boxed message, returns the boxed
/// outcome plus its success flag (for the hook chain). `Arc` so dispatch can
/// clone the entry and release the registry lock before invoking; handlers
/// may re-enter the mediator.
type ErasedInvoke = Arc<dyn Fn(Box<dyn Any>) -> (Box<dyn Any>, bool) + Send + Sync>;

struct Registered {
    invoke: ErasedInvoke,
}

/// Routes typed commands and queries to exactly one registered handler.
///
/// Handlers register during process startup, before any dispatch occurs.
/// Dispatch resolves by exact type; a handler panic is captured and
/// converted into a failure outcome, so callers of `send`/`ask` never
/// observe an uncaught error.
#[derive(Default)]
pub struct Mediator {
    commands: RwLock<HashMap<TypeId, Registered>>,
    queries: RwLock<HashMap<TypeId, Registered>>,
    hooks: Vec<Arc<dyn DispatchHook>>,
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("commands", &self.commands.read().map(|m| m.len()).unwrap_or(0))
            .field("queries", &self.queries.read().map(|m| m.len()).unwrap_or(0))
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl Mediator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mediator with an explicit hook chain (timing, logging).
    pub fn with_hooks(hooks: Vec<Arc<dyn DispatchHook>>) -> Self {
        Self {
            hooks,
            ..Self::default()
        }
    }

    /// Register the single handler for command type `C`.
    pub fn register_command<C, H>(&self, handler: H) -> CoreResult<()>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let invoke: ErasedInvoke = Arc::new(move |boxed| {
            let outcome = match boxed.downcast::<C>() {
                Ok(command) => handler.handle(*command),
                Err(_) => Outcome::failure(CoreError::unexpected(format!(
                    "mediator routed a mismatched message to {}",
                    type_name::<C>()
                ))),
            };
            let success = outcome.is_success();
            (Box::new(outcome) as Box<dyn Any>, success)
        });
        register(&self.commands, TypeId::of::<C>(), type_name::<C>(), invoke)
    }

    /// Register the single handler for query type `Q`.
    ///
    /// Fan-out (multiple handlers per query type) is intentionally
    /// unsupported; a second registration fails with `DuplicateHandler`.
    pub fn register_query<Q, H>(&self, handler: H) -> CoreResult<()>
    where
        Q: Query,
        H: QueryHandler<Q>,
    {
        let invoke: ErasedInvoke = Arc::new(move |boxed| {
            let outcome = match boxed.downcast::<Q>() {
                Ok(query) => handler.handle(*query),
                Err(_) => Outcome::failure(CoreError::unexpected(format!(
                    "mediator routed a mismatched message to {}",
                    type_name::<Q>()
                ))),
            };
            let success = outcome.is_success();
            (Box::new(outcome) as Box<dyn Any>, success)
        });
        register(&self.queries, TypeId::of::<Q>(), type_name::<Q>(), invoke)
    }

    /// Dispatch a command to its handler.
    pub fn send<C: Command>(&self, command: C) -> Outcome<C::Output, CoreError> {
        self.dispatch::<C::Output>(
            &self.commands,
            MessageKind::Command,
            TypeId::of::<C>(),
            type_name::<C>(),
            Box::new(command),
        )
    }

    /// Dispatch a query to its handler.
    pub fn ask<Q: Query>(&self, query: Q) -> Outcome<Q::Output, CoreError> {
        self.dispatch::<Q::Output>(
            &self.queries,
            MessageKind::Query,
            TypeId::of::<Q>(),
            type_name::<Q>(),
            Box::new(query),
        )
    }

    fn dispatch<Out: 'static>(
        &self,
        registry: &RwLock<HashMap<TypeId, Registered>>,
        kind: MessageKind,
        type_id: TypeId,
        name: &'static str,
        message: Box<dyn Any>,
    ) -> Outcome<Out, CoreError> {
        // Clone the entry and release the lock before invoking: a handler
        // may itself dispatch through this mediator.
        let invoke = {
            let map = match registry.read() {
                Ok(map) => map,
                Err(_) => {
                    return Outcome::failure(CoreError::unexpected(
                        "handler registry lock poisoned",
                    ));
                }
            };
            let Some(entry) = map.get(&type_id) else {
                // No handler means nothing is invoked and no side effect occurs.
                return Outcome::failure(CoreError::HandlerNotRegistered(name.to_string()));
            };
            entry.invoke.clone()
        };

        for hook in &self.hooks {
            hook.before(kind, name);
        }
        let started = Instant::now();

        let (outcome, success) = match catch_unwind(AssertUnwindSafe(|| (*invoke)(message))) {
            Ok((boxed, success)) => {
                let outcome = match boxed.downcast::<Outcome<Out, CoreError>>() {
                    Ok(outcome) => *outcome,
                    Err(_) => Outcome::failure(CoreError::unexpected(format!(
                        "handler for {name} returned an unexpected type"
                    ))),
                };
                (outcome, success)
            }
            Err(payload) => (
                Outcome::failure(CoreError::unexpected(format!(
                    "handler for {name} panicked: {}",
                    panic_message(payload.as_ref())
                ))),
                false,
            ),
        };

        let elapsed = started.elapsed();
        for hook in self.hooks.iter().rev() {
            hook.after(kind, name, success, elapsed);
        }
        outcome
    }
}

fn register(
    registry: &RwLock<HashMap<TypeId, Registered>>,
    type_id: TypeId,
    name: &'static str,
    invoke: ErasedInvoke,
) -> CoreResult<()> {
    let mut map = registry
        .write()
        .map_err(|_| CoreError::unexpected("handler registry lock poisoned"))?;
    if map.contains_key(&type_id) {
        return Err(CoreError::DuplicateHandler(name.to_string()));
    }
    map.insert(type_id, Registered { invoke });
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
