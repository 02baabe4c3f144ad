//! Explicit routing table from command type to handler.
//!
//! Handlers are registered once at startup, keyed by the command's type.
//! Dispatching a command that has no handler fails with
//! [`BusError::HandlerNotFound`] instead of panicking.

use std::any::{Any, TypeId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub trait Command: Send + 'static {
    const NAME: &'static str;
    type Output: Send + 'static;
}

#[async_trait]
pub trait CommandHandler<C>: Send + Sync
where
    C: Command,
{
    async fn handle(&self, command: C) -> C::Output;
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("handler not found: command={0}")]
    HandlerNotFound(&'static str),

    #[error("handler already registered: command={0}")]
    AlreadyRegistered(&'static str),

    #[error("type mismatch: expected={expected}")]
    TypeMismatch { expected: &'static str },
}

type AnyOutput = Box<dyn Any + Send>;

type HandlerFuture = Pin<Box<dyn Future<Output = Result<AnyOutput, BusError>> + Send>>;

type HandlerFn = Arc<dyn Fn(Box<dyn Any + Send>) -> HandlerFuture + Send + Sync>;

#[derive(Clone)]
struct Route {
    name: &'static str,
    call: HandlerFn,
}

#[derive(Default)]
pub struct CommandBus {
    routes: DashMap<TypeId, Route>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<C, H>(&self, handler: Arc<H>) -> Result<(), BusError>
    where
        C: Command,
        H: CommandHandler<C> + 'static,
    {
        let call: HandlerFn = Arc::new(move |boxed: Box<dyn Any + Send>| -> HandlerFuture {
            let handler = Arc::clone(&handler);

            Box::pin(async move {
                // The key and the closure share `C`, so this only fails on a bug in the bus.
                match boxed.downcast::<C>() {
                    Ok(command) => Ok(Box::new(handler.handle(*command).await) as AnyOutput),
                    Err(_) => Err(BusError::TypeMismatch { expected: C::NAME }),
                }
            })
        });

        match self.routes.entry(TypeId::of::<C>()) {
            Entry::Occupied(_) => Err(BusError::AlreadyRegistered(C::NAME)),
            Entry::Vacant(slot) => {
                slot.insert(Route {
                    name: C::NAME,
                    call,
                });
                tracing::debug!(command = C::NAME, "Registered command handler");
                Ok(())
            }
        }
    }

    #[tracing::instrument(name = "Dispatch command", skip_all, fields(command = C::NAME))]
    pub async fn dispatch<C: Command>(&self, command: C) -> Result<C::Output, BusError> {
        let Some(route) = self
            .routes
            .get(&TypeId::of::<C>())
            .map(|route| route.clone())
        else {
            return Err(BusError::HandlerNotFound(C::NAME));
        };

        let output = (route.call)(Box::new(command)).await?;
        output
            .downcast::<C::Output>()
            .map(|output| *output)
            .map_err(|_| BusError::TypeMismatch { expected: route.name })
    }

    pub fn commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.routes.iter().map(|route| route.name).collect();
        names.sort_unstable();
        names
    }
}
