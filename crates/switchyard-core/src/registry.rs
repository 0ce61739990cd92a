//! Type-name registry: deserializers and actions keyed by envelope type.
//!
//! Loading happens once, before the server starts. After that the registry
//! is frozen behind an `Arc` and only read, so dispatch takes no locks.
//!
//! Registration is first-wins. A second deserializer or action for the same
//! type name is rejected with a warning and the original stays in place.
//!
//! # Failure isolation
//!
//! Handler failures are scoped to the message that triggered them:
//!
//! - Unknown types (no deserializer or no action) are dropped silently.
//! - A deserializer error or panic becomes [`DispatchError::Deserialization`].
//! - An action error or panic becomes [`DispatchError::Action`]. Actions run
//!   on their own task so a panic unwinds that task only.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
};

use switchyard_proto::Envelope;

use crate::{
    connection::Connection,
    error::{DispatchError, HandlerKind, RegistrationError},
};

type DeserializedValue = Box<dyn Any + Send>;

type ActionFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

type ErasedDeserializer = Box<dyn Fn(&[u8]) -> Result<DeserializedValue, String> + Send + Sync>;

type ErasedAction = Box<dyn Fn(DeserializedValue, Arc<Connection>) -> ActionFuture + Send + Sync>;

/// Result of dispatching one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Both handlers ran successfully
    Handled,
    /// No deserializer or no action for the type; envelope discarded
    Dropped,
}

/// Maps type names to a deserializer and an action.
#[derive(Default)]
pub struct Registry {
    /// Type name → payload deserializer
    deserializers: HashMap<String, ErasedDeserializer>,
    /// Type name → action on the deserialized value
    actions: HashMap<String, ErasedAction>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the deserializer for `type_name`.
    ///
    /// The deserializer's output type must match the value type of the action
    /// registered for the same name; a mismatch surfaces as
    /// [`DispatchError::Action`] at dispatch time.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::Conflict` if a deserializer already exists for
    ///   `type_name` (the existing one is kept)
    /// - `RegistrationError::EmptyTypeName` if `type_name` is empty
    pub fn register_deserializer<T, E, F>(
        &mut self,
        type_name: impl Into<String>,
        deserialize: F,
    ) -> Result<(), RegistrationError>
    where
        T: Send + 'static,
        E: fmt::Display,
        F: Fn(&[u8]) -> Result<T, E> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        check_name(&type_name, HandlerKind::Deserializer, self.deserializers.contains_key(&type_name))?;

        let erased: ErasedDeserializer = Box::new(move |bytes: &[u8]| {
            match panic::catch_unwind(AssertUnwindSafe(|| deserialize(bytes))) {
                Ok(Ok(value)) => Ok(Box::new(value) as DeserializedValue),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err("deserializer panicked".to_string()),
            }
        });

        tracing::info!(%type_name, "loaded deserializer");
        self.deserializers.insert(type_name, erased);
        Ok(())
    }

    /// Register the action for `type_name`.
    ///
    /// The action receives the value produced by the deserializer registered
    /// under the same name and the connection the envelope arrived on.
    ///
    /// # Errors
    ///
    /// - `RegistrationError::Conflict` if an action already exists for
    ///   `type_name` (the existing one is kept)
    /// - `RegistrationError::EmptyTypeName` if `type_name` is empty
    pub fn register_action<T, E, F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        action: F,
    ) -> Result<(), RegistrationError>
    where
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(T, Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let type_name = type_name.into();
        check_name(&type_name, HandlerKind::Action, self.actions.contains_key(&type_name))?;

        let erased: ErasedAction = Box::new(move |value: DeserializedValue, conn: Arc<Connection>| -> ActionFuture {
            match value.downcast::<T>() {
                Ok(value) => {
                    let fut = action(*value, conn);
                    Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
                },
                Err(_) => {
                    let reason = format!("deserialized value is not a {}", std::any::type_name::<T>());
                    Box::pin(std::future::ready(Err(reason)))
                },
            }
        });

        tracing::info!(%type_name, "loaded action");
        self.actions.insert(type_name, erased);
        Ok(())
    }

    /// Whether a deserializer exists for `type_name`.
    pub fn has_deserializer(&self, type_name: &str) -> bool {
        self.deserializers.contains_key(type_name)
    }

    /// Whether an action exists for `type_name`.
    pub fn has_action(&self, type_name: &str) -> bool {
        self.actions.contains_key(type_name)
    }

    /// Whether `type_name` has both halves and will be dispatched.
    pub fn is_routable(&self, type_name: &str) -> bool {
        self.has_deserializer(type_name) && self.has_action(type_name)
    }

    /// Routable type names, sorted.
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .deserializers
            .keys()
            .filter(|name| self.actions.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Number of routable type names.
    pub fn len(&self) -> usize {
        self.deserializers.keys().filter(|name| self.actions.contains_key(name.as_str())).count()
    }

    /// Whether no type name is routable.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Route an envelope to its handlers.
    ///
    /// Must be called from within a Tokio runtime; the action runs on a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// - `DispatchError::Deserialization` if the deserializer fails
    /// - `DispatchError::Action` if the action fails
    pub async fn dispatch(
        &self,
        envelope: Envelope,
        conn: &Arc<Connection>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let (type_name, payload) = envelope.into_parts();

        let (Some(deserialize), Some(act)) =
            (self.deserializers.get(&type_name), self.actions.get(&type_name))
        else {
            tracing::debug!(connection_id = conn.id(), %type_name, "no handler, dropping envelope");
            return Ok(DispatchOutcome::Dropped);
        };

        let value = deserialize(&payload[..])
            .map_err(|reason| DispatchError::Deserialization { type_name: type_name.clone(), reason })?;

        let outcome = tokio::spawn(act(value, Arc::clone(conn))).await;
        match outcome {
            Ok(Ok(())) => Ok(DispatchOutcome::Handled),
            Ok(Err(reason)) => Err(DispatchError::Action { type_name, reason }),
            Err(e) if e.is_panic() => {
                Err(DispatchError::Action { type_name, reason: "action panicked".to_string() })
            },
            Err(e) => Err(DispatchError::Action { type_name, reason: e.to_string() }),
        }
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut deserializers: Vec<&String> = self.deserializers.keys().collect();
        let mut actions: Vec<&String> = self.actions.keys().collect();
        deserializers.sort_unstable();
        actions.sort_unstable();

        f.debug_struct("Registry")
            .field("deserializers", &deserializers)
            .field("actions", &actions)
            .finish()
    }
}

fn check_name(type_name: &str, kind: HandlerKind, exists: bool) -> Result<(), RegistrationError> {
    if type_name.is_empty() {
        tracing::warn!(%kind, "rejected registration with empty type name");
        return Err(RegistrationError::EmptyTypeName { kind });
    }

    if exists {
        tracing::warn!(%type_name, %kind, "already loaded, keeping the first registration");
        return Err(RegistrationError::Conflict { type_name: type_name.to_string(), kind });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{
        convert::Infallible,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use tokio::io::{AsyncReadExt, DuplexStream, duplex, split};

    use super::*;
    use crate::{error::TransportError, transport::StreamTransport};

    fn connection() -> (Arc<Connection>, DuplexStream) {
        let (local, remote) = duplex(1024);
        let (reader, writer) = split(local);
        (Arc::new(Connection::new(1, StreamTransport::new(reader, writer, None))), remote)
    }

    fn unit(_: &[u8]) -> Result<(), Infallible> {
        Ok(())
    }

    #[tokio::test]
    async fn ping_action_replies_on_same_connection() {
        let mut registry = Registry::new();
        registry.register_deserializer("Ping", unit).unwrap();
        registry
            .register_action("Ping", |(): (), conn: Arc<Connection>| async move {
                conn.send(b"ack").await
            })
            .unwrap();

        let (conn, mut remote) = connection();
        let outcome = registry.dispatch(Envelope::new("Ping", Vec::new()), &conn).await;
        assert_eq!(outcome, Ok(DispatchOutcome::Handled));

        let mut buf = [0u8; 3];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ack");
    }

    #[tokio::test]
    async fn first_action_registration_wins() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let mut registry = Registry::new();
        registry.register_deserializer("Foo", unit).unwrap();

        let counter = Arc::clone(&first);
        registry
            .register_action("Foo", move |(): (), _conn: Arc<Connection>| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<(), Infallible>(()) }
            })
            .unwrap();

        let counter = Arc::clone(&second);
        let result = registry.register_action("Foo", move |(): (), _conn: Arc<Connection>| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<(), Infallible>(()) }
        });
        assert_eq!(
            result,
            Err(RegistrationError::Conflict { type_name: "Foo".to_string(), kind: HandlerKind::Action })
        );

        let (conn, _remote) = connection();
        registry.dispatch(Envelope::new("Foo", Vec::new()), &conn).await.unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn first_deserializer_registration_wins() {
        let mut registry = Registry::new();
        registry.register_deserializer("Num", |_: &[u8]| Ok::<u32, Infallible>(1)).unwrap();
        let result = registry.register_deserializer("Num", |_: &[u8]| Ok::<u32, Infallible>(2));
        assert!(matches!(result, Err(RegistrationError::Conflict { .. })));

        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        registry
            .register_action("Num", move |n: u32, _conn: Arc<Connection>| {
                sink.store(n as usize, Ordering::SeqCst);
                async { Ok::<(), Infallible>(()) }
            })
            .unwrap();

        let (conn, _remote) = connection();
        registry.dispatch(Envelope::new("Num", Vec::new()), &conn).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_type_name_is_rejected() {
        let mut registry = Registry::new();
        let result = registry.register_deserializer("", unit);
        assert_eq!(result, Err(RegistrationError::EmptyTypeName { kind: HandlerKind::Deserializer }));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_type_is_dropped() {
        let registry = Registry::new();
        let (conn, _remote) = connection();

        let outcome = registry.dispatch(Envelope::new("Nope", vec![1]), &conn).await;
        assert_eq!(outcome, Ok(DispatchOutcome::Dropped));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn half_registered_type_is_dropped() {
        let mut registry = Registry::new();
        registry.register_deserializer("Half", unit).unwrap();
        assert!(!registry.is_routable("Half"));

        let (conn, _remote) = connection();
        let outcome = registry.dispatch(Envelope::new("Half", Vec::new()), &conn).await;
        assert_eq!(outcome, Ok(DispatchOutcome::Dropped));
    }

    #[tokio::test]
    async fn deserializer_error_is_isolated() {
        let mut registry = Registry::new();
        registry
            .register_deserializer("Strict", |bytes: &[u8]| {
                if bytes.is_empty() { Err("empty payload") } else { Ok(bytes.len()) }
            })
            .unwrap();
        registry
            .register_action("Strict", |_: usize, _conn: Arc<Connection>| async {
                Ok::<(), Infallible>(())
            })
            .unwrap();

        let (conn, _remote) = connection();
        let result = registry.dispatch(Envelope::new("Strict", Vec::new()), &conn).await;
        assert_eq!(
            result,
            Err(DispatchError::Deserialization {
                type_name: "Strict".to_string(),
                reason: "empty payload".to_string(),
            })
        );
        assert!(!conn.is_closed());

        let result = registry.dispatch(Envelope::new("Strict", vec![1, 2]), &conn).await;
        assert_eq!(result, Ok(DispatchOutcome::Handled));
    }

    #[tokio::test]
    async fn action_error_is_isolated() {
        let mut registry = Registry::new();
        registry.register_deserializer("Fail", unit).unwrap();
        registry
            .register_action("Fail", |(): (), _conn: Arc<Connection>| async {
                Err::<(), _>(TransportError::Io("boom".to_string()))
            })
            .unwrap();

        let (conn, _remote) = connection();
        let result = registry.dispatch(Envelope::new("Fail", Vec::new()), &conn).await;
        assert_eq!(
            result,
            Err(DispatchError::Action {
                type_name: "Fail".to_string(),
                reason: "i/o error: boom".to_string(),
            })
        );
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn action_panic_is_isolated() {
        let mut registry = Registry::new();
        registry.register_deserializer("Bad", unit).unwrap();
        registry
            .register_action("Bad", |(): (), _conn: Arc<Connection>| async {
                if true {
                    panic!("handler bug");
                }
                Ok::<(), Infallible>(())
            })
            .unwrap();

        let (conn, _remote) = connection();
        let result = registry.dispatch(Envelope::new("Bad", Vec::new()), &conn).await;
        assert!(matches!(result, Err(DispatchError::Action { .. })));
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn deserializer_panic_is_isolated() {
        let mut registry = Registry::new();
        registry
            .register_deserializer("Bad", |_: &[u8]| -> Result<(), Infallible> {
                panic!("decoder bug")
            })
            .unwrap();
        registry
            .register_action("Bad", |(): (), _conn: Arc<Connection>| async {
                Ok::<(), Infallible>(())
            })
            .unwrap();

        let (conn, _remote) = connection();
        let result = registry.dispatch(Envelope::new("Bad", Vec::new()), &conn).await;
        assert_eq!(
            result,
            Err(DispatchError::Deserialization {
                type_name: "Bad".to_string(),
                reason: "deserializer panicked".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn mismatched_value_type_fails_the_action() {
        let mut registry = Registry::new();
        registry.register_deserializer("Mixed", |_: &[u8]| Ok::<u8, Infallible>(1)).unwrap();
        registry
            .register_action("Mixed", |_: String, _conn: Arc<Connection>| async {
                Ok::<(), Infallible>(())
            })
            .unwrap();

        let (conn, _remote) = connection();
        let result = registry.dispatch(Envelope::new("Mixed", Vec::new()), &conn).await;
        assert!(matches!(result, Err(DispatchError::Action { .. })));
    }

    #[test]
    fn type_names_lists_routable_types() {
        let mut registry = Registry::new();
        registry.register_deserializer("B", unit).unwrap();
        registry.register_deserializer("A", unit).unwrap();
        registry.register_deserializer("OnlyHalf", unit).unwrap();
        for name in ["A", "B"] {
            registry
                .register_action(name, |(): (), _conn: Arc<Connection>| async {
                    Ok::<(), Infallible>(())
                })
                .unwrap();
        }

        assert_eq!(registry.type_names(), vec!["A", "B"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.has_deserializer("OnlyHalf"));
        assert!(!registry.has_action("OnlyHalf"));
    }
}
