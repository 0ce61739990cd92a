//! Example message types and handlers.
//!
//! - `Ping` (empty payload): replies on the same connection with an empty
//!   `Pong` envelope.
//! - `Transform` (CBOR `{pos_x, pos_y, pos_z}`): logs the position and tags
//!   the connection with it.

use std::{convert::Infallible, sync::Arc};

use serde::{Deserialize, Serialize};
use switchyard_core::{Connection, Envelope, FrameError, RegistrationError, Registry};
use switchyard_proto::decode_payload;

/// Type name of the ping request
pub const PING: &str = "Ping";

/// Type name of the ping reply
pub const PONG: &str = "Pong";

/// Type name of the position update
pub const TRANSFORM: &str = "Transform";

/// Position of an object in 3D space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// X coordinate
    pub pos_x: f32,
    /// Y coordinate
    pub pos_y: f32,
    /// Z coordinate
    pub pos_z: f32,
}

/// Register the `Ping` and `Transform` handlers.
///
/// A registration that conflicts with an existing handler is logged and
/// skipped; the remaining ones still load. Returns the skipped registrations.
pub fn register(registry: &mut Registry) -> Vec<RegistrationError> {
    let results = [
        registry.register_deserializer(PING, |_: &[u8]| Ok::<(), Infallible>(())),
        registry.register_action(PING, |(): (), conn: Arc<Connection>| async move {
            conn.send_envelope(&Envelope::new(PONG, Vec::new())).await
        }),
        registry.register_deserializer(TRANSFORM, decode_payload::<Transform>),
        registry.register_action(TRANSFORM, |t: Transform, conn: Arc<Connection>| async move {
            tracing::info!(
                "Transform from connection {}: x={}, y={}, z={}",
                conn.id(),
                t.pos_x,
                t.pos_y,
                t.pos_z
            );
            conn.set_tag(format!("{},{},{}", t.pos_x, t.pos_y, t.pos_z));
            Ok::<(), FrameError>(())
        }),
    ];

    let skipped: Vec<_> = results.into_iter().filter_map(Result::err).collect();
    for e in &skipped {
        tracing::warn!("Skipped demo registration: {}", e);
    }
    skipped
}

/// Registry with only the demo handlers.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    register(&mut registry);
    registry
}
