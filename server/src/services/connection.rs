//! Connection handles shared between the registries and the WebSocket actors.

use actix::prelude::*;
use std::fmt;
use uuid::Uuid;

/// A pre-serialized JSON text frame pushed to a live WebSocket connection.
#[derive(Message, Debug, Clone)]
#[rtype(result = "()")]
pub struct PushFrame(pub String);

/// Non-owning reference to one live connection.
///
/// The WebSocket actor owns its own lifetime; registries hold only the
/// connection id plus the actor's mailbox. Two handles are equal when they
/// refer to the same connection, regardless of how they were cloned.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    tx: Recipient<PushFrame>,
}

impl ConnectionHandle {
    pub fn new(id: Uuid, tx: Recipient<PushFrame>) -> Self {
        Self { id, tx }
    }

    /// Queue a frame on the connection's mailbox. Never blocks; returns
    /// whether the mailbox accepted the frame.
    pub fn try_send(&self, frame: &str) -> bool {
        self.tx.try_send(PushFrame(frame.to_string())).is_ok()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Minimal actor that records every frame pushed at it.
    pub struct Collector {
        pub frames: Arc<Mutex<Vec<String>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<PushFrame> for Collector {
        type Result = ();

        fn handle(&mut self, msg: PushFrame, _ctx: &mut Context<Self>) {
            self.frames.lock().unwrap().push(msg.0);
        }
    }

    /// Spawn a collector actor and return a handle to it plus its frame log.
    /// Must run inside an actix system (`#[actix_rt::test]`).
    pub fn collector_handle() -> (ConnectionHandle, Arc<Mutex<Vec<String>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector {
            frames: frames.clone(),
        }
        .start();
        (
            ConnectionHandle::new(Uuid::new_v4(), addr.recipient()),
            frames,
        )
    }
}
