//! Server events and delegates.

use crate::server::ServerState;
use crate::session::SessionId;
use hap_core::FirmwareVersion;

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The server state changed or pairings were updated.
    UpdatedState(ServerState),
    /// A session became secured.
    SessionAccepted(SessionId),
    /// A session was released.
    SessionInvalidated(SessionId),
    /// The stored firmware version differed from the running one.
    FirmwareUpdated {
        previous: FirmwareVersion,
        current: FirmwareVersion,
    },
    /// Heart beat counter advanced.
    HeartBeat(u32),
    /// The accessory gained its first pairing or lost its last one.
    PairingStateChanged { paired: bool },
    /// A controller pairing was added or removed.
    ControllerPairingChanged {
        identifier: Vec<u8>,
        public_key: [u8; 32],
        paired: bool,
    },
}

/// Receiver of server events.
pub trait ServerDelegate {
    fn on_event(&mut self, event: ServerEvent);
}

/// Delegate that ignores every event.
pub struct NoOpDelegate;

impl ServerDelegate for NoOpDelegate {
    fn on_event(&mut self, _event: ServerEvent) {}
}

/// Closure-based delegate.
pub struct CallbackDelegate<F>
where
    F: FnMut(ServerEvent),
{
    callback: F,
}

impl<F> CallbackDelegate<F>
where
    F: FnMut(ServerEvent),
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ServerDelegate for CallbackDelegate<F>
where
    F: FnMut(ServerEvent),
{
    fn on_event(&mut self, event: ServerEvent) {
        (self.callback)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn callback_delegate_forwards_events() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let mut delegate = CallbackDelegate::new(move |e| sink.borrow_mut().push(e));

        delegate.on_event(ServerEvent::UpdatedState(ServerState::Running));
        delegate.on_event(ServerEvent::HeartBeat(2));

        assert_eq!(
            *seen.borrow(),
            vec![
                ServerEvent::UpdatedState(ServerState::Running),
                ServerEvent::HeartBeat(2)
            ]
        );
    }

    #[test]
    fn no_op_delegate_accepts_everything() {
        let mut delegate = NoOpDelegate;
        delegate.on_event(ServerEvent::SessionInvalidated(SessionId(9)));
    }
}
