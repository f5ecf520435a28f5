//! Now-playing surface for connected clients.
//!
//! The daemon has no lock screen of its own; it mirrors metadata, transport
//! state and the enabled transport buttons to clients, which render them on
//! whatever surface their platform offers.  Button presses come back as
//! `Command::Transport`.

use std::collections::BTreeSet;

use tokio::sync::broadcast;
use tuner_player::media_session::{MediaSessionError, MediaSessionHost};
use tuner_proto::protocol::{NowPlaying, TransportAction, TransportState};

use crate::BroadcastMessage;

pub struct BroadcastHost {
    sender: broadcast::Sender<BroadcastMessage>,
    enabled: bool,
    actions: BTreeSet<TransportAction>,
}

impl BroadcastHost {
    /// A disabled host behaves like an unsupported platform.
    pub fn new(sender: broadcast::Sender<BroadcastMessage>, enabled: bool) -> Self {
        Self {
            sender,
            enabled,
            actions: BTreeSet::new(),
        }
    }

    fn publish(&self, msg: BroadcastMessage) -> Result<(), MediaSessionError> {
        if !self.enabled {
            return Err(MediaSessionError::Unsupported);
        }
        // No subscribers is fine
        let _ = self.sender.send(msg);
        Ok(())
    }
}

impl MediaSessionHost for BroadcastHost {
    fn set_metadata(&mut self, metadata: NowPlaying) -> Result<(), MediaSessionError> {
        self.publish(BroadcastMessage::NowPlaying(metadata))
    }

    fn set_playback_state(&mut self, state: TransportState) -> Result<(), MediaSessionError> {
        self.publish(BroadcastMessage::Transport(state))
    }

    fn set_action_handler(
        &mut self,
        action: TransportAction,
        enabled: bool,
    ) -> Result<(), MediaSessionError> {
        if !self.enabled {
            return Err(MediaSessionError::Unsupported);
        }
        if enabled {
            self.actions.insert(action);
        } else {
            self.actions.remove(&action);
        }
        self.publish(BroadcastMessage::TransportActions(
            self.actions.iter().copied().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirrors_to_broadcast() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut host = BroadcastHost::new(tx, true);

        host.set_playback_state(TransportState::Playing).unwrap();
        host.set_action_handler(TransportAction::Play, true).unwrap();
        host.set_action_handler(TransportAction::Stop, true).unwrap();

        assert!(matches!(
            rx.try_recv(),
            Ok(BroadcastMessage::Transport(TransportState::Playing))
        ));
        assert!(matches!(rx.try_recv(), Ok(BroadcastMessage::TransportActions(a)) if a.len() == 1));
        match rx.try_recv() {
            Ok(BroadcastMessage::TransportActions(actions)) => {
                assert_eq!(actions, vec![TransportAction::Play, TransportAction::Stop]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_disabled_host_is_unsupported() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut host = BroadcastHost::new(tx, false);
        assert_eq!(
            host.set_playback_state(TransportState::Paused),
            Err(MediaSessionError::Unsupported)
        );
        assert!(rx.try_recv().is_err());
    }
}
