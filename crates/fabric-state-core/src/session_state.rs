//! Per-message view over the state that governs one key and peer.

use crate::counter::MessageCounter;
use crate::crypto::{AuthMode, MessageEncryptionKey};
use crate::error::Result;
use crate::replay::{ReceiveState, ReplayVerdict};

/// Borrowed view of the counters and replay state used for one message.
///
/// Produced by the fabric state for an inbound or outbound message and
/// dropped once the message is handled.
pub struct SessionState<'a> {
    msg_enc_key: Option<&'a MessageEncryptionKey>,
    auth_mode: AuthMode,
    next_msg_id: &'a mut dyn MessageCounter,
    receive: Option<&'a mut ReceiveState>,
}

impl<'a> SessionState<'a> {
    pub fn new(
        msg_enc_key: Option<&'a MessageEncryptionKey>,
        auth_mode: AuthMode,
        next_msg_id: &'a mut dyn MessageCounter,
        receive: Option<&'a mut ReceiveState>,
    ) -> Self {
        Self { msg_enc_key, auth_mode, next_msg_id, receive }
    }

    /// Key used for the message, `None` when unencrypted.
    pub fn msg_enc_key(&self) -> Option<&MessageEncryptionKey> {
        self.msg_enc_key
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn receive_state(&self) -> Option<&ReceiveState> {
        self.receive.as_deref()
    }

    /// Take the next outbound message id.
    pub fn new_message_id(&mut self) -> Result<u32> {
        let id = self.next_msg_id.value();
        self.next_msg_id.advance()?;
        Ok(id)
    }

    /// True until a counter has been accepted from the peer.
    pub fn message_id_not_synchronized(&self) -> bool {
        self.receive.as_ref().map_or(true, |r| !r.synchronized)
    }

    /// Check an inbound message id and record it if it is new.
    pub fn is_duplicate_message(&mut self, msg_id: u32) -> bool {
        let group_keyed = self.msg_enc_key.map_or(false, |k| k.key_id.is_app_group_key());
        let encrypted = self.msg_enc_key.is_some();

        let receive = match self.receive.as_deref_mut() {
            // Unencrypted over a connection: ordering and duplicates are handled by the transport.
            None if !encrypted => return false,
            None => return true,
            Some(receive) => receive,
        };

        if !receive.synchronized {
            // Group-keyed peers only synchronize through a counter sync response.
            if group_keyed {
                return true;
            }
            receive.synchronize(msg_id);
            return false;
        }

        receive.check_and_record(msg_id, encrypted) == ReplayVerdict::Duplicate
    }
}
