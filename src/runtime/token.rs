//! mio token encoding for session sockets.
//!
//! Every session owns up to two sockets, so a token has to identify both the
//! session and which of its sockets became ready. The layout, which needs a
//! 64-bit `usize`:
//!
//! ```text
//! bit 63     : always 0 (keeps LISTENER_TOKEN unreachable)
//! bits 32..63: slot generation (31 bits)
//! bits 1..32 : slab index (31 bits)
//! bit 0      : side (0 = client, 1 = backend)
//! ```
//!
//! Carrying the generation means an event queued for a closed session is
//! never delivered to a new session that reused the same slot.

use crate::runtime::registry::{SessionHandle, GENERATION_MASK};
use mio::Token;

#[cfg(not(target_pointer_width = "64"))]
compile_error!("session tokens pack a 31-bit generation above bit 32 and need a 64-bit usize");

/// Token of the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Largest slab index that fits in a token.
pub const MAX_INDEX: usize = (1 << 31) - 1;

/// Which of a session's sockets an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The accepted client connection.
    Client,
    /// The outbound connection to the backend.
    Backend,
}

/// Build the token for one side of a session.
pub fn encode(handle: SessionHandle, side: Side) -> Token {
    debug_assert!(handle.index() <= MAX_INDEX, "session index out of token range");
    let generation = (handle.generation() & GENERATION_MASK) as u64;
    let index = (handle.index() & MAX_INDEX) as u64;
    let side = match side {
        Side::Client => 0,
        Side::Backend => 1,
    };
    Token(((generation << 32) | (index << 1) | side) as usize)
}

/// Recover the session handle and side from a token.
///
/// Returns `None` for the listener token.
pub fn decode(token: Token) -> Option<(SessionHandle, Side)> {
    if token == LISTENER_TOKEN {
        return None;
    }
    let raw = token.0 as u64;
    let side = if raw & 1 == 0 {
        Side::Client
    } else {
        Side::Backend
    };
    let index = ((raw >> 1) as usize) & MAX_INDEX;
    let generation = ((raw >> 32) as u32) & GENERATION_MASK;
    Some((SessionHandle::new(index, generation), side))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let handle = SessionHandle::new(12, 7);

        let client = encode(handle, Side::Client);
        let backend = encode(handle, Side::Backend);
        assert_ne!(client, backend);

        assert_eq!(decode(client), Some((handle, Side::Client)));
        assert_eq!(decode(backend), Some((handle, Side::Backend)));
    }

    #[test]
    fn test_extreme_values_stay_clear_of_listener() {
        let handle = SessionHandle::new(MAX_INDEX, GENERATION_MASK);
        let token = encode(handle, Side::Backend);

        assert_ne!(token, LISTENER_TOKEN);
        assert_eq!(decode(token), Some((handle, Side::Backend)));
    }

    #[test]
    fn test_listener_token() {
        assert_eq!(decode(LISTENER_TOKEN), None);
    }

    #[test]
    fn test_generations_distinguish_reused_slots() {
        let old = encode(SessionHandle::new(3, 1), Side::Client);
        let new = encode(SessionHandle::new(3, 2), Side::Client);
        assert_ne!(old, new);
    }
}
