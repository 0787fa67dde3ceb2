//! Per-call conversation state
//!
//! Each phone call owns a [`CallSession`] holding a bounded
//! [`ConversationBuffer`] and the call's position in the turn state machine.

mod buffer;
mod session;

pub use buffer::{ConversationBuffer, ExchangeRecord, HISTORY_CAPACITY, Role};
pub use session::{CallEvent, CallSession, CallState, DEFAULT_CALL_KEY, SessionStore};
