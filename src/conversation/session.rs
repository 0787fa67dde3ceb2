//! Call sessions and the per-call turn state machine

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::{ConversationBuffer, ExchangeRecord};
use crate::{Error, Result};

/// Session key used when the platform does not identify the call
pub const DEFAULT_CALL_KEY: &str = "default";

/// Position of a call in the greet/listen/reply loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Call answered, greeting not yet delivered
    Greeting,
    /// Capture window is open on the caller's phone
    AwaitingSpeech,
    /// Transcript received, reply being generated and rendered
    Processing,
    /// No further capture will be requested
    Ended,
}

/// Inputs that move a call between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Greeting markup returned with a capture window
    Greeted,
    /// Platform posted a non-empty transcript
    SpeechReceived,
    /// Generative reply stored in history
    ReplyGenerated,
    /// Reply audio returned together with a new capture window
    ReplyPlayed,
    /// Platform posted no transcript
    NoSpeech,
    /// Reply generation or rendering failed
    Failed,
    /// Platform reported the call finished
    Hangup,
}

impl CallState {
    /// Resolve the state after `event`, or `None` if the transition is not allowed
    #[must_use]
    pub const fn next(self, event: CallEvent) -> Option<Self> {
        use CallEvent as E;
        use CallState as S;

        match (self, event) {
            (S::Greeting, E::Greeted) | (S::Processing, E::ReplyPlayed) => Some(S::AwaitingSpeech),
            (S::AwaitingSpeech, E::SpeechReceived) | (S::Processing, E::ReplyGenerated) => {
                Some(S::Processing)
            }
            (S::Greeting | S::AwaitingSpeech, E::NoSpeech)
            | (S::Processing, E::Failed)
            | (_, E::Hangup) => Some(S::Ended),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_ended(self) -> bool {
        matches!(self, Self::Ended)
    }
}

/// Conversation state for one phone call
#[derive(Debug, Clone)]
pub struct CallSession {
    call_sid: String,
    state: CallState,
    history: ConversationBuffer,
    turns: u32,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl CallSession {
    /// Open a session in [`CallState::Greeting`] with empty history
    pub fn new(call_sid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            call_sid: call_sid.into(),
            state: CallState::Greeting,
            history: ConversationBuffer::new(),
            turns: 0,
            started_at: now,
            last_activity: now,
        }
    }

    /// Apply an event, failing without side effects if it is not allowed
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the current state rejects `event`
    pub fn apply(&mut self, event: CallEvent) -> Result<CallState> {
        let next = self
            .state
            .next(event)
            .ok_or_else(|| Error::InvalidTransition {
                call_sid: self.call_sid.clone(),
                state: self.state,
                event,
            })?;

        tracing::trace!(
            call_sid = %self.call_sid,
            from = ?self.state,
            to = ?next,
            ?event,
            "call state transition"
        );

        self.state = next;
        self.last_activity = Utc::now();
        Ok(next)
    }

    #[must_use]
    pub const fn state(&self) -> CallState {
        self.state
    }

    /// Completed reply turns so far
    #[must_use]
    pub const fn turns(&self) -> u32 {
        self.turns
    }

    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// Registry of live call sessions keyed by call identifier
///
/// The lock is only held for bookkeeping; callers must not keep it across
/// requests to external services.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, CallSession>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh session for a new call, discarding any previous history
    /// under the same key, and mark the greeting delivered
    pub async fn start_call(&self, call_sid: &str) -> CallState {
        let mut session = CallSession::new(call_sid);
        let state = session
            .apply(CallEvent::Greeted)
            .unwrap_or(CallState::AwaitingSpeech);

        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.insert(call_sid.to_string(), session) {
            tracing::debug!(
                call_sid,
                discarded = previous.history.len(),
                "replaced existing call session"
            );
        }
        state
    }

    /// Record the caller's transcript and return the history to prompt with
    ///
    /// Opens a session on the spot when the call is unknown (for example
    /// after a restart), so the loop survives losing in-memory state.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the call is already processing
    /// a turn or has ended
    pub async fn begin_turn(&self, call_sid: &str, transcript: &str) -> Result<Vec<ExchangeRecord>> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(call_sid.to_string()).or_insert_with(|| {
            tracing::warn!(call_sid, "turn for unknown call, opening session");
            let mut session = CallSession::new(call_sid);
            session.state = CallState::AwaitingSpeech;
            session
        });

        session.apply(CallEvent::SpeechReceived)?;
        session.history.push(ExchangeRecord::user(transcript));
        Ok(session.history.to_vec())
    }

    /// Store the generated reply in the call's history
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the call is not processing a turn
    pub async fn record_reply(&self, call_sid: &str, reply: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = Self::existing(&mut sessions, call_sid, CallEvent::ReplyGenerated)?;
        session.apply(CallEvent::ReplyGenerated)?;
        session.history.push(ExchangeRecord::assistant(reply));
        Ok(())
    }

    /// Reopen the capture window after a reply was rendered
    ///
    /// Returns the number of completed turns for the call.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the call is not processing a turn
    pub async fn complete_turn(&self, call_sid: &str) -> Result<u32> {
        let mut sessions = self.sessions.lock().await;
        let session = Self::existing(&mut sessions, call_sid, CallEvent::ReplyPlayed)?;
        session.apply(CallEvent::ReplyPlayed)?;
        session.turns += 1;
        Ok(session.turns)
    }

    /// Move a call to [`CallState::Ended`] through a terminal event
    ///
    /// Unknown calls are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTransition` if the call's state rejects `event`
    pub async fn end_call(&self, call_sid: &str, event: CallEvent) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(call_sid) {
            session.apply(event)?;
        }
        Ok(())
    }

    /// Drop a call's session entirely
    pub async fn remove(&self, call_sid: &str) -> Option<CallSession> {
        self.sessions.lock().await.remove(call_sid)
    }

    /// Snapshot of a call's history, oldest first
    pub async fn history(&self, call_sid: &str) -> Option<Vec<ExchangeRecord>> {
        self.sessions
            .lock()
            .await
            .get(call_sid)
            .map(|s| s.history.to_vec())
    }

    pub async fn state(&self, call_sid: &str) -> Option<CallState> {
        self.sessions.lock().await.get(call_sid).map(CallSession::state)
    }

    /// Number of tracked calls
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Remove ended sessions and sessions idle for longer than `idle_timeout`
    ///
    /// Returns the number of sessions removed.
    pub async fn sweep(&self, idle_timeout: TimeDelta, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|call_sid, session| {
            let idle = now.signed_duration_since(session.last_activity);
            let keep = !session.state.is_ended() && idle <= idle_timeout;
            if !keep {
                tracing::debug!(
                    call_sid = %call_sid,
                    state = ?session.state,
                    idle_secs = idle.num_seconds(),
                    "dropping call session"
                );
            }
            keep
        });
        before - sessions.len()
    }

    fn existing<'a>(
        sessions: &'a mut HashMap<String, CallSession>,
        call_sid: &str,
        event: CallEvent,
    ) -> Result<&'a mut CallSession> {
        sessions
            .get_mut(call_sid)
            .ok_or_else(|| Error::InvalidTransition {
                call_sid: call_sid.to_string(),
                state: CallState::Ended,
                event,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{HISTORY_CAPACITY, Role};

    #[test]
    fn test_state_machine_happy_path() {
        let mut session = CallSession::new("CA1");
        assert_eq!(session.state(), CallState::Greeting);
        assert_eq!(session.apply(CallEvent::Greeted).unwrap(), CallState::AwaitingSpeech);
        assert_eq!(session.apply(CallEvent::SpeechReceived).unwrap(), CallState::Processing);
        assert_eq!(session.apply(CallEvent::ReplyGenerated).unwrap(), CallState::Processing);
        assert_eq!(session.apply(CallEvent::ReplyPlayed).unwrap(), CallState::AwaitingSpeech);
        assert_eq!(session.apply(CallEvent::NoSpeech).unwrap(), CallState::Ended);
    }

    #[test]
    fn test_state_machine_rejects_invalid_transitions() {
        assert_eq!(CallState::Greeting.next(CallEvent::ReplyPlayed), None);
        assert_eq!(CallState::AwaitingSpeech.next(CallEvent::ReplyGenerated), None);
        assert_eq!(CallState::Processing.next(CallEvent::SpeechReceived), None);
        assert_eq!(CallState::Ended.next(CallEvent::SpeechReceived), None);
        assert_eq!(CallState::Ended.next(CallEvent::Greeted), None);

        let mut session = CallSession::new("CA1");
        let err = session.apply(CallEvent::ReplyPlayed).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(session.state(), CallState::Greeting);
    }

    #[test]
    fn test_hangup_ends_from_any_state() {
        for state in [
            CallState::Greeting,
            CallState::AwaitingSpeech,
            CallState::Processing,
            CallState::Ended,
        ] {
            assert_eq!(state.next(CallEvent::Hangup), Some(CallState::Ended));
        }
    }

    #[tokio::test]
    async fn test_start_call_clears_history() {
        let store = SessionStore::new();
        store.start_call("CA1").await;
        store.begin_turn("CA1", "hello").await.unwrap();
        store.record_reply("CA1", "hi there").await.unwrap();
        store.complete_turn("CA1").await.unwrap();
        assert_eq!(store.history("CA1").await.unwrap().len(), 2);

        let state = store.start_call("CA1").await;
        assert_eq!(state, CallState::AwaitingSpeech);
        assert!(store.history("CA1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_calls_do_not_share_history() {
        let store = SessionStore::new();
        store.start_call("CA1").await;
        store.start_call("CA2").await;

        store.begin_turn("CA1", "first caller").await.unwrap();
        store.begin_turn("CA2", "second caller").await.unwrap();

        let one = store.history("CA1").await.unwrap();
        let two = store.history("CA2").await.unwrap();
        assert_eq!(one, vec![ExchangeRecord::user("first caller")]);
        assert_eq!(two, vec![ExchangeRecord::user("second caller")]);
    }

    #[tokio::test]
    async fn test_history_stays_bounded_over_many_turns() {
        let store = SessionStore::new();
        store.start_call("CA1").await;

        for turn in 0..10 {
            let history = store.begin_turn("CA1", &format!("q{turn}")).await.unwrap();
            assert!(history.len() <= HISTORY_CAPACITY);
            assert_eq!(history.last().unwrap().role(), Role::User);

            store.record_reply("CA1", &format!("a{turn}")).await.unwrap();
            let turns = store.complete_turn("CA1").await.unwrap();
            assert_eq!(turns, turn + 1);
            assert!(store.history("CA1").await.unwrap().len() <= HISTORY_CAPACITY);
        }
    }

    #[tokio::test]
    async fn test_begin_turn_opens_unknown_call() {
        let store = SessionStore::new();
        let history = store.begin_turn("CA9", "hello").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(store.state("CA9").await, Some(CallState::Processing));
    }

    #[tokio::test]
    async fn test_begin_turn_while_processing_is_rejected() {
        let store = SessionStore::new();
        store.start_call("CA1").await;
        store.begin_turn("CA1", "one").await.unwrap();

        let err = store.begin_turn("CA1", "two").await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                state: CallState::Processing,
                event: CallEvent::SpeechReceived,
                ..
            }
        ));
        assert_eq!(store.history("CA1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_reply_for_unknown_call_fails() {
        let store = SessionStore::new();
        assert!(store.record_reply("missing", "reply").await.is_err());
    }

    #[tokio::test]
    async fn test_end_call_ignores_unknown_call() {
        let store = SessionStore::new();
        store.end_call("missing", CallEvent::NoSpeech).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_removes_ended_and_idle_sessions() {
        let store = SessionStore::new();
        store.start_call("live").await;
        store.start_call("ended").await;
        store.end_call("ended", CallEvent::NoSpeech).await.unwrap();
        store.start_call("idle").await;

        let removed = store.sweep(TimeDelta::minutes(15), Utc::now()).await;
        assert_eq!(removed, 1);
        assert_eq!(store.state("ended").await, None);

        let later = Utc::now() + TimeDelta::minutes(30);
        let removed = store.sweep(TimeDelta::minutes(15), later).await;
        assert_eq!(removed, 2);
        assert!(store.is_empty().await);
    }
}
