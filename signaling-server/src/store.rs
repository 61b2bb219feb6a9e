//! Persistent storage of call and participant rows.
//!
//! The lifecycle manager is the only writer. Every status change goes through
//! [`CallStore::update_status_if`], a compare-and-set on the persisted status,
//! so concurrent transitions on one call never both succeed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use peer_calls_protocol::{Call, CallId, CallParticipant, CallStatus, ConversationId};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// New values written by a successful conditional status update.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub to: CallStatus,
    pub at: DateTime<Utc>,
    pub error_reason: Option<String>,
    /// Participant row inserted together with the status change.
    pub joining: Option<CallParticipant>,
}

impl StatusChange {
    pub const fn new(to: CallStatus, at: DateTime<Utc>) -> Self {
        Self {
            to,
            at,
            error_reason: None,
            joining: None,
        }
    }

    #[must_use]
    pub fn with_participant(mut self, participant: CallParticipant) -> Self {
        self.joining = Some(participant);
        self
    }

    #[must_use]
    pub fn with_error_reason(mut self, reason: impl Into<String>) -> Self {
        self.error_reason = Some(reason.into());
        self
    }
}

#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert a ringing call with its initiator's participant row.
    /// Fails with [`StoreError::LiveCallExists`] if the conversation already
    /// has a ringing or active call; the check and insert are atomic.
    async fn create_call(&self, call: Call, initiator: CallParticipant) -> Result<(), StoreError>;

    async fn get_call(&self, call_id: &CallId) -> Result<Option<Call>, StoreError>;

    async fn find_live_call(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Call>, StoreError>;

    /// Calls still ringing that were created before `cutoff`.
    async fn ringing_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Call>, StoreError>;

    /// Apply `change` only if the persisted status is one of `expected` and the
    /// edge exists in the call state graph. Returns the updated row, or `None`
    /// when the condition did not hold (or the call does not exist).
    ///
    /// A participant carried by the change is inserted in the same atomic step;
    /// a duplicate fails the whole update with
    /// [`StoreError::DuplicateParticipant`].
    async fn update_status_if(
        &self,
        call_id: &CallId,
        expected: &[CallStatus],
        change: StatusChange,
    ) -> Result<Option<Call>, StoreError>;

    async fn add_participant(&self, participant: CallParticipant) -> Result<(), StoreError>;

    /// Set `left_at` on every participant row of the call that is still open.
    async fn close_participants(&self, call_id: &CallId, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn participants(&self, call_id: &CallId) -> Result<Vec<CallParticipant>, StoreError>;
}

#[derive(Default)]
struct Tables {
    calls: HashMap<CallId, Call>,
    participants: Vec<CallParticipant>,
}

/// [`CallStore`] kept in process memory.
///
/// A single write lock guards both tables, which gives every method the
/// atomicity of a single-statement update.
#[derive(Default)]
pub struct MemoryCallStore {
    tables: RwLock<Tables>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn create_call(&self, call: Call, initiator: CallParticipant) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let live_exists = tables
            .calls
            .values()
            .any(|c| c.conversation_id == call.conversation_id && c.status.is_live());
        if live_exists {
            return Err(StoreError::LiveCallExists(call.conversation_id));
        }
        tables.calls.insert(call.id.clone(), call);
        tables.participants.push(initiator);
        Ok(())
    }

    async fn get_call(&self, call_id: &CallId) -> Result<Option<Call>, StoreError> {
        Ok(self.tables.read().await.calls.get(call_id).cloned())
    }

    async fn find_live_call(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<Call>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .calls
            .values()
            .find(|c| &c.conversation_id == conversation_id && c.status.is_live())
            .cloned())
    }

    async fn ringing_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Call>, StoreError> {
        let tables = self.tables.read().await;
        let mut calls: Vec<Call> = tables
            .calls
            .values()
            .filter(|c| c.status == CallStatus::Ringing && c.created_at < cutoff)
            .cloned()
            .collect();
        calls.sort_by_key(|c| c.created_at);
        Ok(calls)
    }

    async fn update_status_if(
        &self,
        call_id: &CallId,
        expected: &[CallStatus],
        change: StatusChange,
    ) -> Result<Option<Call>, StoreError> {
        let mut guard = self.tables.write().await;
        let tables = &mut *guard;
        let Some(call) = tables.calls.get_mut(call_id) else {
            return Ok(None);
        };
        if !expected.contains(&call.status) || !call.status.can_transition_to(change.to) {
            return Ok(None);
        }
        if let Some(joining) = change.joining {
            if has_participant(&tables.participants, &joining) {
                return Err(StoreError::DuplicateParticipant {
                    call_id: joining.call_id,
                    user_id: joining.user_id.into_inner(),
                });
            }
            tables.participants.push(joining);
        }

        call.status = change.to;
        call.updated_at = change.at;
        if change.to == CallStatus::Active {
            call.started_at = Some(change.at);
        }
        if change.to.is_terminal() {
            call.ended_at = Some(change.at);
        }
        if change.to == CallStatus::Failed {
            call.error_reason = change.error_reason;
        }
        Ok(Some(call.clone()))
    }

    async fn add_participant(&self, participant: CallParticipant) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if has_participant(&tables.participants, &participant) {
            return Err(StoreError::DuplicateParticipant {
                call_id: participant.call_id,
                user_id: participant.user_id.into_inner(),
            });
        }
        tables.participants.push(participant);
        Ok(())
    }

    async fn close_participants(
        &self,
        call_id: &CallId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for participant in tables
            .participants
            .iter_mut()
            .filter(|p| &p.call_id == call_id && p.left_at.is_none())
        {
            participant.left_at = Some(at);
        }
        Ok(())
    }

    async fn participants(&self, call_id: &CallId) -> Result<Vec<CallParticipant>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .participants
            .iter()
            .filter(|p| &p.call_id == call_id)
            .cloned()
            .collect())
    }
}

fn has_participant(rows: &[CallParticipant], participant: &CallParticipant) -> bool {
    rows.iter()
        .any(|p| p.call_id == participant.call_id && p.user_id == participant.user_id)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use peer_calls_protocol::{Call, CallParticipant, CallStatus, CallType};

    use super::{CallStore, MemoryCallStore, StatusChange};
    use crate::error::StoreError;

    fn ringing_call(id: &str, conversation: &str) -> (Call, CallParticipant) {
        let now = Utc::now();
        let call = Call::ringing(
            id.into(),
            conversation.into(),
            "alice".into(),
            "bob".into(),
            CallType::Voice,
            now,
        );
        let participant = CallParticipant {
            id: format!("{id}-alice"),
            call_id: id.into(),
            user_id: "alice".into(),
            joined_at: now,
            left_at: None,
        };
        (call, participant)
    }

    #[tokio::test]
    async fn second_live_call_in_conversation_is_rejected() {
        let store = MemoryCallStore::new();
        let (first, p1) = ringing_call("c1", "conv");
        let (second, p2) = ringing_call("c2", "conv");
        store.create_call(first, p1).await.unwrap();
        let err = store.create_call(second, p2).await.unwrap_err();
        assert!(matches!(err, StoreError::LiveCallExists(_)));

        let (other, p3) = ringing_call("c3", "other-conv");
        store.create_call(other, p3).await.unwrap();
    }

    #[tokio::test]
    async fn conditional_update_requires_expected_status() {
        let store = MemoryCallStore::new();
        let (call, p) = ringing_call("c1", "conv");
        store.create_call(call, p).await.unwrap();

        let missed = store
            .update_status_if(
                &"c1".into(),
                &[CallStatus::Active],
                StatusChange::new(CallStatus::Ended, Utc::now()),
            )
            .await
            .unwrap();
        assert!(missed.is_none());

        let answered = store
            .update_status_if(
                &"c1".into(),
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Active, Utc::now()),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(answered.status, CallStatus::Active);
        assert!(answered.started_at.is_some());
        assert!(answered.ended_at.is_none());
    }

    #[tokio::test]
    async fn conditional_update_never_leaves_the_graph() {
        let store = MemoryCallStore::new();
        let (call, p) = ringing_call("c1", "conv");
        store.create_call(call, p).await.unwrap();
        store
            .update_status_if(
                &"c1".into(),
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Declined, Utc::now()),
            )
            .await
            .unwrap()
            .unwrap();

        // A caller that lists a terminal status as expected still cannot leave it.
        let reopened = store
            .update_status_if(
                &"c1".into(),
                &[CallStatus::Declined],
                StatusChange::new(CallStatus::Active, Utc::now()),
            )
            .await
            .unwrap();
        assert!(reopened.is_none());
    }

    #[tokio::test]
    async fn failure_records_reason_and_end_time() {
        let store = MemoryCallStore::new();
        let (call, p) = ringing_call("c1", "conv");
        store.create_call(call, p).await.unwrap();
        let failed = store
            .update_status_if(
                &"c1".into(),
                &[CallStatus::Ringing, CallStatus::Active],
                StatusChange::new(CallStatus::Failed, Utc::now())
                    .with_error_reason("connection_failed"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.error_reason.as_deref(), Some("connection_failed"));
        assert!(failed.ended_at.is_some());
        assert!(store.find_live_call(&"conv".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn participants_join_once_and_close_on_termination() {
        let store = MemoryCallStore::new();
        let (call, p) = ringing_call("c1", "conv");
        store.create_call(call, p.clone()).await.unwrap();
        let err = store.add_participant(p).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateParticipant { .. }));

        let ended_at = Utc::now();
        store.close_participants(&"c1".into(), ended_at).await.unwrap();
        let rows = store.participants(&"c1".into()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].left_at, Some(ended_at));
    }

    #[tokio::test]
    async fn answer_and_receiver_row_are_written_together() {
        let store = MemoryCallStore::new();
        let (call, p) = ringing_call("c1", "conv");
        store.create_call(call, p).await.unwrap();
        let bob = CallParticipant {
            id: "c1-bob".to_owned(),
            call_id: "c1".into(),
            user_id: "bob".into(),
            joined_at: Utc::now(),
            left_at: None,
        };

        // A row that is already there fails the whole update.
        store.add_participant(bob.clone()).await.unwrap();
        let err = store
            .update_status_if(
                &"c1".into(),
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Active, Utc::now()).with_participant(bob.clone()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateParticipant { .. }));
        let call = store.get_call(&"c1".into()).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Ringing);

        let (call, p) = ringing_call("c2", "conv-2");
        store.create_call(call, p).await.unwrap();
        let joining = CallParticipant {
            call_id: "c2".into(),
            ..bob
        };
        let active = store
            .update_status_if(
                &"c2".into(),
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Active, Utc::now()).with_participant(joining),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(active.status, CallStatus::Active);
        let rows = store.participants(&"c2".into()).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn ringing_calls_are_listed_by_age() {
        let store = MemoryCallStore::new();
        let (mut old, p1) = ringing_call("old", "conv-a");
        old.created_at = Utc::now() - Duration::seconds(120);
        let (fresh, p2) = ringing_call("fresh", "conv-b");
        store.create_call(old, p1).await.unwrap();
        store.create_call(fresh, p2).await.unwrap();

        let stale = store
            .ringing_created_before(Utc::now() - Duration::seconds(60))
            .await
            .unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id.as_str(), "old");
    }
}
