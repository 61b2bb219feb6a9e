//! Authoritative call state machine.
//!
//! Every operation authorizes the caller against conversation membership and
//! the call record, then applies its transition as a single conditional update
//! on the store. A caller that loses a race gets [`CallError::Conflict`] and
//! should treat it as "somebody else already handled this".

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use peer_calls_protocol::{
    Call, CallId, CallParticipant, CallStatus, CallType, ConversationId, LifecycleEvent,
    SignalMessage, UserId,
};
use uuid::Uuid;

use crate::error::{CallError, Result, StoreError};
use crate::membership::Membership;
use crate::pubsub::{PubSub, Topic};
use crate::store::{CallStore, StatusChange};

/// Longest failure reason accepted from clients.
pub const MAX_ERROR_REASON_LEN: usize = 256;

pub struct LifecycleManager {
    store: Arc<dyn CallStore>,
    membership: Arc<dyn Membership>,
    hub: PubSub,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn CallStore>, membership: Arc<dyn Membership>, hub: PubSub) -> Self {
        Self {
            store,
            membership,
            hub,
        }
    }

    pub fn store(&self) -> &Arc<dyn CallStore> {
        &self.store
    }

    pub async fn initiate(
        &self,
        caller_id: &UserId,
        conversation_id: &ConversationId,
        call_type: CallType,
    ) -> Result<Call> {
        require_id("caller id", caller_id.is_blank())?;
        require_id("conversation id", conversation_id.is_blank())?;

        let members = self.membership.members(conversation_id).await;
        if members.is_empty() {
            return Err(CallError::NotFound(format!(
                "conversation {conversation_id}"
            )));
        }
        if !self.membership.is_participant(caller_id, conversation_id).await {
            return Err(CallError::Forbidden(format!(
                "{caller_id} is not a member of conversation {conversation_id}"
            )));
        }
        let receiver_id = match members.iter().filter(|m| *m != caller_id).collect::<Vec<_>>()[..]
        {
            [receiver] => receiver.clone(),
            _ => {
                return Err(CallError::Validation(format!(
                    "conversation {conversation_id} must have exactly two members to place a call"
                )))
            }
        };

        let now = Utc::now();
        let call = Call::ringing(
            CallId::new(Uuid::new_v4().to_string()),
            conversation_id.clone(),
            caller_id.clone(),
            receiver_id,
            call_type,
            now,
        );
        let initiator = participant_row(&call.id, caller_id, now);

        match self.store.create_call(call.clone(), initiator).await {
            Ok(()) => {}
            Err(StoreError::LiveCallExists(conversation_id)) => {
                debug!("initiate rejected, conversation {conversation_id} is busy");
                return Err(CallError::AlreadyInCall(conversation_id));
            }
            Err(err) => return Err(err.into()),
        }

        info!(
            "call {} ringing: {} -> {} ({})",
            call.id, call.initiator_id, call.receiver_id, call.call_type
        );
        self.notify(&[&call.receiver_id], &call, Some(caller_id))
            .await;
        Ok(call)
    }

    pub async fn answer(&self, user_id: &UserId, call_id: &CallId) -> Result<Call> {
        let call = self.authorized_call(user_id, call_id).await?;
        if &call.initiator_id == user_id {
            return Err(CallError::Forbidden(format!(
                "initiator cannot answer call {call_id}"
            )));
        }
        if &call.receiver_id != user_id {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not the receiver of call {call_id}"
            )));
        }

        let now = Utc::now();
        let call = self
            .transition(
                call_id,
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Active, now)
                    .with_participant(participant_row(call_id, user_id, now)),
                "answer",
            )
            .await?;

        info!("call {call_id} answered by {user_id}");
        self.notify_parties(&call, Some(user_id)).await;
        Ok(call)
    }

    pub async fn decline(&self, user_id: &UserId, call_id: &CallId) -> Result<Call> {
        let call = self.authorized_call(user_id, call_id).await?;
        if &call.initiator_id == user_id {
            return Err(CallError::Forbidden(format!(
                "initiator cannot decline call {call_id}, end it instead"
            )));
        }
        if &call.receiver_id != user_id {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not the receiver of call {call_id}"
            )));
        }

        let call = self
            .transition(
                call_id,
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Declined, Utc::now()),
                "decline",
            )
            .await?;
        info!("call {call_id} declined by {user_id}");
        self.finish(&call, Some(user_id)).await;
        Ok(call)
    }

    /// Mark a ringing call as missed. Any caller may do this, including a
    /// ring-timeout detector on the initiator's side, so identity is not checked.
    pub async fn missed(&self, call_id: &CallId) -> Result<Call> {
        self.mark_missed(call_id, None).await
    }

    /// [`Self::missed`] restricted to the two parties of the call.
    pub async fn missed_by(&self, user_id: &UserId, call_id: &CallId) -> Result<Call> {
        let call = self.authorized_call(user_id, call_id).await?;
        if !call.is_party(user_id) {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not a party of call {call_id}"
            )));
        }
        self.mark_missed(call_id, Some(user_id)).await
    }

    async fn mark_missed(&self, call_id: &CallId, actor: Option<&UserId>) -> Result<Call> {
        require_id("call id", call_id.is_blank())?;
        let call = self
            .transition(
                call_id,
                &[CallStatus::Ringing],
                StatusChange::new(CallStatus::Missed, Utc::now()),
                "mark missed",
            )
            .await?;
        info!("call {call_id} missed");
        self.finish(&call, actor).await;
        Ok(call)
    }

    pub async fn end(&self, user_id: &UserId, call_id: &CallId) -> Result<Call> {
        let call = self.authorized_call(user_id, call_id).await?;
        if !call.is_party(user_id) {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not a party of call {call_id}"
            )));
        }

        let call = self
            .transition(
                call_id,
                &[CallStatus::Ringing, CallStatus::Active],
                StatusChange::new(CallStatus::Ended, Utc::now()),
                "end",
            )
            .await?;
        info!("call {call_id} ended by {user_id}");
        self.finish(&call, Some(user_id)).await;
        Ok(call)
    }

    /// Terminate a ringing or active call with a recorded failure reason.
    pub async fn fail(&self, user_id: &UserId, call_id: &CallId, reason: &str) -> Result<Call> {
        let reason = reason.trim();
        if reason.is_empty() || reason.chars().count() > MAX_ERROR_REASON_LEN {
            return Err(CallError::Validation(format!(
                "failure reason must be 1 to {MAX_ERROR_REASON_LEN} characters"
            )));
        }
        let call = self.authorized_call(user_id, call_id).await?;
        if !call.is_party(user_id) {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not a party of call {call_id}"
            )));
        }

        let call = self
            .transition(
                call_id,
                &[CallStatus::Ringing, CallStatus::Active],
                StatusChange::new(CallStatus::Failed, Utc::now()).with_error_reason(reason),
                "fail",
            )
            .await?;
        info!("call {call_id} failed ({reason}), reported by {user_id}");
        self.finish(&call, Some(user_id)).await;
        Ok(call)
    }

    /// The ringing or active call of the conversation, `None` for non-members.
    pub async fn get_active_call(
        &self,
        user_id: &UserId,
        conversation_id: &ConversationId,
    ) -> Result<Option<Call>> {
        if !self.membership.is_participant(user_id, conversation_id).await {
            return Ok(None);
        }
        Ok(self.store.find_live_call(conversation_id).await?)
    }

    pub async fn get_call(&self, user_id: &UserId, call_id: &CallId) -> Result<Call> {
        let call = self.authorized_call(user_id, call_id).await?;
        if !call.is_party(user_id) {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not a party of call {call_id}"
            )));
        }
        Ok(call)
    }

    pub async fn participants(
        &self,
        user_id: &UserId,
        call_id: &CallId,
    ) -> Result<Vec<CallParticipant>> {
        self.get_call(user_id, call_id).await?;
        Ok(self.store.participants(call_id).await?)
    }

    /// Mark missed every call that has been ringing longer than `ring_timeout`.
    /// Calls answered or ended concurrently are skipped.
    pub async fn expire_ringing(&self, now: DateTime<Utc>, ring_timeout: Duration) -> Result<Vec<Call>> {
        let stale = self.store.ringing_created_before(now - ring_timeout).await?;
        let mut expired = Vec::with_capacity(stale.len());
        for call in stale {
            match self.mark_missed(&call.id, None).await {
                Ok(call) => expired.push(call),
                Err(CallError::Conflict { .. } | CallError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(expired)
    }

    /// Load the call and check the caller belongs to its conversation.
    async fn authorized_call(&self, user_id: &UserId, call_id: &CallId) -> Result<Call> {
        require_id("user id", user_id.is_blank())?;
        require_id("call id", call_id.is_blank())?;
        let call = self
            .store
            .get_call(call_id)
            .await?
            .ok_or_else(|| CallError::NotFound(format!("call {call_id}")))?;
        if !self
            .membership
            .is_participant(user_id, &call.conversation_id)
            .await
        {
            return Err(CallError::Forbidden(format!(
                "{user_id} is not a member of conversation {}",
                call.conversation_id
            )));
        }
        Ok(call)
    }

    async fn transition(
        &self,
        call_id: &CallId,
        expected: &[CallStatus],
        change: StatusChange,
        attempted: &'static str,
    ) -> Result<Call> {
        if let Some(call) = self
            .store
            .update_status_if(call_id, expected, change)
            .await?
        {
            return Ok(call);
        }
        // The read only shapes the error; the decision was the conditional write.
        match self.store.get_call(call_id).await? {
            Some(current) => {
                debug!(
                    "cannot {attempted} call {call_id}, it is {}",
                    current.status
                );
                Err(CallError::Conflict {
                    call_id: call_id.clone(),
                    current: current.status,
                    attempted,
                })
            }
            None => Err(CallError::NotFound(format!("call {call_id}"))),
        }
    }

    /// Terminal bookkeeping: close participant rows, notify, tear down signaling.
    async fn finish(&self, call: &Call, actor: Option<&UserId>) {
        let at = call.ended_at.unwrap_or(call.updated_at);
        if let Err(err) = self.store.close_participants(&call.id, at).await {
            warn!("could not close participants of call {}: {err}", call.id);
        }
        self.notify_parties(call, actor).await;
        self.hub.close_topic(&Topic::Call(call.id.clone())).await;
    }

    async fn notify_parties(&self, call: &Call, actor: Option<&UserId>) {
        self.notify(&[&call.initiator_id, &call.receiver_id], call, actor)
            .await;
    }

    async fn notify(&self, recipients: &[&UserId], call: &Call, actor: Option<&UserId>) {
        let message = SignalMessage::Lifecycle(LifecycleEvent::new(call.clone(), actor.cloned()));
        for recipient in recipients {
            let delivered = self
                .hub
                .publish(&Topic::User((*recipient).clone()), &message)
                .await;
            debug!(
                "{} for call {} delivered to {delivered} connection(s) of {recipient}",
                call.status, call.id
            );
        }
    }
}

fn require_id(what: &str, blank: bool) -> Result<()> {
    if blank {
        return Err(CallError::Validation(format!("{what} must not be empty")));
    }
    Ok(())
}

fn participant_row(call_id: &CallId, user_id: &UserId, joined_at: DateTime<Utc>) -> CallParticipant {
    CallParticipant {
        id: Uuid::new_v4().to_string(),
        call_id: call_id.clone(),
        user_id: user_id.clone(),
        joined_at,
        left_at: None,
    }
}
