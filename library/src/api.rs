//! Collaborators a call session talks to: the lifecycle API of the server
//! and the signaling channel to the other party.

use async_trait::async_trait;
use peer_calls_protocol::{Call, CallId, CallType, ConversationId, SignalEnvelope};

use crate::error::ApiError;

/// Lifecycle operations, performed as the local user.
#[async_trait]
pub trait CallApi: Send + Sync {
    async fn initiate(
        &self,
        conversation_id: &ConversationId,
        call_type: CallType,
    ) -> Result<Call, ApiError>;
    async fn answer(&self, call_id: &CallId) -> Result<Call, ApiError>;
    async fn decline(&self, call_id: &CallId) -> Result<Call, ApiError>;
    async fn missed(&self, call_id: &CallId) -> Result<Call, ApiError>;
    async fn end(&self, call_id: &CallId) -> Result<Call, ApiError>;
    async fn fail(&self, call_id: &CallId, reason: &str) -> Result<Call, ApiError>;
}

/// Sending half of the signaling connection. Sends are fire-and-forget.
pub trait SignalingTransport: Send + Sync {
    fn join(&self, call_id: &CallId) -> anyhow::Result<()>;
    fn leave(&self, call_id: &CallId) -> anyhow::Result<()>;
    fn send(&self, envelope: SignalEnvelope) -> anyhow::Result<()>;
}
