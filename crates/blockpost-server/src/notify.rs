//! Live event delivery to connected clients.
//!
//! Services publish through the [`EventPublisher`] capability after their
//! storage work commits; the [`ClientRegistry`] forwards each event to the
//! user's open stream, if any.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use blockpost_shared::{ChatId, TransactionId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A message copy addressed to the receiving user was recorded.
    Message {
        chat_id: Option<ChatId>,
        transaction_id: TransactionId,
        from_user_id: UserId,
    },
    /// Membership (or other chat metadata) changed.
    ChatUpdated { chat_id: ChatId },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Message { .. } => "message",
            Event::ChatUpdated { .. } => "chat_updated",
        }
    }
}

pub trait EventPublisher: Send + Sync {
    /// Deliver `event` to `user`. Offline users are skipped silently.
    fn publish(&self, user: UserId, event: Event) -> impl Future<Output = ()> + Send;
}

/// Connected users and the channel feeding each one's event stream.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    clients: Arc<RwLock<HashMap<UserId, mpsc::UnboundedSender<Event>>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream for `user`, replacing any previous one.
    pub async fn connect(&self, user: UserId) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut clients = self.clients.write().await;
        if clients.insert(user, tx).is_some() {
            debug!(user = %user, "Replaced existing event stream");
        }
        info!(user = %user, online = clients.len(), "Client connected");
        rx
    }

    #[cfg(test)]
    pub async fn is_online(&self, user: UserId) -> bool {
        self.clients.read().await.contains_key(&user)
    }

    pub async fn online_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Forget `user` only while `stale` is still their registered sender.
    async fn disconnect_stale(&self, user: UserId, stale: &mpsc::UnboundedSender<Event>) {
        let mut clients = self.clients.write().await;
        if clients
            .get(&user)
            .is_some_and(|current| current.same_channel(stale))
        {
            clients.remove(&user);
            info!(user = %user, online = clients.len(), "Client disconnected");
        }
    }
}

impl EventPublisher for ClientRegistry {
    async fn publish(&self, user: UserId, event: Event) {
        let stale = {
            let clients = self.clients.read().await;
            let Some(tx) = clients.get(&user) else {
                return;
            };
            if tx.send(event).is_ok() {
                return;
            }
            tx.clone()
        };

        // The receiving stream was dropped without a disconnect.
        self.disconnect_stale(user, &stale).await;
    }
}
