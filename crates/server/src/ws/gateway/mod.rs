mod broadcast;

use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};

pub type ClientId = u64;

pub struct ConnectedClient {
    pub user_id: String,
    pub session_id: String,
    pub tx: mpsc::UnboundedSender<String>,
    pub subscribed_conversations: HashSet<String>,
    /// Live frames held back while the connection is catching up. `None`
    /// once `complete_sync` has run.
    pending: Option<Vec<String>>,
}

impl ConnectedClient {
    fn deliver(&mut self, frame: String) {
        match self.pending.as_mut() {
            Some(buffer) => buffer.push(frame),
            None => {
                let _ = self.tx.send(frame);
            }
        }
    }
}

/// RealtimeGateway connection registry. Holds no durable state; everything
/// here is rebuilt from reconnects.
pub struct GatewayState {
    next_id: RwLock<u64>,
    pub clients: RwLock<HashMap<ClientId, ConnectedClient>>,
    pub conversation_subs: RwLock<HashMap<String, HashSet<ClientId>>>,
}

impl Default for GatewayState {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayState {
    pub fn new() -> Self {
        Self {
            next_id: RwLock::new(1),
            clients: RwLock::new(HashMap::new()),
            conversation_subs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn next_client_id(&self) -> ClientId {
        let mut id = self.next_id.write().await;
        let current = *id;
        *id += 1;
        current
    }

    /// Register a connection in catch-up mode: live pushes are buffered until
    /// `complete_sync`.
    pub async fn register(
        &self,
        client_id: ClientId,
        user_id: String,
        session_id: String,
        tx: mpsc::UnboundedSender<String>,
    ) {
        let client = ConnectedClient {
            user_id,
            session_id,
            tx,
            subscribed_conversations: HashSet::new(),
            pending: Some(Vec::new()),
        };
        self.clients.write().await.insert(client_id, client);
    }

    pub async fn unregister(&self, client_id: ClientId) -> Option<ConnectedClient> {
        let client = self.clients.write().await.remove(&client_id)?;

        let mut subs = self.conversation_subs.write().await;
        for conversation_id in &client.subscribed_conversations {
            if let Some(set) = subs.get_mut(conversation_id) {
                set.remove(&client_id);
                if set.is_empty() {
                    subs.remove(conversation_id);
                }
            }
        }

        Some(client)
    }

    /// End catch-up for a connection and flush whatever was buffered, in
    /// arrival order. Returns the number of flushed frames.
    pub async fn complete_sync(&self, client_id: ClientId) -> usize {
        let mut clients = self.clients.write().await;
        let Some(client) = clients.get_mut(&client_id) else {
            return 0;
        };
        let buffered = client.pending.take().unwrap_or_default();
        let count = buffered.len();
        for frame in buffered {
            let _ = client.tx.send(frame);
        }
        count
    }

    /// Subscribe a registered client. Returns false once the client has been
    /// unregistered, so a late join cannot leave an orphaned subscription.
    pub async fn subscribe_conversation(&self, client_id: ClientId, conversation_id: &str) -> bool {
        let mut subs = self.conversation_subs.write().await;
        let mut clients = self.clients.write().await;
        let Some(client) = clients.get_mut(&client_id) else {
            return false;
        };
        client
            .subscribed_conversations
            .insert(conversation_id.to_string());
        subs.entry(conversation_id.to_string())
            .or_default()
            .insert(client_id);
        true
    }

    pub async fn is_registered(&self, client_id: ClientId) -> bool {
        self.clients.read().await.contains_key(&client_id)
    }

    pub async fn unsubscribe_conversation(&self, client_id: ClientId, conversation_id: &str) {
        let mut subs = self.conversation_subs.write().await;
        if let Some(set) = subs.get_mut(conversation_id) {
            set.remove(&client_id);
            if set.is_empty() {
                subs.remove(conversation_id);
            }
        }
        drop(subs);

        if let Some(client) = self.clients.write().await.get_mut(&client_id) {
            client.subscribed_conversations.remove(conversation_id);
        }
    }

    /// Drop every subscription a user's connections hold on a conversation,
    /// e.g. after they were removed from it.
    pub async fn unsubscribe_user(&self, user_id: &str, conversation_id: &str) {
        for client_id in self.client_ids_for_user(user_id).await {
            self.unsubscribe_conversation(client_id, conversation_id)
                .await;
        }
    }

    pub async fn client_ids_for_user(&self, user_id: &str) -> Vec<ClientId> {
        self.clients
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.user_id == user_id)
            .map(|(&id, _)| id)
            .collect()
    }
}
