//! Process-lifetime player index and the fixed-capacity connected-client set.

use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use crate::client::Client;
use crate::error::{Result, ServerError};
use crate::player::Player;

/// Process-lifetime set of every player ever seen, keyed by name.
pub struct PlayerRegistry {
    players: Mutex<Vec<Arc<Player>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        PlayerRegistry { players: Mutex::new(Vec::new()) }
    }

    /// Find-or-insert. A brand new name starts at the default rating.
    pub async fn register(&self, name: &str) -> Arc<Player> {
        let mut players = self.players.lock().await;
        if let Some(p) = players.iter().find(|p| p.name() == name) {
            return p.clone();
        }
        let p = Arc::new(Player::create(name));
        players.push(p.clone());
        p
    }

    /// Releases the registry's references. Called once at shutdown, after
    /// every Client is gone, so no other holder can still be using a Player.
    pub async fn finalize(&self) {
        self.players.lock().await.clear();
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity table of live, connected Clients.
pub struct ClientRegistry {
    max_clients: usize,
    clients: Mutex<Vec<Arc<Client>>>,
    empty: Notify,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        ClientRegistry {
            max_clients,
            clients: Mutex::new(Vec::new()),
            empty: Notify::new(),
        }
    }

    pub async fn register(&self, client: Arc<Client>) -> Result<()> {
        let mut clients = self.clients.lock().await;
        if clients.len() >= self.max_clients {
            return Err(ServerError::Full);
        }
        clients.push(client);
        Ok(())
    }

    pub async fn unregister(&self, client: &Arc<Client>) {
        let mut clients = self.clients.lock().await;
        if let Some(pos) = clients.iter().position(|c| Arc::ptr_eq(c, client)) {
            clients.remove(pos);
        }
        if clients.is_empty() {
            // notify_one (not notify_waiters) latches a permit, so a waiter
            // that hasn't polled its `Notified` future yet still wakes.
            self.empty.notify_one();
        }
    }

    /// Linear scan for the Client currently logged in under `name`, if any.
    pub async fn lookup(&self, name: &str) -> Option<Arc<Client>> {
        let clients = self.clients.lock().await;
        clients
            .iter()
            .find(|c| c.username().as_deref() == Some(name))
            .cloned()
    }

    /// One logged-in Player per logged-in Client, for the USERS listing.
    pub async fn snapshot_players(&self) -> Vec<Arc<Player>> {
        let clients = self.clients.lock().await;
        clients.iter().filter_map(|c| c.player()).collect()
    }

    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Half-closes every registered socket's write half so each session
    /// loop's next read sees EOF. Failures are not the caller's concern —
    /// a socket that is already gone is equivalent to one that shut down.
    pub async fn shutdown_all(&self, log: &crate::logger::Logger) {
        let clients = self.clients.lock().await.clone();
        for client in clients {
            if let Err(err) = client.shutdown_write_half().await {
                log.warn(format!("shutdown: client {} half-close failed: {err}", client.id));
            }
        }
    }

    /// Blocks until the set is empty. Safe against the race where the set
    /// is already empty by the time this is called: the notify is rechecked
    /// against current state before waiting.
    pub async fn wait_for_empty(&self) {
        loop {
            if self.is_empty().await {
                return;
            }
            let notified = self.empty.notified();
            if self.is_empty().await {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;

    #[tokio::test]
    async fn register_is_find_or_insert() {
        let reg = PlayerRegistry::new();
        let a = reg.register("alice").await;
        let b = reg.register("alice").await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn distinct_names_get_distinct_players() {
        let reg = PlayerRegistry::new();
        let a = reg.register("alice").await;
        let b = reg.register("bob").await;
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn client_registry_rejects_past_capacity() {
        let reg = ClientRegistry::new(1);
        reg.register(Client::new_for_test(1)).await.unwrap();
        assert!(matches!(reg.register(Client::new_for_test(2)).await, Err(ServerError::Full)));
    }

    #[tokio::test]
    async fn unregister_makes_room_again() {
        let reg = ClientRegistry::new(1);
        let c1 = Client::new_for_test(1);
        reg.register(c1.clone()).await.unwrap();
        reg.unregister(&c1).await;
        reg.register(Client::new_for_test(2)).await.unwrap();
    }

    #[tokio::test]
    async fn lookup_finds_only_logged_in_clients_by_exact_name() {
        let reg = ClientRegistry::new(8);
        let c = Client::new_for_test(1);
        reg.register(c.clone()).await.unwrap();
        assert!(reg.lookup("alice").await.is_none());
        c.login(Arc::new(Player::create("alice"))).unwrap();
        assert!(reg.lookup("alice").await.is_some());
    }

    #[tokio::test]
    async fn wait_for_empty_returns_immediately_when_already_empty() {
        let reg = ClientRegistry::new(8);
        reg.wait_for_empty().await;
    }

    #[tokio::test]
    async fn wait_for_empty_unblocks_after_last_unregister() {
        let reg = Arc::new(ClientRegistry::new(8));
        let c = Client::new_for_test(1);
        reg.register(c.clone()).await.unwrap();

        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.wait_for_empty().await })
        };
        tokio::task::yield_now().await;
        reg.unregister(&c).await;
        waiter.await.unwrap();
    }
}
