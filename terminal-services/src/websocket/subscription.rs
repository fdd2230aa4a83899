//! Subscription manager for chart client connections
//!
//! Reference-counts client interest per symbol so the upstream feed only
//! carries symbols somebody is watching.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Unique identifier for a WebSocket client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Manages per-symbol client subscriptions
pub struct SubscriptionManager {
    /// Next client ID to assign
    next_client_id: AtomicU64,
    /// Map of symbol -> set of subscribed client IDs
    subscriptions: DashMap<String, HashSet<ClientId>>,
    /// Map of client ID -> set of symbols
    client_subscriptions: DashMap<ClientId, HashSet<String>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager
    pub fn new() -> Self {
        Self {
            next_client_id: AtomicU64::new(1),
            subscriptions: DashMap::new(),
            client_subscriptions: DashMap::new(),
        }
    }

    /// Generate a new unique client ID
    pub fn new_client_id(&self) -> ClientId {
        ClientId(self.next_client_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Register a client subscription
    ///
    /// Returns `true` when this is the first client watching `symbol`.
    pub fn subscribe(&self, client_id: ClientId, symbol: &str) -> bool {
        let first = {
            let mut clients = self.subscriptions.entry(symbol.to_string()).or_default();
            let was_empty = clients.is_empty();
            clients.insert(client_id);
            was_empty
        };

        self.client_subscriptions
            .entry(client_id)
            .or_default()
            .insert(symbol.to_string());

        debug!("Client {} subscribed to {}", client_id, symbol);
        first
    }

    /// Unsubscribe a client from a symbol
    ///
    /// Returns `true` when the last client watching `symbol` left.
    pub fn unsubscribe(&self, client_id: ClientId, symbol: &str) -> bool {
        if let Some(mut subs) = self.client_subscriptions.get_mut(&client_id) {
            subs.remove(symbol);
        }

        let last = self.release(client_id, symbol);
        debug!("Client {} unsubscribed from {}", client_id, symbol);
        last
    }

    /// Remove all subscriptions for a client (on disconnect)
    ///
    /// Returns the symbols nobody is watching anymore.
    pub fn remove_client(&self, client_id: ClientId) -> Vec<String> {
        let mut orphaned = Vec::new();

        if let Some((_, symbols)) = self.client_subscriptions.remove(&client_id) {
            for symbol in symbols {
                if self.release(client_id, &symbol) {
                    orphaned.push(symbol);
                }
            }
        }

        info!("Client {} disconnected, removed all subscriptions", client_id);
        orphaned.sort();
        orphaned
    }

    /// Drop `client_id` from the symbol's set; `true` if the set emptied
    fn release(&self, client_id: ClientId, symbol: &str) -> bool {
        let emptied = match self.subscriptions.get_mut(symbol) {
            Some(mut clients) => clients.remove(&client_id) && clients.is_empty(),
            None => false,
        };

        if emptied {
            self.subscriptions.remove_if(symbol, |_, clients| clients.is_empty());
        }
        emptied
    }

    /// Check if a client is subscribed to a symbol
    pub fn is_subscribed(&self, client_id: ClientId, symbol: &str) -> bool {
        self.client_subscriptions
            .get(&client_id)
            .map(|subs| subs.contains(symbol))
            .unwrap_or(false)
    }

    /// Get the number of subscribers for a symbol
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.subscriptions
            .get(symbol)
            .map(|clients| clients.len())
            .unwrap_or(0)
    }

    /// Symbols with at least one subscriber
    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        symbols.sort();
        symbols
    }

    /// Get total number of subscribed symbols
    pub fn total_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }

    /// Get total number of clients with subscriptions
    pub fn total_clients(&self) -> usize {
        self.client_subscriptions.len()
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("total_subscriptions", &self.total_subscriptions())
            .field("total_clients", &self.total_clients())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_and_last_subscriber() {
        let manager = SubscriptionManager::new();
        let a = manager.new_client_id();
        let b = manager.new_client_id();

        assert!(manager.subscribe(a, "AAPL"));
        assert!(!manager.subscribe(b, "AAPL"));
        assert!(!manager.subscribe(a, "AAPL"));
        assert_eq!(manager.subscriber_count("AAPL"), 2);

        assert!(!manager.unsubscribe(a, "AAPL"));
        assert!(manager.unsubscribe(b, "AAPL"));
        assert_eq!(manager.total_subscriptions(), 0);
    }

    #[test]
    fn test_unsubscribe_without_subscription_is_noop() {
        let manager = SubscriptionManager::new();
        let a = manager.new_client_id();
        let b = manager.new_client_id();
        manager.subscribe(a, "AAPL");

        assert!(!manager.unsubscribe(b, "AAPL"));
        assert!(!manager.unsubscribe(a, "MSFT"));
        assert_eq!(manager.subscriber_count("AAPL"), 1);
    }

    #[test]
    fn test_remove_client_reports_orphaned_symbols() {
        let manager = SubscriptionManager::new();
        let a = manager.new_client_id();
        let b = manager.new_client_id();
        manager.subscribe(a, "AAPL");
        manager.subscribe(a, "MSFT");
        manager.subscribe(b, "MSFT");

        assert_eq!(manager.remove_client(a), vec!["AAPL".to_string()]);
        assert!(!manager.is_subscribed(a, "MSFT"));
        assert!(manager.is_subscribed(b, "MSFT"));
        assert_eq!(manager.active_symbols(), vec!["MSFT".to_string()]);
    }
}
