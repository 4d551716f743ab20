//! Account Gate
//!
//! Per-wallet mutual exclusion for settlements. A wallet may hold at
//! most one in-flight settlement; a second command for the same wallet
//! is rejected immediately rather than queued. Release is tied to guard
//! drop so that every successful acquire is released on every exit
//! path, including errors and panics mid-settlement.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::chain::types::Address;

/// The set of wallets with a settlement in flight.
#[derive(Clone, Default)]
pub struct AccountGate {
    active: Arc<Mutex<HashSet<Address>>>,
}

impl AccountGate {
    /// Create an empty gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to claim the gate for a wallet.
    ///
    /// Non-blocking: returns `None` if a settlement for this wallet is
    /// already in flight. The caller reports "previous operation still
    /// running" and stops; it must not retry or queue.
    pub fn try_acquire(&self, wallet: Address) -> Option<GateGuard> {
        let mut active = self.lock();
        if !active.insert(wallet) {
            return None;
        }
        Some(GateGuard {
            active: Arc::clone(&self.active),
            wallet,
        })
    }

    /// Whether a wallet currently holds the gate.
    pub fn is_held(&self, wallet: Address) -> bool {
        self.lock().contains(&wallet)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Address>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held gate for one wallet; releases on drop.
pub struct GateGuard {
    active: Arc<Mutex<HashSet<Address>>>,
    wallet: Address,
}

impl GateGuard {
    /// The wallet this guard holds.
    pub fn wallet(&self) -> Address {
        self.wallet
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.wallet);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 20])
    }

    #[test]
    fn second_acquire_rejected_while_held() {
        let gate = AccountGate::new();
        let guard = gate.try_acquire(addr(1));
        assert!(guard.is_some());
        assert!(gate.try_acquire(addr(1)).is_none());
        assert!(gate.is_held(addr(1)));
    }

    #[test]
    fn drop_releases() {
        let gate = AccountGate::new();
        {
            let _guard = gate.try_acquire(addr(1)).unwrap();
            assert!(gate.is_held(addr(1)));
        }
        assert!(!gate.is_held(addr(1)));
        assert!(gate.try_acquire(addr(1)).is_some());
    }

    #[test]
    fn distinct_wallets_do_not_contend() {
        let gate = AccountGate::new();
        let _a = gate.try_acquire(addr(1)).unwrap();
        let _b = gate.try_acquire(addr(2)).unwrap();
        assert!(gate.is_held(addr(1)));
        assert!(gate.is_held(addr(2)));
    }

    #[test]
    fn release_on_panic_path() {
        let gate = AccountGate::new();
        let result = std::panic::catch_unwind({
            let gate = gate.clone();
            move || {
                let _guard = gate.try_acquire(addr(1)).unwrap();
                panic!("settlement blew up");
            }
        });
        assert!(result.is_err());
        assert!(!gate.is_held(addr(1)));
    }

    #[test]
    fn concurrent_acquire_admits_exactly_one() {
        let gate = AccountGate::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            // Return the guard so it stays held until all threads finish.
            handles.push(std::thread::spawn(move || gate.try_acquire(addr(7))));
        }
        let guards: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
    }
}
