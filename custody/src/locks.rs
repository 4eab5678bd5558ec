//! Per-user locks serializing account provisioning within one process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use ticket_custody_core::UserId;

/// One async mutex per user, created on first use.
///
/// Entries nobody holds or waits on are dropped the next time a lock is
/// taken, so the map only grows with concurrent users.
#[derive(Clone, Debug, Default)]
pub(crate) struct UserLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<Mutex<()>>>>>,
}

impl UserLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `user`. Released when the guard drops.
    pub(crate) async fn lock(&self, user: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(user).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_user_waits_for_the_holder() {
        let locks = UserLocks::new();
        let held = locks.lock(UserId(2)).await;

        let waiting = locks.clone();
        let contender = tokio::spawn(async move { waiting.lock(UserId(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        assert!(tokio::time::timeout(Duration::from_secs(1), contender).await.is_ok());
    }

    #[tokio::test]
    async fn other_users_do_not_wait() {
        let locks = UserLocks::new();
        let _first = locks.lock(UserId(2)).await;

        let second = tokio::time::timeout(Duration::from_secs(1), locks.lock(UserId(3))).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn released_entries_are_dropped() {
        let locks = UserLocks::new();
        drop(locks.lock(UserId(2)).await);
        drop(locks.lock(UserId(3)).await);

        let _held = locks.lock(UserId(4)).await;
        assert_eq!(locks.tracked().await, 1);
    }
}
