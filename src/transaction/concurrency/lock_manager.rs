use std::collections::{HashMap, VecDeque};
use std::sync::{Condvar, Mutex};

use crate::common::config::TxnId;
use crate::common::rid::Rid;
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

/// Tuple-level lock manager enforcing two-phase locking, with wait-die
/// deadlock prevention: a blocked requester may wait only if it is older
/// (smaller txn id) than the oldest transaction queued on the rid,
/// otherwise it aborts itself.
///
/// Requests queue FIFO per rid. Exclusive locks are granted only at the
/// head of the queue; shared locks are granted once every earlier request
/// is a granted shared one.
pub struct LockManager {
    strict_2pl: bool,
    lock_table: Mutex<HashMap<Rid, Waiting>>,
    cond: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct Request {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct Waiting {
    /// Number of exclusive requests queued, granted or not.
    exclusive_count: usize,
    /// Smallest txn id ever queued here; the wait-die reference point.
    oldest: TxnId,
    list: VecDeque<Request>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            lock_table: Mutex::new(HashMap::new()),
            cond: Condvar::new(),
        }
    }

    /// Acquire a shared lock on `rid`. Blocks until granted; returns
    /// false when the transaction is (or gets) aborted.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock().unwrap();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        debug_assert_eq!(txn.state(), TransactionState::Growing);

        let request = Request {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        };
        match table.get_mut(&rid) {
            None => {
                table.insert(
                    rid,
                    Waiting {
                        exclusive_count: 0,
                        oldest: txn.id(),
                        list: VecDeque::from([request]),
                    },
                );
            }
            Some(waiting) => {
                // die rather than wait behind an exclusive held by an
                // older transaction
                if waiting.exclusive_count != 0 && txn.id() > waiting.oldest {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                waiting.oldest = waiting.oldest.min(txn.id());
                waiting.list.push_back(request);
            }
        }

        // wait until everything queued before us is a granted shared lock
        loop {
            let waiting = table.get(&rid).expect("lock entry vanished while queued");
            let mut all_shared_granted = true;
            for r in &waiting.list {
                if r.txn_id == txn.id() {
                    break;
                }
                if r.mode != LockMode::Shared || !r.granted {
                    all_shared_granted = false;
                    break;
                }
            }
            if all_shared_granted {
                break;
            }
            table = self.cond.wait(table).unwrap();
        }

        let waiting = table.get_mut(&rid).unwrap();
        if let Some(r) = waiting.list.iter_mut().find(|r| r.txn_id == txn.id()) {
            r.granted = true;
        }
        txn.add_shared_lock(rid);
        self.cond.notify_all();
        true
    }

    /// Acquire an exclusive lock on `rid`. Blocks until this request
    /// reaches the head of the queue; returns false when the transaction
    /// is (or gets) aborted.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock().unwrap();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        debug_assert_eq!(txn.state(), TransactionState::Growing);

        let request = Request {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        };
        match table.get_mut(&rid) {
            None => {
                table.insert(
                    rid,
                    Waiting {
                        exclusive_count: 1,
                        oldest: txn.id(),
                        list: VecDeque::from([request]),
                    },
                );
            }
            Some(waiting) => {
                if txn.id() > waiting.oldest {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                waiting.oldest = txn.id();
                waiting.list.push_back(request);
                waiting.exclusive_count += 1;
            }
        }

        // exclusive is only granted at the head of the queue
        loop {
            let waiting = table.get(&rid).expect("lock entry vanished while queued");
            if waiting.list.front().map(|r| r.txn_id) == Some(txn.id()) {
                break;
            }
            table = self.cond.wait(table).unwrap();
        }

        let waiting = table.get_mut(&rid).unwrap();
        waiting.list.front_mut().unwrap().granted = true;
        txn.add_exclusive_lock(rid);
        true
    }

    /// Upgrade a granted shared lock to exclusive: the request is moved
    /// just before the first queued exclusive and regranted at the head.
    /// Fails (without losing the shared lock) if an older transaction is
    /// queued ahead of that position.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock().unwrap();
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        debug_assert_eq!(txn.state(), TransactionState::Growing);

        let Some(waiting) = table.get_mut(&rid) else {
            return false;
        };
        let Some(src) = waiting.list.iter().position(|r| r.txn_id == txn.id()) else {
            return false;
        };
        // insertion point: just before the first exclusive at or after
        // us, or the end of the queue
        let target = waiting.list.iter().enumerate().skip(src).find_map(|(i, r)| {
            (r.mode == LockMode::Exclusive).then_some(i)
        });
        let target = target.unwrap_or(waiting.list.len());

        // wait-die: an older transaction anywhere before the insertion
        // point wins
        if waiting
            .list
            .iter()
            .take(target)
            .any(|r| r.txn_id < txn.id())
        {
            return false;
        }

        waiting.list.remove(src);
        let target = if target > src { target - 1 } else { target };
        waiting.list.insert(
            target,
            Request {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            },
        );
        waiting.exclusive_count += 1;

        loop {
            let waiting = table.get(&rid).expect("lock entry vanished while queued");
            if waiting.list.front().map(|r| r.txn_id) == Some(txn.id()) {
                break;
            }
            table = self.cond.wait(table).unwrap();
        }

        let waiting = table.get_mut(&rid).unwrap();
        let front = waiting.list.front_mut().unwrap();
        debug_assert_eq!(front.mode, LockMode::Exclusive);
        front.granted = true;
        txn.promote_to_exclusive(rid);
        true
    }

    /// Release the transaction's lock on `rid`. Under strict 2PL this is
    /// only legal once the transaction is committed or aborted; violating
    /// that aborts it.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut table = self.lock_table.lock().unwrap();

        if self.strict_2pl {
            if txn.state() != TransactionState::Committed
                && txn.state() != TransactionState::Aborted
            {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
        } else if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        let Some(waiting) = table.get_mut(&rid) else {
            return false;
        };
        let Some(index) = waiting.list.iter().position(|r| r.txn_id == txn.id()) else {
            return false;
        };

        let was_first = index == 0;
        let was_exclusive = waiting.list[index].mode == LockMode::Exclusive;
        if was_exclusive {
            waiting.exclusive_count = waiting.exclusive_count.saturating_sub(1);
        }
        waiting.list.remove(index);
        if waiting.list.is_empty() {
            table.remove(&rid);
        }

        if was_first || was_exclusive {
            self.cond.notify_all();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn rid() -> Rid {
        Rid::new(1, 0)
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let lm = LockManager::new(true);
        let t0 = Transaction::new(0);
        let t1 = Transaction::new(1);

        assert!(lm.lock_shared(&t0, rid()));
        assert!(lm.lock_shared(&t1, rid()));
        assert!(t0.holds_shared_lock(rid()));
        assert!(t1.holds_shared_lock(rid()));

        t0.set_state(TransactionState::Committed);
        t1.set_state(TransactionState::Committed);
        assert!(lm.unlock(&t0, rid()));
        assert!(lm.unlock(&t1, rid()));
    }

    #[test]
    fn test_wait_die_younger_requester_aborts() {
        let lm = LockManager::new(true);
        let t0 = Transaction::new(0);
        let t1 = Transaction::new(1);

        assert!(lm.lock_shared(&t0, rid()));
        // txn 1 is younger than txn 0, so it dies instead of waiting
        assert!(!lm.lock_exclusive(&t1, rid()));
        assert_eq!(t1.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_older_exclusive_waits_for_release() {
        let lm = Arc::new(LockManager::new(true));
        let t0 = Arc::new(Transaction::new(0));
        let t1 = Arc::new(Transaction::new(1));

        assert!(lm.lock_shared(&t1, rid()));

        let lm2 = Arc::clone(&lm);
        let t0b = Arc::clone(&t0);
        let waiter = thread::spawn(move || lm2.lock_exclusive(&t0b, rid()));

        // give the older transaction time to block
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        t1.set_state(TransactionState::Committed);
        assert!(lm.unlock(&t1, rid()));

        assert!(waiter.join().unwrap());
        assert!(t0.holds_exclusive_lock(rid()));
    }

    #[test]
    fn test_upgrade_waits_for_other_reader() {
        let lm = Arc::new(LockManager::new(true));
        let t0 = Arc::new(Transaction::new(0));
        let t1 = Arc::new(Transaction::new(1));

        assert!(lm.lock_shared(&t0, rid()));
        assert!(lm.lock_shared(&t1, rid()));

        let lm2 = Arc::clone(&lm);
        let t0b = Arc::clone(&t0);
        let upgrader = thread::spawn(move || lm2.lock_upgrade(&t0b, rid()));

        thread::sleep(Duration::from_millis(50));
        assert!(!upgrader.is_finished());

        // the last other reader leaving lets the upgrade through
        t1.set_state(TransactionState::Committed);
        assert!(lm.unlock(&t1, rid()));

        assert!(upgrader.join().unwrap());
        assert!(t0.holds_exclusive_lock(rid()));
        assert!(!t0.holds_shared_lock(rid()));
    }

    #[test]
    fn test_strict_2pl_rejects_early_unlock() {
        let lm = LockManager::new(true);
        let t0 = Transaction::new(0);

        assert!(lm.lock_shared(&t0, rid()));
        // still growing: releasing now violates strict 2PL
        assert!(!lm.unlock(&t0, rid()));
        assert_eq!(t0.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_non_strict_unlock_moves_to_shrinking() {
        let lm = LockManager::new(false);
        let t0 = Transaction::new(0);

        assert!(lm.lock_shared(&t0, rid()));
        assert!(lm.unlock(&t0, rid()));
        assert_eq!(t0.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_aborted_transaction_cannot_lock() {
        let lm = LockManager::new(true);
        let t0 = Transaction::new(0);
        t0.set_state(TransactionState::Aborted);

        assert!(!lm.lock_shared(&t0, rid()));
        assert!(!lm.lock_exclusive(&t0, rid()));
    }

    #[test]
    fn test_exclusive_serializes_writers() {
        let lm = Arc::new(LockManager::new(true));
        let counter = Arc::new(Mutex::new(0i32));

        // requesters arrive youngest-first, so each later (older) one is
        // allowed to wait and all four must eventually be granted
        let mut handles = Vec::new();
        for id in (0..4).rev() {
            let lm = Arc::clone(&lm);
            let counter = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                let txn = Transaction::new(id);
                if !lm.lock_exclusive(&txn, rid()) {
                    return false;
                }
                {
                    let mut c = counter.lock().unwrap();
                    *c += 1;
                }
                txn.set_state(TransactionState::Committed);
                lm.unlock(&txn, rid());
                true
            }));
            thread::sleep(Duration::from_millis(20));
        }

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(*counter.lock().unwrap(), 4);
    }
}
