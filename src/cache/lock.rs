use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use metrics::counter;
use tracing::warn;

const METRIC_LOCK_POISON_RECOVERED: &str = "kirie_lock_poison_recovered_total";

/// Take the guard out of a poisoned lock instead of propagating the panic.
///
/// Every structure guarded here is rewritten whole under the lock, so the
/// worst a panicking holder can leave behind is stale data.
fn recover<G>(
    result: LockResult<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned lock"
        );
        counter!(METRIC_LOCK_POISON_RECOVERED, "lock_kind" => lock_kind).increment(1);
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), target, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), target, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op, "mutex.lock")
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Mutex::new(vec![1_u32]);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let mut guard = lock.lock().expect("fresh lock");
            guard.push(2);
            panic!("poison the lock");
        }));
        assert!(lock.is_poisoned());

        let guard = mutex_lock(&lock, "cache::lock::tests", "read_back");
        assert_eq!(*guard, vec![1, 2]);
    }

    #[test]
    fn poisoned_rwlock_is_recovered_for_readers_and_writers() {
        let lock = RwLock::new(0_u32);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("fresh lock");
            panic!("poison the lock");
        }));

        *rw_write(&lock, "cache::lock::tests", "write") += 5;
        assert_eq!(*rw_read(&lock, "cache::lock::tests", "read"), 5);
    }
}
