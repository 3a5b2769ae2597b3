use std::sync::{LockResult, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

const SOURCE: &str = "pagerefresh::cache::lock";

fn recover<G>(result: LockResult<G>, owner: &'static str, op: &'static str, mode: &str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            target: SOURCE,
            owner,
            op,
            mode,
            "lock poisoned by a panicking writer; continuing with its last state"
        );
        poisoned.into_inner()
    })
}

/// Shared guard that survives poisoning.
pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), owner, op, "read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    owner: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), owner, op, "write")
}
