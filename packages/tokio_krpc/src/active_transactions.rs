use crate::errors::{Error, ErrorKind, Result};
use crate::transaction::TransactionKey;
use krpc_encoding::MessageType;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::task::{Poll, Waker};

/// State of one outstanding transaction. Never holds a callback —
/// only a `Waker` — so that resolving a transaction never invokes
/// user code while the table's lock is held
enum TxState {
    AwaitingResponse { waker: Option<Waker> },
    Ready(Result<MessageType>),
}

struct Inner {
    table: HashMap<TransactionKey, TxState>,
    capacity: usize,
}

/// Shared table of in-flight transactions. Cheaply `Clone`: every
/// clone refers to the same underlying table.
#[derive(Clone)]
pub struct ActiveTransactions {
    inner: Arc<Mutex<Inner>>,
}

impl ActiveTransactions {
    pub fn new(capacity: usize) -> ActiveTransactions {
        ActiveTransactions {
            inner: Arc::new(Mutex::new(Inner {
                table: HashMap::new(),
                capacity,
            })),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().table.len()
    }

    /// Reserve a slot for a new transaction. Fails with
    /// `ResourceExhausted` once the table is at capacity.
    pub fn add_transaction(&self, key: TransactionKey) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.table.len() >= inner.capacity {
            return Err(Error::from(ErrorKind::ResourceExhausted {
                capacity: inner.capacity,
            }));
        }
        inner
            .table
            .insert(key, TxState::AwaitingResponse { waker: None });
        Ok(())
    }

    /// Route an inbound response/error envelope to its waiting
    /// transaction, if any is still outstanding. Returns `true` if a
    /// transaction was found and completed.
    pub fn dispatch(&self, key: TransactionKey, result: Result<MessageType>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.table.remove(&key) {
            Some(TxState::AwaitingResponse { waker }) => {
                inner.table.insert(key, TxState::Ready(result));
                drop(inner);
                if let Some(waker) = waker {
                    waker.wake();
                }
                true
            }
            Some(other @ TxState::Ready(_)) => {
                // Already completed (e.g. a stray duplicate reply);
                // put it back untouched.
                inner.table.insert(key, other);
                false
            }
            None => false,
        }
    }

    /// Fire a timeout for `key` if it is still awaiting a response.
    /// Idempotent: a transaction that completed in the interim is
    /// left alone.
    pub fn timeout(&self, key: TransactionKey) {
        self.dispatch(key, Err(Error::from(crate::errors::ErrorKind::Timeout)));
    }

    pub fn poll_response(&self, key: TransactionKey, waker: &Waker) -> Poll<Result<MessageType>> {
        let mut inner = self.inner.lock().unwrap();
        match inner.table.remove(&key) {
            None => Poll::Ready(Err(Error::from(ErrorKind::Timeout))),
            Some(TxState::Ready(result)) => Poll::Ready(result),
            Some(TxState::AwaitingResponse { .. }) => {
                inner.table.insert(
                    key,
                    TxState::AwaitingResponse {
                        waker: Some(waker.clone()),
                    },
                );
                Poll::Pending
            }
        }
    }

    pub fn drop_transaction(&self, key: TransactionKey) {
        self.inner.lock().unwrap().table.remove(&key);
    }
}
