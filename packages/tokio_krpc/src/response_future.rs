use crate::active_transactions::ActiveTransactions;
use crate::errors::Result;
use crate::transaction::TransactionKey;
use krpc_encoding::MessageType;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A future which resolves when a response, error or timeout for one
/// transaction lands in the shared transaction table.
pub struct ResponseFuture {
    key: TransactionKey,
    transactions: ActiveTransactions,
}

impl ResponseFuture {
    pub async fn wait_for(
        key: TransactionKey,
        transactions: ActiveTransactions,
    ) -> Result<MessageType> {
        transactions.add_transaction(key)?;
        ResponseFuture { key, transactions }.await
    }
}

impl Future for ResponseFuture {
    type Output = Result<MessageType>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.transactions.poll_response(self.key, cx.waker())
    }
}

impl Drop for ResponseFuture {
    fn drop(&mut self) {
        self.transactions.drop_transaction(self.key);
    }
}
