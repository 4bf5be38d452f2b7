use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use opcore_protocol::{OperationError, OperationId, OperationResult, ResultCode};
use tokio::sync::oneshot;

/// Resolves to an operation's result once it is fully `Completed`.
///
/// Fails with [`OperationError::Abandoned`] if the operation's state was
/// torn down without ever reaching `Completed`.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct OperationFuture {
    operation_id: OperationId,
    receiver: oneshot::Receiver<ResultCode>,
}

impl OperationFuture {
    pub(crate) fn new(operation_id: OperationId, receiver: oneshot::Receiver<ResultCode>) -> Self {
        Self {
            operation_id,
            receiver,
        }
    }

    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }
}

impl Future for OperationFuture {
    type Output = OperationResult<ResultCode>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let operation_id = self.operation_id;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.map_err(|_| OperationError::Abandoned(operation_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_with_the_delivered_result() {
        let (sender, receiver) = oneshot::channel();
        let future = OperationFuture::new(OperationId::new(), receiver);
        sender.send(ResultCode::TimedOut).unwrap();
        assert_eq!(future.await.unwrap(), ResultCode::TimedOut);
    }

    #[tokio::test]
    async fn dropped_sender_is_reported_as_abandoned() {
        let id = OperationId::new();
        let (sender, receiver) = oneshot::channel::<ResultCode>();
        let future = OperationFuture::new(id, receiver);
        assert_eq!(future.operation_id(), id);
        drop(sender);
        match future.await {
            Err(OperationError::Abandoned(abandoned)) => assert_eq!(abandoned, id),
            other => panic!("unexpected {other:?}"),
        }
    }
}
