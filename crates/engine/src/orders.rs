use core_types::OrderRequest;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

/// One queued order submission, correlated back to its caller by request id.
#[derive(Debug)]
pub struct OrderJob {
    pub request_id: String,
    pub request: OrderRequest,
}

/// The resolution of an order submission as reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OrderResult {
    /// The venue acknowledged the order; fill state is the initial status.
    Placed {
        request_id: String,
        order_id: i64,
        order_status: String,
        filled: Decimal,
        remaining: Decimal,
        avg_fill_price: Option<Decimal>,
    },
    /// The wait window elapsed before the worker got to the request. The
    /// request stays queued and will still be processed.
    Queued { request_id: String },
    Failed { request_id: String, error: String },
}

impl OrderResult {
    pub fn failed(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        OrderResult::Failed {
            request_id: request_id.into(),
            error: error.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OrderResult::Failed { .. })
    }
}

/// Per-request completion signals. A caller registers before enqueueing and
/// blocks (with timeout) on its receiver; the worker resolves after
/// processing; teardown force-resolves everything still pending.
#[derive(Default)]
pub struct OrderWaiters {
    inner: Mutex<HashMap<String, oneshot::Sender<OrderResult>>>,
}

impl OrderWaiters {
    pub fn register(&self, request_id: &str) -> oneshot::Receiver<OrderResult> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.to_string(), tx);
        rx
    }

    pub fn remove(&self, request_id: &str) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
    }

    /// Resolves one waiter. A missing entry means the caller timed out long
    /// ago and nobody is listening; the result is dropped silently.
    pub fn resolve(&self, request_id: &str, result: OrderResult) {
        let sender = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        if let Some(sender) = sender {
            let _ = sender.send(result);
        }
    }

    /// Fails every pending waiter, used on session teardown so no caller is
    /// ever left hanging on a dead connection.
    pub fn fail_all(&self, error: &str) {
        let drained: Vec<(String, oneshot::Sender<OrderResult>)> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (request_id, sender) in drained {
            let _ = sender.send(OrderResult::failed(request_id, error));
        }
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
