//! Request/response pairing
//!
//! Requests are queued as they are seen on the client side. A status line on
//! the server side pairs with the oldest outstanding request, so pipelined
//! exchanges line up in order. Interim (1xx) responses keep their pairing
//! until the final response arrives.

use crate::section::{HttpVersion, MethodId};
use std::collections::VecDeque;
use tracing::trace;

/// What the server side needs to know about a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: MethodId,
    pub uri: Vec<u8>,
    pub version: HttpVersion,
    pub host: Option<Vec<u8>>,
}

/// What the response headers need to know about their status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    /// `None` when the status line carried no valid code
    pub code: Option<u16>,
    pub reason: Vec<u8>,
    pub version: HttpVersion,
}

/// One request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: u64,
    pub request: Option<RequestSummary>,
    pub status: Option<StatusSummary>,
}

impl Transaction {
    /// True when the paired request used HEAD
    pub fn is_head(&self) -> bool {
        self.request
            .as_ref()
            .is_some_and(|r| r.method == MethodId::Head)
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status.as_ref().and_then(|s| s.code)
    }

    /// 1xx other than 101 is followed by another response for the same request
    pub fn is_interim(&self) -> bool {
        matches!(self.status_code(), Some(code) if (100..200).contains(&code) && code != 101)
    }
}

/// Pairing state for one flow
#[derive(Debug)]
pub struct TransactionQueue {
    pending: VecDeque<Transaction>,
    response: Option<Transaction>,
    max_depth: usize,
    next_id: u64,
}

impl TransactionQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            response: None,
            max_depth: max_depth.max(1),
            next_id: 0,
        }
    }

    /// Queues a new request. Returns `false` when the pipeline is full; the
    /// oldest request is then dropped to make room.
    pub fn open_request(&mut self, request: RequestSummary) -> bool {
        let mut fits = true;
        if self.pending.len() >= self.max_depth {
            self.pending.pop_front();
            fits = false;
        }
        let id = self.next_id;
        self.next_id += 1;
        trace!(id, method = ?request.method, "Opened transaction");
        self.pending.push_back(Transaction {
            id,
            request: Some(request),
            status: None,
        });
        fits
    }

    /// Request currently being sent by the client
    pub fn current_request(&self) -> Option<&RequestSummary> {
        self.pending.back().and_then(|t| t.request.as_ref())
    }

    pub fn current_request_mut(&mut self) -> Option<&mut RequestSummary> {
        self.pending.back_mut().and_then(|t| t.request.as_mut())
    }

    /// Pairs a status line with its request. Returns `false` when no request
    /// was outstanding and the response had to be paired with nothing.
    pub fn attach_response(&mut self, status: StatusSummary) -> bool {
        if let Some(current) = self.response.as_mut() {
            if current.is_interim() {
                current.status = Some(status);
                return true;
            }
        }

        let (transaction, paired) = match self.pending.pop_front() {
            Some(t) => (t, true),
            None => {
                let id = self.next_id;
                self.next_id += 1;
                let orphan = Transaction {
                    id,
                    request: None,
                    status: None,
                };
                (orphan, false)
            }
        };
        self.response = Some(Transaction {
            status: Some(status),
            ..transaction
        });
        paired
    }

    /// Transaction the server is currently answering
    pub fn response(&self) -> Option<&Transaction> {
        self.response.as_ref()
    }

    /// Releases the server side transaction once its message is complete.
    /// Interim responses keep it for the final response.
    pub fn complete_response(&mut self) {
        if self.response.as_ref().is_some_and(|t| !t.is_interim()) {
            if let Some(done) = self.response.take() {
                trace!(id = done.id, "Released transaction");
            }
        }
    }

    /// Drops every transaction, used when the flow aborts
    pub fn clear(&mut self) {
        self.pending.clear();
        self.response = None;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: MethodId) -> RequestSummary {
        RequestSummary {
            method,
            uri: b"/".to_vec(),
            version: HttpVersion::Http11,
            host: None,
        }
    }

    fn status(code: u16) -> StatusSummary {
        StatusSummary {
            code: Some(code),
            reason: b"OK".to_vec(),
            version: HttpVersion::Http11,
        }
    }

    #[test]
    fn test_pipelined_pairing_is_fifo() {
        let mut queue = TransactionQueue::new(8);
        queue.open_request(request(MethodId::Head));
        queue.open_request(request(MethodId::Get));

        assert!(queue.attach_response(status(200)));
        assert!(queue.response().unwrap().is_head());
        queue.complete_response();

        assert!(queue.attach_response(status(200)));
        assert!(!queue.response().unwrap().is_head());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn test_response_without_request() {
        let mut queue = TransactionQueue::new(8);
        assert!(!queue.attach_response(status(200)));
        let tx = queue.response().unwrap();
        assert!(tx.request.is_none());
        assert!(!tx.is_head());
    }

    #[test]
    fn test_interim_response_keeps_pairing() {
        let mut queue = TransactionQueue::new(8);
        queue.open_request(request(MethodId::Head));
        queue.open_request(request(MethodId::Post));

        queue.attach_response(status(100));
        queue.complete_response();
        queue.attach_response(status(200));

        let tx = queue.response().unwrap();
        assert!(tx.is_head());
        assert_eq!(tx.status_code(), Some(200));
        assert_eq!(queue.pending_len(), 1);
    }

    #[test]
    fn test_pipeline_overflow_drops_oldest() {
        let mut queue = TransactionQueue::new(2);
        assert!(queue.open_request(request(MethodId::Head)));
        assert!(queue.open_request(request(MethodId::Get)));
        assert!(!queue.open_request(request(MethodId::Post)));
        assert_eq!(queue.pending_len(), 2);

        queue.attach_response(status(200));
        assert_eq!(
            queue.response().unwrap().request.as_ref().unwrap().method,
            MethodId::Get
        );
    }
}
