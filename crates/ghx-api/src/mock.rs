//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::transport::{HttpResponse, Transport, TransportError};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Respond(HttpResponse),
    Fail(TransportError),
    /// Never completes; exercises the client timeout.
    Hang,
}

/// Transport that replays scripted replies keyed by `path_and_query`.
///
/// Replies queued for a path are consumed in order; the last one is sticky
/// and repeats for every further request. Unscripted paths answer `404`.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `path_and_query`.
    pub fn push(&self, path_and_query: &str, reply: MockReply) -> &Self {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path_and_query.to_owned())
            .or_default()
            .push_back(reply);
        self
    }

    /// Queue a raw response.
    pub fn respond(&self, path_and_query: &str, response: HttpResponse) -> &Self {
        self.push(path_and_query, MockReply::Respond(response))
    }

    /// Queue a JSON response with the given status.
    pub fn json(&self, path_and_query: &str, status: u16, body: serde_json::Value) -> &Self {
        self.respond(path_and_query, HttpResponse::new(status, body.to_string()))
    }

    /// Queue a transport-level failure.
    pub fn fail(&self, path_and_query: &str, error: TransportError) -> &Self {
        self.push(path_and_query, MockReply::Fail(error))
    }

    /// Queue a reply that never arrives.
    pub fn hang(&self, path_and_query: &str) -> &Self {
        self.push(path_and_query, MockReply::Hang)
    }

    /// Every request seen so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of requests made to exactly `path_and_query`.
    pub fn request_count(&self, path_and_query: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|p| p.as_str() == path_and_query)
            .count()
    }

    fn next_reply(&self, path_and_query: &str) -> Option<MockReply> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let queue = routes.get_mut(path_and_query)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(
        &self,
        path_and_query: &str,
        _token: &SecretString,
    ) -> Result<HttpResponse, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path_and_query.to_owned());

        match self.next_reply(path_and_query) {
            Some(MockReply::Respond(response)) => Ok(response),
            Some(MockReply::Fail(error)) => Err(error),
            Some(MockReply::Hang) => std::future::pending().await,
            None => Ok(HttpResponse::new(404, r#"{"message":"Not Found"}"#)),
        }
    }
}
