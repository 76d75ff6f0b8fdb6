//! In-memory transport for integration tests.
//!
//! Records every submission and the peak number of unresolved operations.
//! Either answers each operation from a spawned task after a delay, or holds
//! operations until the test releases them.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use kvdriver_client::command::{codes, decode_message, FetchReply};
use kvdriver_client::Transport;
use kvdriver_core::{Exchange, OperationError, RawMessage};
use parking_lot::Mutex;
use serde::Deserialize;

/// How the transport resolves one operation.
pub enum Answer {
    Reply(RawMessage),
    Fail(OperationError),
}

type Responder = dyn Fn(&RawMessage) -> Answer + Send + Sync;

#[derive(Default)]
struct Stats {
    in_flight: usize,
    peak: usize,
    requests: Vec<RawMessage>,
}

pub struct Instrumented {
    responder: Arc<Responder>,
    // `None` holds operations until released.
    delay: Option<Duration>,
    stats: Arc<Mutex<Stats>>,
    held: Mutex<VecDeque<Arc<dyn Exchange>>>,
}

impl Instrumented {
    pub fn answering<F>(delay: Duration, responder: F) -> Arc<Self>
    where
        F: Fn(&RawMessage) -> Answer + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Arc::new(responder),
            delay: Some(delay),
            stats: Arc::default(),
            held: Mutex::default(),
        })
    }

    pub fn holding<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&RawMessage) -> Answer + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Arc::new(responder),
            delay: None,
            stats: Arc::default(),
            held: Mutex::default(),
        })
    }

    pub fn submitted(&self) -> usize {
        self.stats.lock().requests.len()
    }

    pub fn in_flight(&self) -> usize {
        self.stats.lock().in_flight
    }

    pub fn peak_in_flight(&self) -> usize {
        self.stats.lock().peak
    }

    pub fn requests(&self) -> Vec<RawMessage> {
        self.stats.lock().requests.clone()
    }

    /// Resolves the oldest held operation. Returns `false` if none is held.
    pub fn release_next(&self) -> bool {
        let next = self.held.lock().pop_front();
        match next {
            Some(operation) => {
                resolve(&self.stats, &*self.responder, &operation);
                true
            }
            None => false,
        }
    }

    /// Resolves every held operation, oldest first.
    pub fn release_all(&self) -> usize {
        let mut released = 0;
        while self.release_next() {
            released += 1;
        }
        released
    }

    /// Fails every held operation, as a lost connection would.
    pub fn fail_all(&self, cause: &OperationError) {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for operation in held {
            self.stats.lock().in_flight -= 1;
            operation.fail(cause.clone());
        }
    }

    /// Hands the held operations to the test without resolving them.
    pub fn take_held(&self) -> Vec<Arc<dyn Exchange>> {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        self.stats.lock().in_flight -= held.len();
        held
    }

    /// Waits until `count` operations were submitted.
    pub async fn wait_for_submissions(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.submitted() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("submissions did not arrive in time");
    }
}

impl Transport for Instrumented {
    fn submit(&self, operation: Arc<dyn Exchange>) {
        {
            let mut stats = self.stats.lock();
            stats.requests.push(operation.request_message());
            stats.in_flight += 1;
            stats.peak = stats.peak.max(stats.in_flight);
        }

        match self.delay {
            Some(delay) => {
                let stats = Arc::clone(&self.stats);
                let responder = Arc::clone(&self.responder);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    resolve(&stats, &*responder, &operation);
                });
            }
            None => self.held.lock().push_back(operation),
        }
    }
}

fn resolve(stats: &Mutex<Stats>, responder: &Responder, operation: &Arc<dyn Exchange>) {
    let answer = responder(&operation.request_message());
    // Leaves the in-flight count before the completion releases a permit.
    stats.lock().in_flight -= 1;
    match answer {
        Answer::Reply(message) => {
            operation.on_raw_message(message);
        }
        Answer::Fail(cause) => operation.fail(cause),
    }
}

// ---------------------------------------------------------------------------
// Responders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct KeyOnly {
    key: String,
}

/// Key addressed by a single-key request.
pub fn key_of(request: &RawMessage) -> String {
    decode_message::<KeyOnly>(request)
        .expect("single-key request")
        .key
}

/// Answers fetches with the key as value. Keys starting with `fail` get an
/// error response.
pub fn fetch_responder(request: &RawMessage) -> Answer {
    let key = key_of(request);
    if key.starts_with("fail") {
        return Answer::Reply(RawMessage::error_response(&format!("{key} unavailable")));
    }
    match request.code {
        codes::GET_REQ => Answer::Reply(
            FetchReply::found(key.into_bytes())
                .to_message()
                .expect("encodable reply"),
        ),
        codes::PUT_REQ => Answer::Reply(RawMessage::empty(codes::PUT_RESP)),
        codes::DEL_REQ => Answer::Reply(RawMessage::empty(codes::DEL_RESP)),
        other => Answer::Fail(OperationError::Transport {
            reason: format!("unexpected request code {other}"),
        }),
    }
}
