//! The shared HTTP session and who is allowed to close it.
//!
//! A session is either owned (created here, closed here) or borrowed
//! (supplied by the caller, who keeps closing responsibility). The pooled
//! `reqwest::Client` inside is cheap to clone and safe for concurrent use;
//! the lock below only guards the slot, never an in-flight request.

use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{GraphError, Result};

enum Slot {
    /// Never opened.
    Empty,
    Open { client: reqwest::Client, owned: bool },
    /// Closed by `close()`; the next `acquire()` opens a fresh owned session.
    Closed,
}

/// Owned-or-borrowed persistent HTTP session, opened lazily.
pub struct TransportSession {
    slot: Mutex<Slot>,
    connect_timeout: Duration,
}

impl TransportSession {
    /// A session that will be created, and owned, on first use.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Wrap a caller-supplied client. `close()` will never close it.
    pub fn borrowed(client: reqwest::Client) -> Self {
        Self {
            slot: Mutex::new(Slot::Open {
                client,
                owned: false,
            }),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Return an open session, creating and owning one if none is open.
    pub async fn acquire(&self) -> Result<reqwest::Client> {
        let mut slot = self.slot.lock().await;
        if let Slot::Open { client, .. } = &*slot {
            return Ok(client.clone());
        }

        // The slot stays untouched unless the build succeeds.
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("neptune-graph/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GraphError::Session(e.to_string()))?;

        tracing::debug!("Opened owned HTTP session");
        *slot = Slot::Open {
            client: client.clone(),
            owned: true,
        };
        Ok(client)
    }

    /// Close the session if this component owns it. Returns whether anything was closed.
    ///
    /// Safe to call repeatedly and on a session that was never opened.
    pub async fn close(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Open { owned: true, .. } => {
                // Dropping the last handle shuts the connection pool down.
                *slot = Slot::Closed;
                tracing::debug!("Closed owned HTTP session");
                true
            }
            Slot::Open { owned: false, .. } => {
                tracing::debug!("Borrowed HTTP session left open for its owner");
                false
            }
            Slot::Empty | Slot::Closed => false,
        }
    }

    pub async fn is_open(&self) -> bool {
        matches!(&*self.slot.lock().await, Slot::Open { .. })
    }

    pub async fn is_owned(&self) -> bool {
        matches!(&*self.slot.lock().await, Slot::Open { owned: true, .. })
    }
}

impl Default for TransportSession {
    fn default() -> Self {
        Self::new()
    }
}
