//! A transport that answers from a scripted list of responses and records every frame it is
//! given. Useful to replay a recorded conversation with a device without any hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::transport::Transport;

pub struct ReplayTransport {
    supported: bool,
    key_handle_framing: bool,
    echo: bool,
    delay: Option<Duration>,
    responses: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ReplayTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayTransport {
    pub fn new() -> Self {
        Self {
            supported: true,
            key_handle_framing: false,
            echo: false,
            delay: None,
            responses: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// A transport whose support probe is negative.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn with_responses<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let transport = Self::new();
        for response in responses {
            transport.push_response(response);
        }
        transport
    }

    pub fn with_key_handle_framing(mut self) -> Self {
        self.key_handle_framing = true;
        self
    }

    /// Wait this long before answering each frame.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer every frame with a bare success status word once the script runs out.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Appends a raw response (payload followed by status word) to the script.
    pub fn push_response(&self, response: Vec<u8>) {
        self.lock_responses().push_back(response);
    }

    /// Every frame received so far, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of scripted responses not consumed yet.
    pub fn remaining(&self) -> usize {
        self.lock_responses().len()
    }

    /// Highest number of exchanges observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn lock_responses(&self) -> std::sync::MutexGuard<'_, VecDeque<Vec<u8>>> {
        match self.responses.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    type Error = String;

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn requires_key_handle_framing(&self) -> bool {
        self.key_handle_framing
    }

    async fn open(&self) -> Result<(), String> {
        Ok(())
    }

    async fn close(&self) -> Result<(), String> {
        Ok(())
    }

    async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>, String> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(frame.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(frame.to_vec()),
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.lock_responses().pop_front() {
            Some(response) => Ok(response),
            None if self.echo => Ok(vec![0x90, 0x00]),
            None => Err("no scripted response left".to_string()),
        }
    }
}
