use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::apdu::APDUAnswer;
use common::constants::STATUS_WORD_SIZE;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex,
};

use crate::config::Config;
use crate::error::{ProtocolError, Result};

/// Generic trait to abstract the communication layer between the host and a Ledger device.
///
/// Implementations move opaque frames: the bytes handed to `exchange` go to the device as they
/// are, and the reply comes back with its status word still attached.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: Display + Send + Sync;

    /// Cheap probe telling whether a device can be reached at all. Must not block.
    fn is_supported(&self) -> bool;

    /// Whether frames travel as opaque key handles that have to be scrambled first.
    fn requires_key_handle_framing(&self) -> bool {
        false
    }

    async fn open(&self) -> core::result::Result<(), Self::Error>;

    async fn close(&self) -> core::result::Result<(), Self::Error>;

    async fn exchange(&self, frame: &[u8]) -> core::result::Result<Vec<u8>, Self::Error>;
}

/// XORs `data` in place against `key`, repeated as many times as needed.
pub fn scramble(data: &mut [u8], key: &[u8]) {
    if key.is_empty() {
        return;
    }
    for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
        *byte ^= k;
    }
}

/// Serializes access to one device handle.
///
/// At most one exchange is in flight at any time; concurrent callers wait on a fair lock and
/// are served in the order they arrived. Each exchange is bounded by the configured timeout
/// and is never retried.
pub struct TransportAdapter<T: Transport> {
    transport: T,
    lock: Mutex<()>,
    timeout: Duration,
    scramble_key: Vec<u8>,
    is_open: AtomicBool,
}

impl<T: Transport> TransportAdapter<T> {
    pub fn new(transport: T, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            lock: Mutex::new(()),
            timeout: config.timeout(),
            scramble_key: config.scramble_key.clone(),
            is_open: AtomicBool::new(false),
        })
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn is_supported(&self) -> bool {
        self.transport.is_supported()
    }

    pub fn enforce_support(&self) -> Result<()> {
        if !self.is_supported() {
            return Err(ProtocolError::Unsupported);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.is_open.load(Ordering::Acquire)
    }

    pub async fn open(&self) -> Result<()> {
        self.enforce_support()?;
        if self.transport.requires_key_handle_framing() && self.scramble_key.is_empty() {
            return Err(ProtocolError::Transport(
                "transport requires a scramble key".to_string(),
            ));
        }
        let _guard = self.lock.lock().await;
        self.transport
            .open()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        self.is_open.store(true, Ordering::Release);
        log::debug!("device handle opened");
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.is_open.store(false, Ordering::Release);
        self.transport
            .close()
            .await
            .map_err(|e| ProtocolError::Transport(e.to_string()))?;
        log::debug!("device handle closed");
        Ok(())
    }

    /// Sends one frame and returns the raw reply, status word included.
    pub async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>> {
        let _guard = self.lock.lock().await;
        if !self.is_open() {
            return Err(ProtocolError::Transport(
                "device handle is not open".to_string(),
            ));
        }

        log::trace!("=> {}", hex::encode(frame));
        let mut outbound = frame.to_vec();
        if self.transport.requires_key_handle_framing() {
            scramble(&mut outbound, &self.scramble_key);
        }

        let reply = match tokio::time::timeout(self.timeout, self.transport.exchange(&outbound))
            .await
        {
            Ok(reply) => reply.map_err(|e| ProtocolError::Transport(e.to_string()))?,
            Err(_) => {
                // the device may have consumed the frame; the handle must be reopened
                self.is_open.store(false, Ordering::Release);
                return Err(ProtocolError::Timeout {
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        log::trace!("<= {}", hex::encode(&reply));
        Ok(reply)
    }
}

/// Transport to communicate with the Ledger Speculos simulator.
pub struct TransportTcp {
    addr: SocketAddr,
    connection: Mutex<Option<TcpStream>>,
    total_exchanges: AtomicU64,
    total_sent: AtomicU64,
    total_received: AtomicU64,
}

impl TransportTcp {
    /// Create a new TCP transport for the provided socket address. No connection is made until
    /// the transport is opened.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connection: Mutex::new(None),
            total_exchanges: AtomicU64::new(0),
            total_sent: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
        }
    }

    /// Create a new TCP transport using the default Speculos address 127.0.0.1:9999.
    pub fn new_default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9999))
    }

    // Number of exchanges made with this instance. An exchange includes
    // both sending a frame and receiving a response.
    pub fn total_exchanges(&self) -> u64 {
        self.total_exchanges.load(Ordering::Relaxed)
    }

    // Total bytes sent
    pub fn total_sent(&self) -> u64 {
        self.total_sent.load(Ordering::Relaxed)
    }

    // Total bytes received
    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for TransportTcp {
    type Error = std::io::Error;

    fn is_supported(&self) -> bool {
        true
    }

    async fn open(&self) -> std::io::Result<()> {
        let stream = TcpStream::connect(self.addr).await?;
        *self.connection.lock().await = Some(stream);
        Ok(())
    }

    async fn close(&self) -> std::io::Result<()> {
        if let Some(mut stream) = self.connection.lock().await.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn exchange(&self, frame: &[u8]) -> std::io::Result<Vec<u8>> {
        self.total_exchanges.fetch_add(1, Ordering::Relaxed);

        let mut connection = self.connection.lock().await;
        let stream = connection.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotConnected, "transport is not open")
        })?;

        let mut req = Vec::with_capacity(frame.len() + 4);
        req.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        req.extend_from_slice(frame);
        stream.write_all(&req).await?;
        self.total_sent
            .fetch_add(req.len() as u64, Ordering::Relaxed);

        let mut buff = [0u8; 4];
        stream.read_exact(&mut buff).await?;
        let len = u32::from_be_bytes(buff) as usize;
        self.total_received.fetch_add(4, Ordering::Relaxed); // length header

        // the length header does not count the status word
        let mut resp = vec![0u8; len + STATUS_WORD_SIZE];
        stream.read_exact(&mut resp).await?;
        self.total_received
            .fetch_add(resp.len() as u64, Ordering::Relaxed);
        Ok(resp)
    }
}

#[cfg(feature = "hid")]
pub use hid::TransportHID;

#[cfg(feature = "hid")]
mod hid {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use common::apdu::{APDUAnswer, APDUCommand};
    use hidapi::HidApi;
    use ledger_transport_hid::TransportNativeHID;

    use super::Transport;

    /// Transport with a Ledger device connected over USB.
    pub struct TransportHID {
        device: Mutex<Option<TransportNativeHID>>,
    }

    impl TransportHID {
        pub fn new() -> Self {
            Self {
                device: Mutex::new(None),
            }
        }
    }

    impl Default for TransportHID {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Transport for TransportHID {
        type Error = String;

        fn is_supported(&self) -> bool {
            HidApi::new()
                .map(|api| TransportNativeHID::list_ledgers(&api).next().is_some())
                .unwrap_or(false)
        }

        async fn open(&self) -> Result<(), String> {
            let api = HidApi::new().map_err(|e| e.to_string())?;
            let device = TransportNativeHID::new(&api).map_err(|e| e.to_string())?;
            *self.device.lock().map_err(|e| e.to_string())? = Some(device);
            Ok(())
        }

        async fn close(&self) -> Result<(), String> {
            self.device.lock().map_err(|e| e.to_string())?.take();
            Ok(())
        }

        async fn exchange(&self, frame: &[u8]) -> Result<Vec<u8>, String> {
            let cmd = APDUCommand::decode(frame).map_err(|e| e.to_string())?;
            let device = self.device.lock().map_err(|e| e.to_string())?;
            let device = device.as_ref().ok_or("transport is not open")?;
            let answer = device
                .exchange(&ledger_apdu::APDUCommand {
                    cla: cmd.cla,
                    ins: cmd.ins,
                    p1: cmd.p1,
                    p2: cmd.p2,
                    data: cmd.data,
                })
                .map_err(|e| e.to_string())?;
            Ok(APDUAnswer::to_raw(answer.data(), answer.retcode()))
        }
    }
}

/// Splits a raw reply and turns any status word other than 0x9000 into an error.
pub(crate) fn into_payload(raw: Vec<u8>) -> Result<Vec<u8>> {
    let answer = APDUAnswer::from_answer(raw)?;
    if !answer.is_success() {
        return Err(ProtocolError::rejected(answer.retcode()));
    }
    Ok(answer.into_data())
}
