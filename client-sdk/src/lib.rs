//! Host-side client for the legacy signing flow of the Ledger Bitcoin application.

pub mod app;
pub mod coin;
pub mod command;
pub mod config;
pub mod error;
pub mod input;
pub mod replay;
pub mod session;
pub mod transport;

pub use app::{AddressFormat, FirmwareVersion, LedgerBtcApp, WalletPublicKey};
pub use coin::{Coin, KeyRing};
pub use command::{CommandBuilder, CommandKind, ProtocolCommand, TrustedInputs};
pub use config::{Config, FinalizeRejectionPolicy};
pub use error::{ProtocolError, Result};
pub use input::{OutpointKey, SigningInput, SigningInputBuilder};
pub use session::{Session, SessionState, SignedInput};
pub use transport::{Transport, TransportAdapter, TransportTcp};

#[cfg(feature = "hid")]
pub use transport::TransportHID;
