//! Client for the Bitcoin application of a Ledger device.

use bitcoin::{PublicKey, Transaction};
use common::apdu::{APDUCommand, FrameError};
use common::constants::{ins, p1, CLA, MAX_DERIVATION_DEPTH};

use crate::config::Config;
use crate::error::{ProtocolError, Result};
use crate::input::SigningInput;
use crate::session::{self, Session, SignedInput};
use crate::transport::{into_payload, Transport, TransportAdapter};

/// Address encoding the device uses when it derives an address for a key.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressFormat {
    #[default]
    Legacy = 0x00,
    P2shSegwit = 0x01,
    Bech32 = 0x02,
}

/// Response to the wallet public key command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletPublicKey {
    /// Compressed form of the key returned by the device.
    pub public_key: PublicKey,
    pub address: String,
    pub chain_code: [u8; 32],
}

impl WalletPublicKey {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (key, rest) = take_prefixed(data, "public key")?;
        let (address, rest) = take_prefixed(rest, "address")?;
        let chain_code: [u8; 32] = rest
            .try_into()
            .map_err(|_| FrameError::UnexpectedPayload("chain code must be 32 bytes"))?;

        let public_key = PublicKey::from_slice(key)
            .map_err(|_| FrameError::UnexpectedPayload("invalid public key"))?;
        let address = String::from_utf8(address.to_vec())
            .map_err(|_| FrameError::UnexpectedPayload("address is not valid text"))?;

        Ok(Self {
            public_key: PublicKey::new(public_key.inner),
            address,
            chain_code,
        })
    }
}

// Splits a length-prefixed field off the front of `data`.
fn take_prefixed<'d>(data: &'d [u8], what: &'static str) -> Result<(&'d [u8], &'d [u8])> {
    let (len, rest) = data
        .split_first()
        .ok_or(FrameError::UnexpectedPayload(what))?;
    let len = *len as usize;
    if rest.len() < len {
        return Err(FrameError::UnexpectedPayload(what).into());
    }
    Ok(rest.split_at(len))
}

/// Response to the firmware version command.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FirmwareVersion {
    pub compressed_keys: bool,
    pub has_screen_and_buttons: bool,
    pub external_screen_and_buttons: bool,
    pub nfc_payment_ext: bool,
    pub ble_low_power_ext: bool,
    pub tee: bool,
    pub architecture: u8,
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub loader: Option<(u8, u8)>,
}

impl FirmwareVersion {
    pub fn decode(data: &[u8]) -> Result<Self> {
        // 7 bytes are documented, some devices append a vestigial eighth one
        if !(5..=8).contains(&data.len()) {
            return Err(FrameError::UnexpectedPayload("firmware version must be 5 to 8 bytes").into());
        }
        let flags = data[0];
        Ok(Self {
            compressed_keys: flags & 0x01 != 0,
            has_screen_and_buttons: flags & 0x02 != 0,
            external_screen_and_buttons: flags & 0x04 != 0,
            nfc_payment_ext: flags & 0x08 != 0,
            ble_low_power_ext: flags & 0x10 != 0,
            tee: flags & 0x20 != 0,
            architecture: data[1],
            major: data[2],
            minor: data[3],
            patch: data[4],
            loader: if data.len() >= 7 {
                Some((data[5], data[6]))
            } else {
                None
            },
        })
    }
}

fn encode_path(path: &[u32]) -> Result<Vec<u8>> {
    if path.is_empty() || path.len() > MAX_DERIVATION_DEPTH {
        return Err(ProtocolError::invalid_input(
            "path",
            format!(
                "depth must be between 1 and {}, got {}",
                MAX_DERIVATION_DEPTH,
                path.len()
            ),
        ));
    }
    let mut data = Vec::with_capacity(1 + 4 * path.len());
    data.push(path.len() as u8);
    for child in path {
        data.extend_from_slice(&child.to_be_bytes());
    }
    Ok(data)
}

/// A Bitcoin application reached through a transport.
pub struct LedgerBtcApp<T: Transport> {
    adapter: TransportAdapter<T>,
    config: Config,
}

impl<T: Transport> LedgerBtcApp<T> {
    pub fn new(transport: T, config: Config) -> Result<Self> {
        let adapter = TransportAdapter::new(transport, &config)?;
        Ok(Self { adapter, config })
    }

    pub fn adapter(&self) -> &TransportAdapter<T> {
        &self.adapter
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn open(&self) -> Result<()> {
        self.adapter.open().await
    }

    pub async fn close(&self) -> Result<()> {
        self.adapter.close().await
    }

    /// A fresh session, for callers that drive the commands themselves.
    pub fn session(&self) -> Session<'_, T> {
        Session::new(&self.adapter, &self.config)
    }

    async fn send_single(&self, command: APDUCommand) -> Result<Vec<u8>> {
        let frame = command.encode(self.config.max_frame_size)?;
        let raw = self.adapter.exchange(&frame).await?;
        into_payload(raw)
    }

    pub async fn get_firmware_version(&self) -> Result<FirmwareVersion> {
        let payload = self
            .send_single(APDUCommand {
                cla: CLA,
                ins: ins::GET_FIRMWARE_VERSION,
                p1: 0,
                p2: 0,
                data: Vec::new(),
            })
            .await?;
        FirmwareVersion::decode(&payload)
    }

    /// Derives the key at `path`, optionally showing its address on the device screen.
    pub async fn get_wallet_public_key(
        &self,
        path: &[u32],
        display: bool,
        format: AddressFormat,
    ) -> Result<WalletPublicKey> {
        let payload = self
            .send_single(APDUCommand {
                cla: CLA,
                ins: ins::GET_WALLET_PUBLIC_KEY,
                p1: if display { p1::DISPLAY } else { p1::NO_DISPLAY },
                p2: format as u8,
                data: encode_path(path)?,
            })
            .await?;
        WalletPublicKey::decode(&payload)
    }

    pub async fn sign_input(
        &self,
        tx: &Transaction,
        inputs: &[SigningInput],
        target: usize,
    ) -> Result<SignedInput> {
        session::sign_input(&self.adapter, &self.config, tx, inputs, target).await
    }

    pub async fn sign_transaction(
        &self,
        tx: &Transaction,
        inputs: &[SigningInput],
    ) -> Result<Vec<SignedInput>> {
        session::sign_transaction(&self.adapter, &self.config, tx, inputs).await
    }
}
