//! Description of one transaction input to be signed by the device.
//!
//! A [`SigningInput`] pairs the previous transaction holding the spent output with the
//! derivation path of the key that owns it. Values derived from those fields (outpoint key,
//! previous output script, coin, key ring) are computed on first access and cached. Caches
//! are not tied to the fields: after changing a field, call [`SigningInput::refresh`].

use std::sync::OnceLock;

use bitcoin::bip32::DerivationPath;
use bitcoin::consensus::serialize;
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{OutPoint, PublicKey, ScriptBuf, Transaction};
use common::constants::MAX_DERIVATION_DEPTH;

use crate::coin::{Coin, KeyRing};
use crate::error::{ProtocolError, Result};

/// Serialized outpoint: the txid in internal byte order followed by the output index,
/// little-endian.
pub type OutpointKey = [u8; 36];

pub fn outpoint_key(outpoint: &OutPoint) -> OutpointKey {
    let mut key = [0u8; 36];
    key.copy_from_slice(&serialize(outpoint));
    key
}

#[derive(Debug)]
pub struct SigningInput {
    path: Vec<u32>,
    tx: Transaction,
    index: u32,
    redeem: Option<ScriptBuf>,
    sighash: Option<EcdsaSighashType>,
    public_key: Option<PublicKey>,
    height: Option<u32>,

    outpoint_key: OnceLock<OutpointKey>,
    prev_script: OnceLock<ScriptBuf>,
    coin: OnceLock<Coin>,
    ring: OnceLock<KeyRing>,
}

impl SigningInput {
    pub fn builder(tx: Transaction, index: u32, path: impl Into<Vec<u32>>) -> SigningInputBuilder {
        SigningInputBuilder {
            path: path.into(),
            tx,
            index,
            redeem: None,
            sighash: None,
            public_key: None,
            height: None,
        }
    }

    /// Converts a parsed derivation path into the raw child numbers the device expects.
    pub fn path_from(path: &DerivationPath) -> Vec<u32> {
        path.into_iter().map(|step| u32::from(*step)).collect()
    }

    pub fn path(&self) -> &[u32] {
        &self.path
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn redeem_script(&self) -> Option<&ScriptBuf> {
        self.redeem.as_ref()
    }

    pub fn public_key(&self) -> Option<&PublicKey> {
        self.public_key.as_ref()
    }

    /// Explicit sighash type, if one other than the device's implicit `ALL` was requested.
    pub fn sighash(&self) -> Option<EcdsaSighashType> {
        self.sighash
    }

    /// The sighash type the device will sign with.
    pub fn effective_sighash(&self) -> EcdsaSighashType {
        self.sighash.unwrap_or(EcdsaSighashType::All)
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.tx.compute_txid(), self.index)
    }

    pub fn outpoint_key(&self) -> &OutpointKey {
        self.outpoint_key
            .get_or_init(|| outpoint_key(&self.outpoint()))
    }

    pub fn prev_script(&self) -> &ScriptBuf {
        // the index was checked against the outputs when the input was built
        self.prev_script
            .get_or_init(|| self.tx.output[self.index as usize].script_pubkey.clone())
    }

    /// The script the device commits to for this input: the redeem script when spending
    /// through one, the previous output script otherwise.
    pub fn script_code(&self) -> &ScriptBuf {
        self.redeem.as_ref().unwrap_or_else(|| self.prev_script())
    }

    pub fn coin(&self) -> Result<&Coin> {
        if let Some(coin) = self.coin.get() {
            return Ok(coin);
        }
        let coin = Coin::from_tx(&self.tx, self.index, self.height)?;
        Ok(self.coin.get_or_init(|| coin))
    }

    pub fn ring(&self) -> Result<&KeyRing> {
        if let Some(ring) = self.ring.get() {
            return Ok(ring);
        }
        let public_key = self.public_key.ok_or(ProtocolError::MissingKey("public key"))?;
        let ring = KeyRing::from_public(public_key, self.redeem.clone());
        Ok(self.ring.get_or_init(|| ring))
    }

    /// Replaces the public key. Cached values are kept until [`SigningInput::refresh`].
    pub fn set_public_key(&mut self, raw: &[u8]) -> Result<()> {
        self.public_key = Some(parse_public_key(raw)?);
        Ok(())
    }

    /// Replaces the redeem script. Cached values are kept until [`SigningInput::refresh`].
    pub fn set_redeem_script(&mut self, redeem: Option<ScriptBuf>) {
        self.redeem = redeem;
    }

    /// Drops every cached value; the next access recomputes it from the current fields.
    pub fn refresh(&mut self) {
        self.outpoint_key.take();
        self.prev_script.take();
        self.coin.take();
        self.ring.take();
    }
}

fn parse_public_key(raw: &[u8]) -> Result<PublicKey> {
    PublicKey::from_slice(raw).map_err(|e| ProtocolError::invalid_input("public_key", e.to_string()))
}

pub struct SigningInputBuilder {
    path: Vec<u32>,
    tx: Transaction,
    index: u32,
    redeem: Option<ScriptBuf>,
    sighash: Option<EcdsaSighashType>,
    public_key: Option<Vec<u8>>,
    height: Option<u32>,
}

impl SigningInputBuilder {
    pub fn redeem_script(mut self, redeem: ScriptBuf) -> Self {
        self.redeem = Some(redeem);
        self
    }

    /// Sighash type to sign with. The device signs with `ALL` unless told otherwise, and
    /// stating `ALL` explicitly is rejected.
    pub fn sighash(mut self, sighash: EcdsaSighashType) -> Self {
        self.sighash = Some(sighash);
        self
    }

    /// Raw SEC1 public key, compressed or not.
    pub fn public_key(mut self, raw: impl Into<Vec<u8>>) -> Self {
        self.public_key = Some(raw.into());
        self
    }

    pub fn height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    pub fn build(self) -> Result<SigningInput> {
        if self.path.is_empty() {
            return Err(ProtocolError::invalid_input(
                "derivation_path",
                "path must not be empty",
            ));
        }
        if self.path.len() > MAX_DERIVATION_DEPTH {
            return Err(ProtocolError::invalid_input(
                "derivation_path",
                format!(
                    "depth {} exceeds the device limit of {}",
                    self.path.len(),
                    MAX_DERIVATION_DEPTH
                ),
            ));
        }
        if self.index as usize >= self.tx.output.len() {
            return Err(ProtocolError::invalid_input(
                "output_index",
                format!(
                    "{} is out of range for {} outputs",
                    self.index,
                    self.tx.output.len()
                ),
            ));
        }
        if self.sighash == Some(EcdsaSighashType::All) {
            return Err(ProtocolError::invalid_input(
                "sighash",
                "ALL is implied and must not be given explicitly",
            ));
        }
        let public_key = self.public_key.as_deref().map(parse_public_key).transpose()?;

        Ok(SigningInput {
            path: self.path,
            tx: self.tx,
            index: self.index,
            redeem: self.redeem,
            sighash: self.sighash,
            public_key,
            height: self.height,
            outpoint_key: OnceLock::new(),
            prev_script: OnceLock::new(),
            coin: OnceLock::new(),
            ring: OnceLock::new(),
        })
    }
}
