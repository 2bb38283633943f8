//! Views over transaction data that the signing flow derives from a previous transaction.

use bitcoin::{Address, Amount, Network, OutPoint, PublicKey, ScriptBuf, Transaction};

use crate::error::{ProtocolError, Result};

/// A spendable output, as seen from the transaction that created it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coin {
    pub version: i32,
    /// Height of the block containing the transaction, if it is confirmed.
    pub height: Option<u32>,
    pub value: Amount,
    pub script_pubkey: ScriptBuf,
    pub coinbase: bool,
    pub outpoint: OutPoint,
}

impl Coin {
    pub fn from_tx(tx: &Transaction, index: u32, height: Option<u32>) -> Result<Self> {
        let output = tx.output.get(index as usize).ok_or_else(|| {
            ProtocolError::invalid_input(
                "output_index",
                format!("{} is out of range for {} outputs", index, tx.output.len()),
            )
        })?;
        Ok(Self {
            version: tx.version.0,
            height,
            value: output.value,
            script_pubkey: output.script_pubkey.clone(),
            coinbase: tx.is_coinbase(),
            outpoint: OutPoint::new(tx.compute_txid(), index),
        })
    }
}

/// A public key, optionally paired with the redeem script it is spent through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRing {
    pub public_key: PublicKey,
    pub script: Option<ScriptBuf>,
}

impl KeyRing {
    pub fn from_public(public_key: PublicKey, script: Option<ScriptBuf>) -> Self {
        Self { public_key, script }
    }

    /// The address funds for this ring are sent to: P2SH of the redeem script when there is
    /// one, P2PKH of the key otherwise.
    pub fn address(&self, network: Network) -> Result<Address> {
        match &self.script {
            Some(script) => Address::p2sh(script, network)
                .map_err(|e| ProtocolError::invalid_input("redeem_script", e.to_string())),
            None => Ok(Address::p2pkh(self.public_key.pubkey_hash(), network)),
        }
    }

    /// The script that has to be committed to when signing an input owned by this ring.
    pub fn script_code(&self) -> ScriptBuf {
        match &self.script {
            Some(script) => script.clone(),
            None => ScriptBuf::new_p2pkh(&self.public_key.pubkey_hash()),
        }
    }
}
