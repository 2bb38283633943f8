//! Translation of a transaction and its signing inputs into the commands of the device's
//! legacy signing flow.
//!
//! The flow is strictly ordered:
//!
//! 1. one trusted-input registration per spent output the caller can describe,
//! 2. a hash-start announcing the transaction version and input count,
//! 3. one continuation per input,
//! 4. one continuation per output, the last chunk of each being its finalization,
//! 5. the sign command.
//!
//! Every command is pre-split into frame-sized chunks. Each variant carries what the session
//! needs to check that ordering before anything reaches the device.

use std::collections::BTreeMap;

use bitcoin::consensus::encode::VarInt;
use bitcoin::consensus::serialize;
use bitcoin::{Transaction, TxOut};
use common::apdu::{max_payload, FrameError};
use common::comm::{chunk_fields, Chunk};
use common::constants::{ins, input_marker, p1, p2};

use crate::error::{ProtocolError, Result};
use crate::input::{outpoint_key, OutpointKey, SigningInput};

/// Trusted-input tokens returned by the device, keyed by the outpoint they stand for.
pub type TrustedInputs = BTreeMap<OutpointKey, Vec<u8>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    TrustedInputRequest,
    HashStart,
    HashInputContinuation,
    HashOutputContinuation,
    Finalize,
    Sign,
}

impl CommandKind {
    pub fn ins(&self) -> u8 {
        match self {
            CommandKind::TrustedInputRequest => ins::GET_TRUSTED_INPUT,
            CommandKind::HashStart | CommandKind::HashInputContinuation => ins::HASH_INPUT_START,
            CommandKind::HashOutputContinuation | CommandKind::Finalize => {
                ins::HASH_INPUT_FINALIZE_FULL
            }
            CommandKind::Sign => ins::HASH_SIGN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::TrustedInputRequest => "trusted input request",
            CommandKind::HashStart => "hash start",
            CommandKind::HashInputContinuation => "input continuation",
            CommandKind::HashOutputContinuation => "output continuation",
            CommandKind::Finalize => "output finalization",
            CommandKind::Sign => "sign",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolCommand {
    TrustedInputRequest {
        outpoint: OutpointKey,
        chunks: Vec<Chunk>,
    },
    HashStart {
        input_count: usize,
        new_transaction: bool,
        /// Whether at least one input is announced through a trusted-input token.
        trusted: bool,
        chunks: Vec<Chunk>,
    },
    HashInputContinuation {
        input_index: usize,
        trusted: bool,
        chunks: Vec<Chunk>,
    },
    HashOutputContinuation {
        output_index: usize,
        chunks: Vec<Chunk>,
    },
    Finalize {
        output_index: usize,
        output_count: usize,
        chunks: Vec<Chunk>,
    },
    Sign {
        input_index: usize,
        chunks: Vec<Chunk>,
    },
}

impl ProtocolCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ProtocolCommand::TrustedInputRequest { .. } => CommandKind::TrustedInputRequest,
            ProtocolCommand::HashStart { .. } => CommandKind::HashStart,
            ProtocolCommand::HashInputContinuation { .. } => CommandKind::HashInputContinuation,
            ProtocolCommand::HashOutputContinuation { .. } => CommandKind::HashOutputContinuation,
            ProtocolCommand::Finalize { .. } => CommandKind::Finalize,
            ProtocolCommand::Sign { .. } => CommandKind::Sign,
        }
    }

    pub fn chunks(&self) -> &[Chunk] {
        match self {
            ProtocolCommand::TrustedInputRequest { chunks, .. }
            | ProtocolCommand::HashStart { chunks, .. }
            | ProtocolCommand::HashInputContinuation { chunks, .. }
            | ProtocolCommand::HashOutputContinuation { chunks, .. }
            | ProtocolCommand::Finalize { chunks, .. }
            | ProtocolCommand::Sign { chunks, .. } => chunks,
        }
    }
}

// Assigns positions and parameter bytes to a list of payloads.
fn frames(payloads: Vec<Vec<u8>>, p1_first: u8, p1_next: u8, p2: u8) -> Vec<Chunk> {
    let total = payloads.len();
    payloads
        .into_iter()
        .enumerate()
        .map(|(index, data)| Chunk {
            index,
            total,
            p1: if index == 0 { p1_first } else { p1_next },
            p2,
            data,
        })
        .collect()
}

fn varint(n: usize) -> Vec<u8> {
    serialize(&VarInt(n as u64))
}

// Value and script length of an output, which always travel together.
fn output_prefix(output: &TxOut) -> Vec<u8> {
    let mut prefix = output.value.to_sat().to_le_bytes().to_vec();
    prefix.extend_from_slice(&varint(output.script_pubkey.len()));
    prefix
}

pub struct CommandBuilder<'a> {
    tx: &'a Transaction,
    inputs: &'a [SigningInput],
    max_payload: usize,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(
        tx: &'a Transaction,
        inputs: &'a [SigningInput],
        max_frame_size: usize,
    ) -> Result<Self> {
        if tx.input.is_empty() {
            return Err(ProtocolError::invalid_input(
                "transaction",
                "transaction has no inputs",
            ));
        }
        if tx.output.is_empty() {
            return Err(ProtocolError::invalid_input(
                "transaction",
                "transaction has no outputs",
            ));
        }
        for input in inputs {
            let key = input.outpoint_key();
            if !tx
                .input
                .iter()
                .any(|txin| outpoint_key(&txin.previous_output) == *key)
            {
                return Err(ProtocolError::invalid_input(
                    "inputs",
                    format!("{} is not spent by the transaction", input.outpoint()),
                ));
            }
        }
        Ok(Self {
            tx,
            inputs,
            max_payload: max_payload(max_frame_size)?,
        })
    }

    pub fn tx(&self) -> &Transaction {
        self.tx
    }

    /// The signing input describing the output spent by input `index` of the transaction.
    pub fn signing_input(&self, index: usize) -> Option<&'a SigningInput> {
        let txin = self.tx.input.get(index)?;
        let key = outpoint_key(&txin.previous_output);
        self.inputs.iter().find(|input| *input.outpoint_key() == key)
    }

    /// One registration per spent output described by a signing input, in input order.
    pub fn trusted_input_requests(&self) -> Vec<ProtocolCommand> {
        let mut seen: Vec<OutpointKey> = Vec::new();
        let mut commands = Vec::new();
        for index in 0..self.tx.input.len() {
            let Some(input) = self.signing_input(index) else {
                continue;
            };
            let key = *input.outpoint_key();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            commands.push(ProtocolCommand::TrustedInputRequest {
                outpoint: key,
                chunks: self.trusted_input_chunks(input),
            });
        }
        commands
    }

    fn trusted_input_chunks(&self, input: &SigningInput) -> Vec<Chunk> {
        let prev = input.tx();
        let max = self.max_payload;
        let mut payloads = Vec::new();

        let mut head = input.index().to_be_bytes().to_vec();
        head.extend_from_slice(&prev.version.0.to_le_bytes());
        head.extend_from_slice(&varint(prev.input.len()));
        payloads.extend(chunk_fields(&[&head], max));

        for txin in &prev.input {
            let mut outpoint = serialize(&txin.previous_output);
            outpoint.extend_from_slice(&varint(txin.script_sig.len()));
            payloads.extend(chunk_fields(&[&outpoint], max));
            let sequence = txin.sequence.to_consensus_u32().to_le_bytes();
            payloads.extend(chunk_fields(&[txin.script_sig.as_bytes(), &sequence], max));
        }

        payloads.extend(chunk_fields(&[&varint(prev.output.len())], max));
        for output in &prev.output {
            let prefix = output_prefix(output);
            payloads.extend(chunk_fields(&[&prefix, output.script_pubkey.as_bytes()], max));
        }

        let lock_time = prev.lock_time.to_consensus_u32().to_le_bytes();
        payloads.extend(chunk_fields(&[&lock_time], max));

        frames(payloads, p1::FIRST, p1::NEXT, p2::NONE)
    }

    /// The commands producing the signature of input `target`: hash-start, every input, every
    /// output, then sign.
    ///
    /// Inputs with a token in `trusted` are announced in trusted form. `new_transaction` is
    /// false when a previous signature of the same transaction was produced in this session.
    pub fn signing_commands(
        &self,
        target: usize,
        trusted: &TrustedInputs,
        new_transaction: bool,
    ) -> Result<Vec<ProtocolCommand>> {
        let signer = self.signing_input(target).ok_or_else(|| {
            ProtocolError::invalid_input(
                "target",
                format!("no signing input describes transaction input {}", target),
            )
        })?;

        let mut commands = Vec::with_capacity(self.tx.input.len() + self.tx.output.len() + 2);
        commands.push(self.hash_start(trusted, new_transaction));
        for index in 0..self.tx.input.len() {
            let script_code = if index == target {
                Some(signer.script_code().as_bytes())
            } else {
                None
            };
            commands.push(self.hash_input(index, script_code, trusted, new_transaction)?);
        }
        commands.extend(self.hash_outputs());
        commands.push(self.sign(target, signer)?);
        Ok(commands)
    }

    fn hash_start(&self, trusted: &TrustedInputs, new_transaction: bool) -> ProtocolCommand {
        let mut head = self.tx.version.0.to_le_bytes().to_vec();
        head.extend_from_slice(&varint(self.tx.input.len()));
        ProtocolCommand::HashStart {
            input_count: self.tx.input.len(),
            new_transaction,
            trusted: self
                .tx
                .input
                .iter()
                .any(|txin| trusted.contains_key(&outpoint_key(&txin.previous_output))),
            chunks: frames(
                chunk_fields(&[&head], self.max_payload),
                p1::FIRST,
                p1::NEXT,
                hash_p2(new_transaction),
            ),
        }
    }

    fn hash_input(
        &self,
        index: usize,
        script_code: Option<&[u8]>,
        trusted: &TrustedInputs,
        new_transaction: bool,
    ) -> Result<ProtocolCommand> {
        let txin = &self.tx.input[index];
        let script = script_code.unwrap_or(&[]);

        let token = trusted.get(&outpoint_key(&txin.previous_output));
        let mut header = match token {
            Some(token) => {
                let len = u8::try_from(token.len())
                    .map_err(|_| FrameError::UnexpectedPayload("trusted input longer than 255 bytes"))?;
                let mut header = vec![input_marker::TRUSTED, len];
                header.extend_from_slice(token);
                header
            }
            None => {
                let mut header = vec![input_marker::UNTRUSTED];
                header.extend_from_slice(&serialize(&txin.previous_output));
                header
            }
        };
        header.extend_from_slice(&varint(script.len()));

        let sequence = txin.sequence.to_consensus_u32().to_le_bytes();
        let mut payloads = chunk_fields(&[&header], self.max_payload);
        payloads.extend(chunk_fields(&[script, &sequence], self.max_payload));

        Ok(ProtocolCommand::HashInputContinuation {
            input_index: index,
            trusted: token.is_some(),
            chunks: frames(payloads, p1::NEXT, p1::NEXT, hash_p2(new_transaction)),
        })
    }

    fn hash_outputs(&self) -> Vec<ProtocolCommand> {
        let output_count = self.tx.output.len();
        let count = varint(output_count);
        let mut commands = Vec::with_capacity(output_count);

        for (output_index, output) in self.tx.output.iter().enumerate() {
            let prefix = output_prefix(output);
            let leading: &[u8] = if output_index == 0 { &count } else { &[] };
            let mut payloads = chunk_fields(
                &[leading, &prefix, output.script_pubkey.as_bytes()],
                self.max_payload,
            );
            let last_output = output_index + 1 == output_count;

            // the last chunk of each output closes it; only the very last one ends the stream
            let closing = payloads.pop().unwrap_or_default();
            if !payloads.is_empty() {
                commands.push(ProtocolCommand::HashOutputContinuation {
                    output_index,
                    chunks: frames(payloads, p1::MORE, p1::MORE, p2::NONE),
                });
            }
            let closing_p1 = if last_output { p1::LAST } else { p1::MORE };
            commands.push(ProtocolCommand::Finalize {
                output_index,
                output_count,
                chunks: frames(vec![closing], closing_p1, closing_p1, p2::NONE),
            });
        }
        commands
    }

    fn sign(&self, input_index: usize, signer: &SigningInput) -> Result<ProtocolCommand> {
        let path = signer.path();
        let mut data = Vec::with_capacity(1 + 4 * path.len() + 6);
        data.push(path.len() as u8);
        for child in path {
            data.extend_from_slice(&child.to_be_bytes());
        }
        // no second factor validation code
        data.push(0x00);
        data.extend_from_slice(&self.tx.lock_time.to_consensus_u32().to_be_bytes());
        data.push(signer.effective_sighash().to_u32() as u8);

        // the device does not accept the sign command split over several frames
        if data.len() > self.max_payload {
            return Err(FrameError::PayloadTooLong {
                len: data.len(),
                max: self.max_payload,
            }
            .into());
        }

        Ok(ProtocolCommand::Sign {
            input_index,
            chunks: frames(vec![data], p1::FIRST, p1::FIRST, p2::NONE),
        })
    }
}

fn hash_p2(new_transaction: bool) -> u8 {
    if new_transaction {
        p2::NEW_TRANSACTION
    } else {
        p2::CONTINUE_TRANSACTION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::sighash::EcdsaSighashType;
    use bitcoin::transaction::Version;
    use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, TxIn, Txid};
    use common::constants::MAX_FRAME_SIZE;
    use hex_literal::hex;

    fn prev_tx(tag: u8, outputs: usize) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([tag; 32]), 0),
                script_sig: ScriptBuf::from_bytes(vec![0xAB; 3]),
                sequence: Sequence::MAX,
                ..Default::default()
            }],
            output: (0..outputs)
                .map(|i| TxOut {
                    value: Amount::from_sat(10_000 * (i as u64 + 1)),
                    script_pubkey: ScriptBuf::from_bytes(vec![0x51 + i as u8]),
                })
                .collect(),
        }
    }

    fn spending_tx(prevs: &[(&Transaction, u32)], outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: Version::ONE,
            lock_time: LockTime::from_consensus(0x1234),
            input: prevs
                .iter()
                .map(|(tx, index)| TxIn {
                    previous_output: OutPoint::new(tx.compute_txid(), *index),
                    sequence: Sequence::MAX,
                    ..Default::default()
                })
                .collect(),
            output: outputs,
        }
    }

    fn output(script_len: usize) -> TxOut {
        TxOut {
            value: Amount::from_sat(1_000),
            script_pubkey: ScriptBuf::from_bytes(vec![0x6A; script_len]),
        }
    }

    fn signing_input(tx: &Transaction, index: u32) -> SigningInput {
        SigningInput::builder(tx.clone(), index, vec![0x8000_002C, 0x8000_0000, 0, 7])
            .build()
            .unwrap()
    }

    #[test]
    fn test_command_counts_and_order() {
        let a = prev_tx(1, 2);
        let b = prev_tx(2, 1);
        let c = prev_tx(3, 1);
        let tx = spending_tx(&[(&a, 1), (&b, 0), (&c, 0)], vec![output(25), output(23)]);
        let inputs = vec![signing_input(&a, 1), signing_input(&b, 0)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();

        let commands = builder
            .signing_commands(1, &TrustedInputs::new(), true)
            .unwrap();
        let kinds: Vec<CommandKind> = commands.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::HashStart,
                CommandKind::HashInputContinuation,
                CommandKind::HashInputContinuation,
                CommandKind::HashInputContinuation,
                CommandKind::Finalize,
                CommandKind::Finalize,
                CommandKind::Sign,
            ]
        );
        assert!(matches!(
            commands.last(),
            Some(ProtocolCommand::Sign { input_index: 1, .. })
        ));
    }

    #[test]
    fn test_trusted_input_requests_follow_input_order() {
        let a = prev_tx(1, 2);
        let b = prev_tx(2, 1);
        let tx = spending_tx(&[(&b, 0), (&a, 1)], vec![output(25)]);
        let inputs = vec![signing_input(&a, 1), signing_input(&b, 0)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();

        let requests = builder.trusted_input_requests();
        let outpoints: Vec<OutpointKey> = requests
            .iter()
            .map(|r| match r {
                ProtocolCommand::TrustedInputRequest { outpoint, .. } => *outpoint,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            outpoints,
            vec![*inputs[1].outpoint_key(), *inputs[0].outpoint_key()]
        );
    }

    #[test]
    fn test_trusted_input_request_layout() {
        let a = prev_tx(1, 2);
        let tx = spending_tx(&[(&a, 1)], vec![output(25)]);
        let inputs = vec![signing_input(&a, 1)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();

        let requests = builder.trusted_input_requests();
        assert_eq!(requests.len(), 1);
        let chunks = requests[0].chunks();
        let data: Vec<&[u8]> = chunks.iter().map(|c| c.data.as_slice()).collect();

        // index, version, input count
        assert_eq!(data[0], &hex!("00000001 01000000 01"));
        let mut outpoint = [1u8; 32].to_vec();
        outpoint.extend_from_slice(&hex!("00000000 03"));
        assert_eq!(data[1], outpoint.as_slice());
        assert_eq!(data[2], &hex!("ababab ffffffff"));
        assert_eq!(data[3], &hex!("02"));
        assert_eq!(data[4], &hex!("1027000000000000 01 51"));
        assert_eq!(data[5], &hex!("204e000000000000 01 52"));
        assert_eq!(data[6], &hex!("00000000"));
        assert_eq!(chunks.len(), 7);

        assert_eq!(chunks[0].p1, p1::FIRST);
        assert!(chunks[1..].iter().all(|c| c.p1 == p1::NEXT));
        assert!(chunks.iter().enumerate().all(|(i, c)| c.index == i && c.total == 7));
    }

    #[test]
    fn test_hash_input_uses_token_and_script_for_target_only() {
        let a = prev_tx(1, 2);
        let b = prev_tx(2, 1);
        let tx = spending_tx(&[(&a, 1), (&b, 0)], vec![output(25)]);
        let inputs = vec![signing_input(&a, 1)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();

        let mut trusted = TrustedInputs::new();
        trusted.insert(*inputs[0].outpoint_key(), vec![0x32, 0x00, 0xAA]);
        let commands = builder.signing_commands(0, &trusted, true).unwrap();
        assert!(matches!(
            commands[0],
            ProtocolCommand::HashStart {
                input_count: 2,
                trusted: true,
                ..
            }
        ));

        let first = &commands[1];
        assert!(matches!(
            first,
            ProtocolCommand::HashInputContinuation {
                input_index: 0,
                trusted: true,
                ..
            }
        ));
        assert_eq!(first.chunks()[0].data, hex!("01 03 3200aa 01"));
        assert_eq!(first.chunks()[1].data, hex!("52 ffffffff"));

        let second = &commands[2];
        assert!(matches!(
            second,
            ProtocolCommand::HashInputContinuation {
                input_index: 1,
                trusted: false,
                ..
            }
        ));
        let mut header = vec![0x00];
        header.extend_from_slice(&serialize(&tx.input[1].previous_output));
        header.push(0x00);
        assert_eq!(second.chunks()[0].data, header);
        assert_eq!(second.chunks()[1].data, hex!("ffffffff"));
        assert!(second.chunks().iter().all(|c| c.p1 == p1::NEXT && c.p2 == 0x00));
    }

    #[test]
    fn test_continue_mode_sets_p2() {
        let a = prev_tx(1, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(25)]);
        let inputs = vec![signing_input(&a, 0)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();

        let commands = builder
            .signing_commands(0, &TrustedInputs::new(), false)
            .unwrap();
        assert!(matches!(
            commands[0],
            ProtocolCommand::HashStart {
                new_transaction: false,
                trusted: false,
                ..
            }
        ));
        assert_eq!(commands[0].chunks()[0].p2, p2::CONTINUE_TRANSACTION);
        assert_eq!(commands[1].chunks()[0].p2, p2::CONTINUE_TRANSACTION);
        assert_eq!(commands[0].chunks()[0].data, hex!("01000000 01"));
    }

    #[test]
    fn test_outputs_finalize_on_last_chunk_only() {
        let a = prev_tx(1, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(25), output(300), output(1)]);
        let inputs = vec![signing_input(&a, 0)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();
        let commands = builder
            .signing_commands(0, &TrustedInputs::new(), true)
            .unwrap();

        let outputs: Vec<&ProtocolCommand> = commands
            .iter()
            .filter(|c| {
                matches!(
                    c.kind(),
                    CommandKind::HashOutputContinuation | CommandKind::Finalize
                )
            })
            .collect();
        let kinds: Vec<CommandKind> = outputs.iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                CommandKind::Finalize,
                CommandKind::HashOutputContinuation,
                CommandKind::Finalize,
                CommandKind::Finalize,
            ]
        );
        let finalizations = kinds.iter().filter(|k| **k == CommandKind::Finalize).count();
        assert_eq!(finalizations, tx.output.len());

        // the stream starts with the output count, and only its very last chunk says so
        assert_eq!(outputs[0].chunks()[0].data[0], 0x03);
        let all: Vec<&Chunk> = outputs.iter().flat_map(|c| c.chunks()).collect();
        let (last, rest) = all.split_last().unwrap();
        assert_eq!(last.p1, p1::LAST);
        assert!(rest.iter().all(|c| c.p1 == p1::MORE));

        // reassembling the chunks gives back the serialized outputs
        let stream: Vec<u8> = all.iter().flat_map(|c| c.data.clone()).collect();
        let mut expected = varint(3);
        for output in &tx.output {
            expected.extend_from_slice(&serialize(output));
        }
        assert_eq!(stream, expected);
    }

    #[test]
    fn test_small_frames_respect_limit() {
        let a = prev_tx(1, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(40), output(2)]);
        let inputs = vec![signing_input(&a, 0)];
        let builder = CommandBuilder::new(&tx, &inputs, 5 + 28).unwrap();

        let mut commands = builder.trusted_input_requests();
        commands.extend(
            builder
                .signing_commands(0, &TrustedInputs::new(), true)
                .unwrap(),
        );
        for chunk in commands.iter().flat_map(|c| c.chunks()) {
            assert!(!chunk.data.is_empty());
            assert!(chunk.data.len() <= 28);
        }
    }

    #[test]
    fn test_oversized_token_is_rejected() {
        let a = prev_tx(1, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(1)]);
        let inputs = vec![signing_input(&a, 0)];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();

        let mut trusted = TrustedInputs::new();
        trusted.insert(*inputs[0].outpoint_key(), vec![0x32; 256]);
        assert!(matches!(
            builder.signing_commands(0, &trusted, true),
            Err(ProtocolError::Framing(FrameError::UnexpectedPayload(_)))
        ));

        trusted.insert(*inputs[0].outpoint_key(), vec![0x32; 255]);
        assert!(builder.signing_commands(0, &trusted, true).is_ok());
    }

    #[test]
    fn test_sign_layout() {
        let a = prev_tx(1, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(25)]);
        let inputs = vec![SigningInput::builder(a.clone(), 0, vec![0x8000_002C, 5])
            .sighash(EcdsaSighashType::SinglePlusAnyoneCanPay)
            .build()
            .unwrap()];
        let builder = CommandBuilder::new(&tx, &inputs, MAX_FRAME_SIZE).unwrap();
        let commands = builder
            .signing_commands(0, &TrustedInputs::new(), true)
            .unwrap();
        let sign = commands.last().unwrap();
        assert_eq!(sign.kind(), CommandKind::Sign);
        assert_eq!(sign.kind().ins(), 0x48);
        assert_eq!(
            sign.chunks()[0].data,
            hex!("02 8000002c 00000005 00 00001234 83")
        );
    }

    #[test]
    fn test_sign_must_fit_one_frame() {
        let a = prev_tx(1, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(1)]);
        let inputs = vec![SigningInput::builder(a.clone(), 0, vec![1u32; 10])
            .build()
            .unwrap()];
        let builder = CommandBuilder::new(&tx, &inputs, 5 + 40).unwrap();
        assert!(matches!(
            builder.signing_commands(0, &TrustedInputs::new(), true),
            Err(ProtocolError::Framing(FrameError::PayloadTooLong { len: 47, max: 40 }))
        ));
    }

    #[test]
    fn test_invalid_builder_inputs() {
        let a = prev_tx(1, 1);
        let b = prev_tx(2, 1);
        let tx = spending_tx(&[(&a, 0)], vec![output(1)]);

        let unrelated = vec![signing_input(&b, 0)];
        assert!(matches!(
            CommandBuilder::new(&tx, &unrelated, MAX_FRAME_SIZE),
            Err(ProtocolError::InvalidInput { field: "inputs", .. })
        ));

        let no_outputs = spending_tx(&[(&a, 0)], vec![]);
        assert!(matches!(
            CommandBuilder::new(&no_outputs, &[], MAX_FRAME_SIZE),
            Err(ProtocolError::InvalidInput {
                field: "transaction",
                ..
            })
        ));

        let builder = CommandBuilder::new(&tx, &[], MAX_FRAME_SIZE).unwrap();
        assert!(matches!(
            builder.signing_commands(0, &TrustedInputs::new(), true),
            Err(ProtocolError::InvalidInput { field: "target", .. })
        ));
    }
}
