//! Drives the command sequence of a signing session over a [`TransportAdapter`].
//!
//! A session only ever moves forward. Every command is checked against the current state
//! before its first frame is sent, and any failure ends the session: it refuses further
//! commands and the caller gets no partial result.

use bitcoin::Transaction;
use common::apdu::{APDUAnswer, APDUCommand, FrameError};
use common::constants::{CLA, DER_SEQUENCE_TAG, SIGNATURE_PARITY_MASK};

use crate::command::{CommandBuilder, CommandKind, ProtocolCommand, TrustedInputs};
use crate::config::{Config, FinalizeRejectionPolicy};
use crate::error::{ProtocolError, Result};
use crate::input::SigningInput;
use crate::transport::{Transport, TransportAdapter};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    TrustedInputs,
    HashingInputs { total: usize, hashed: usize },
    HashingOutputs { total: Option<usize>, finalized: usize },
    Signed,
    Aborted,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::TrustedInputs => "registering trusted inputs",
            SessionState::HashingInputs { .. } => "hashing inputs",
            SessionState::HashingOutputs { .. } => "hashing outputs",
            SessionState::Signed => "signed",
            SessionState::Aborted => "aborted",
        }
    }

    /// The state reached once `command` has been accepted by the device.
    pub fn advance(&self, command: &ProtocolCommand) -> Result<SessionState> {
        let next = match (*self, command) {
            (
                SessionState::Idle | SessionState::TrustedInputs,
                ProtocolCommand::TrustedInputRequest { .. },
            ) => Some(SessionState::TrustedInputs),

            (
                SessionState::Idle | SessionState::TrustedInputs,
                ProtocolCommand::HashStart {
                    input_count,
                    new_transaction: true,
                    ..
                },
            )
            | (
                SessionState::Signed,
                ProtocolCommand::HashStart {
                    input_count,
                    new_transaction: false,
                    ..
                },
            ) => Some(SessionState::HashingInputs {
                total: *input_count,
                hashed: 0,
            }),

            (
                SessionState::HashingInputs { total, hashed },
                ProtocolCommand::HashInputContinuation { input_index, .. },
            ) if hashed < total && *input_index == hashed => Some(SessionState::HashingInputs {
                total,
                hashed: hashed + 1,
            }),

            (
                SessionState::HashingInputs { total, hashed },
                ProtocolCommand::HashOutputContinuation {
                    output_index: 0, ..
                },
            ) if hashed == total => Some(SessionState::HashingOutputs {
                total: None,
                finalized: 0,
            }),
            // an output spanning several frames, before its finalization
            (
                SessionState::HashingOutputs { total, finalized },
                ProtocolCommand::HashOutputContinuation { output_index, .. },
            ) if *output_index == finalized && total.map_or(true, |t| finalized < t) => {
                Some(*self)
            }

            (
                SessionState::HashingInputs { total, hashed },
                ProtocolCommand::Finalize {
                    output_index: 0,
                    output_count,
                    ..
                },
            ) if hashed == total && *output_count > 0 => Some(SessionState::HashingOutputs {
                total: Some(*output_count),
                finalized: 1,
            }),
            (
                SessionState::HashingOutputs { total, finalized },
                ProtocolCommand::Finalize {
                    output_index,
                    output_count,
                    ..
                },
            ) if *output_index == finalized
                && finalized < *output_count
                && total.map_or(true, |t| t == *output_count) =>
            {
                Some(SessionState::HashingOutputs {
                    total: Some(*output_count),
                    finalized: finalized + 1,
                })
            }

            (
                SessionState::HashingOutputs {
                    total: Some(total),
                    finalized,
                },
                ProtocolCommand::Sign { .. },
            ) if finalized == total => Some(SessionState::Signed),

            _ => None,
        };

        next.ok_or(ProtocolError::OutOfOrder {
            state: self.name(),
            command: command.kind().name(),
        })
    }
}

/// A signature produced for one input, with the approval flags the device returned while the
/// outputs were hashed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedInput {
    pub input_index: usize,
    /// DER signature followed by the sighash byte.
    pub signature: Vec<u8>,
    pub approvals: Vec<bool>,
}

pub struct Session<'a, T: Transport> {
    adapter: &'a TransportAdapter<T>,
    max_frame_size: usize,
    policy: FinalizeRejectionPolicy,
    state: SessionState,
    sent: Vec<Vec<u8>>,
    responses: Vec<Vec<u8>>,
    approvals: Vec<bool>,
}

impl<'a, T: Transport> Session<'a, T> {
    pub fn new(adapter: &'a TransportAdapter<T>, config: &Config) -> Self {
        Self {
            adapter,
            max_frame_size: config.max_frame_size,
            policy: config.finalize_rejection,
            state: SessionState::Idle,
            sent: Vec::new(),
            responses: Vec::new(),
            approvals: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every frame sent so far, before any scrambling.
    pub fn sent_frames(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Raw responses, status word included, in the order the frames were sent.
    pub fn responses(&self) -> &[Vec<u8>] {
        &self.responses
    }

    /// Approval flags collected since the last hash-start, one per finalized output.
    pub fn approvals(&self) -> &[bool] {
        &self.approvals
    }

    /// Sends every chunk of `command` and returns the payload answering its last chunk.
    pub async fn send(&mut self, command: &ProtocolCommand) -> Result<Vec<u8>> {
        let next = match self.state.advance(command) {
            Ok(next) => next,
            Err(e) => {
                log::debug!("session aborted while {}: {}", self.state.name(), e);
                self.state = SessionState::Aborted;
                return Err(e);
            }
        };
        match self.exchange_chunks(command).await {
            Ok(payload) => {
                self.accept(command, next, &payload);
                Ok(payload)
            }
            Err(e) => {
                let status = e.status_word();
                if command.kind() == CommandKind::Finalize
                    && status.is_some()
                    && self.policy == FinalizeRejectionPolicy::AttemptSign
                {
                    log::warn!(
                        "output finalization rejected with status {:#06x}, attempting to sign anyway",
                        status.unwrap_or_default()
                    );
                    self.state = next;
                    self.approvals.push(true);
                    return Ok(Vec::new());
                }
                log::debug!("session aborted while {}: {}", self.state.name(), e);
                self.state = SessionState::Aborted;
                Err(e)
            }
        }
    }

    async fn exchange_chunks(&mut self, command: &ProtocolCommand) -> Result<Vec<u8>> {
        let ins = command.kind().ins();
        let mut payload = Vec::new();
        for chunk in command.chunks() {
            let frame = APDUCommand {
                cla: CLA,
                ins,
                p1: chunk.p1,
                p2: chunk.p2,
                data: chunk.data.clone(),
            }
            .encode(self.max_frame_size)?;
            self.sent.push(frame.clone());

            let raw = self.adapter.exchange(&frame).await?;
            self.responses.push(raw.clone());

            let answer = APDUAnswer::from_answer(raw)?;
            if !answer.is_success() {
                return Err(ProtocolError::rejected(answer.retcode()));
            }
            payload = answer.into_data();
        }
        Ok(payload)
    }

    fn accept(&mut self, command: &ProtocolCommand, next: SessionState, payload: &[u8]) {
        match command {
            ProtocolCommand::HashStart { .. } => self.approvals.clear(),
            ProtocolCommand::Finalize { .. } => {
                // any non-zero first byte means the device still wants the user to confirm
                self.approvals
                    .push(payload.first().is_some_and(|flag| *flag != 0));
            }
            _ => {}
        }
        if self.state != next {
            log::debug!("session: {} -> {}", self.state.name(), next.name());
        }
        self.state = next;
    }

    /// Registers every spent output the builder knows about and collects the device's tokens.
    pub async fn register_trusted_inputs(
        &mut self,
        builder: &CommandBuilder<'_>,
    ) -> Result<TrustedInputs> {
        let mut trusted = TrustedInputs::new();
        for request in builder.trusted_input_requests() {
            let token = self.send(&request).await?;
            if token.is_empty() {
                self.state = SessionState::Aborted;
                return Err(FrameError::UnexpectedPayload("empty trusted input").into());
            }
            // the token is announced later behind a single length byte
            if u8::try_from(token.len()).is_err() {
                self.state = SessionState::Aborted;
                return Err(
                    FrameError::UnexpectedPayload("trusted input longer than 255 bytes").into(),
                );
            }
            if let ProtocolCommand::TrustedInputRequest { outpoint, .. } = request {
                log::debug!(
                    "registered trusted input {}:{}",
                    hex::encode(&outpoint[..32]),
                    u32::from_le_bytes([outpoint[32], outpoint[33], outpoint[34], outpoint[35]])
                );
                trusted.insert(outpoint, token);
            }
        }
        Ok(trusted)
    }

    /// Runs the hashing sequence for input `target` and returns its signature.
    pub async fn sign_input(
        &mut self,
        builder: &CommandBuilder<'_>,
        target: usize,
        trusted: &TrustedInputs,
    ) -> Result<SignedInput> {
        let new_transaction = self.state != SessionState::Signed;
        let commands = match builder.signing_commands(target, trusted, new_transaction) {
            Ok(commands) => commands,
            Err(e) => {
                self.state = SessionState::Aborted;
                return Err(e);
            }
        };

        let mut signature = Vec::new();
        for command in &commands {
            let payload = self.send(command).await?;
            if command.kind() == CommandKind::Sign {
                signature = payload;
            }
        }

        match normalize_signature(signature) {
            Ok(signature) => Ok(SignedInput {
                input_index: target,
                signature,
                approvals: self.approvals.clone(),
            }),
            Err(e) => {
                self.state = SessionState::Aborted;
                Err(e)
            }
        }
    }
}

/// Checks that the device answered with a DER sequence and clears the parity bit some
/// firmware sets in its first byte.
pub fn normalize_signature(mut signature: Vec<u8>) -> Result<Vec<u8>> {
    match signature.first_mut() {
        Some(tag) if *tag & SIGNATURE_PARITY_MASK == DER_SEQUENCE_TAG => {
            *tag &= SIGNATURE_PARITY_MASK;
            Ok(signature)
        }
        _ => Err(FrameError::UnexpectedPayload("signature is not DER encoded").into()),
    }
}

/// Signs input `target` of `tx`, from trusted-input registration to the signature.
pub async fn sign_input<T: Transport>(
    adapter: &TransportAdapter<T>,
    config: &Config,
    tx: &Transaction,
    inputs: &[SigningInput],
    target: usize,
) -> Result<SignedInput> {
    let builder = CommandBuilder::new(tx, inputs, config.max_frame_size)?;
    let mut session = Session::new(adapter, config);
    let trusted = session.register_trusted_inputs(&builder).await?;
    session.sign_input(&builder, target, &trusted).await
}

/// Signs every input of `tx` described by one of `inputs`, in input order, within one session.
///
/// Either every signature is returned or none is.
pub async fn sign_transaction<T: Transport>(
    adapter: &TransportAdapter<T>,
    config: &Config,
    tx: &Transaction,
    inputs: &[SigningInput],
) -> Result<Vec<SignedInput>> {
    let builder = CommandBuilder::new(tx, inputs, config.max_frame_size)?;
    let targets: Vec<usize> = (0..tx.input.len())
        .filter(|index| builder.signing_input(*index).is_some())
        .collect();
    if targets.is_empty() {
        return Err(ProtocolError::invalid_input(
            "inputs",
            "no input of the transaction can be signed",
        ));
    }

    let mut session = Session::new(adapter, config);
    let trusted = session.register_trusted_inputs(&builder).await?;
    let mut signed = Vec::with_capacity(targets.len());
    for target in targets {
        signed.push(session.sign_input(&builder, target, &trusted).await?);
    }
    Ok(signed)
}
