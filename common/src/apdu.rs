use alloc::vec::Vec;
use core::fmt;

use crate::constants::{HEADER_SIZE, MAX_DATA_LENGTH, STATUS_WORD_SIZE};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusWord {
    /// Wrong length
    WrongLength = 0x6700,
    /// Security status not satisfied (device locked)
    SecurityStatusNotSatisfied = 0x6982,
    /// Rejected by user
    Deny = 0x6985,
    /// Incorrect Data
    IncorrectData = 0x6A80,
    /// Not Supported
    NotSupported = 0x6A82,
    /// Wrong P1P2
    WrongP1P2 = 0x6B00,
    /// Ins not supported
    InsNotSupported = 0x6D00,
    /// Cla not supported
    ClaNotSupported = 0x6E00,
    /// Technical problem on the device
    TechnicalProblem = 0x6F00,
    /// Halted by the device
    Halted = 0x6FAA,
    /// Success
    OK = 0x9000,
}

impl StatusWord {
    pub fn description(&self) -> &'static str {
        match self {
            StatusWord::WrongLength => "wrong length",
            StatusWord::SecurityStatusNotSatisfied => "device locked",
            StatusWord::Deny => "rejected by user",
            StatusWord::IncorrectData => "incorrect data",
            StatusWord::NotSupported => "not supported",
            StatusWord::WrongP1P2 => "wrong P1/P2",
            StatusWord::InsNotSupported => "instruction not supported",
            StatusWord::ClaNotSupported => "class not supported",
            StatusWord::TechnicalProblem => "technical problem",
            StatusWord::Halted => "device halted",
            StatusWord::OK => "success",
        }
    }
}

impl TryFrom<u16> for StatusWord {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x6700 => Ok(StatusWord::WrongLength),
            0x6982 => Ok(StatusWord::SecurityStatusNotSatisfied),
            0x6985 => Ok(StatusWord::Deny),
            0x6A80 => Ok(StatusWord::IncorrectData),
            0x6A82 => Ok(StatusWord::NotSupported),
            0x6B00 => Ok(StatusWord::WrongP1P2),
            0x6D00 => Ok(StatusWord::InsNotSupported),
            0x6E00 => Ok(StatusWord::ClaNotSupported),
            0x6F00 => Ok(StatusWord::TechnicalProblem),
            0x6FAA => Ok(StatusWord::Halted),
            0x9000 => Ok(StatusWord::OK),
            _ => Err(()),
        }
    }
}

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The payload does not fit in the single length byte or in the frame size limit.
    PayloadTooLong { len: usize, max: usize },
    /// The frame size limit leaves no room for any payload.
    FrameLimitTooSmall(usize),
    /// The frame is shorter than its fixed-size part.
    TooShort { len: usize, min: usize },
    /// The length byte disagrees with the number of bytes that follow it.
    LengthMismatch { declared: usize, actual: usize },
    /// A response payload does not have the layout expected for its command.
    UnexpectedPayload(&'static str),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::PayloadTooLong { len, max } => {
                write!(f, "payload of {} bytes exceeds the limit of {} bytes", len, max)
            }
            FrameError::FrameLimitTooSmall(limit) => {
                write!(f, "frame limit of {} bytes leaves no room for a payload", limit)
            }
            FrameError::TooShort { len, min } => {
                write!(f, "frame of {} bytes is shorter than the minimum of {}", len, min)
            }
            FrameError::LengthMismatch { declared, actual } => write!(
                f,
                "length byte declares {} bytes but {} follow",
                declared, actual
            ),
            FrameError::UnexpectedPayload(what) => write!(f, "unexpected payload: {}", what),
        }
    }
}

impl core::error::Error for FrameError {}

/// Largest payload a frame of `max_frame_size` bytes can carry.
pub fn max_payload(max_frame_size: usize) -> Result<usize, FrameError> {
    if max_frame_size <= HEADER_SIZE {
        return Err(FrameError::FrameLimitTooSmall(max_frame_size));
    }
    Ok(core::cmp::min(max_frame_size - HEADER_SIZE, MAX_DATA_LENGTH))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct APDUCommand {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
}

impl APDUCommand {
    /// Serializes the command as header followed by the payload.
    ///
    /// Only the short form with a single length byte is produced, so the payload must fit both
    /// in 255 bytes and in `max_frame_size` once the header is added.
    pub fn encode(&self, max_frame_size: usize) -> Result<Vec<u8>, FrameError> {
        let max = max_payload(max_frame_size)?;
        if self.data.len() > max {
            return Err(FrameError::PayloadTooLong {
                len: self.data.len(),
                max,
            });
        }
        let mut vec = Vec::with_capacity(HEADER_SIZE + self.data.len());
        vec.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2, self.data.len() as u8]);
        vec.extend_from_slice(&self.data);
        Ok(vec)
    }

    /// Parses a frame produced by [`APDUCommand::encode`].
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < HEADER_SIZE {
            return Err(FrameError::TooShort {
                len: raw.len(),
                min: HEADER_SIZE,
            });
        }
        let declared = raw[4] as usize;
        let actual = raw.len() - HEADER_SIZE;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            cla: raw[0],
            ins: raw[1],
            p1: raw[2],
            p2: raw[3],
            data: raw[HEADER_SIZE..].to_vec(),
        })
    }
}

/// A response split into its payload and trailing status word.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct APDUAnswer {
    data: Vec<u8>,
    retcode: u16,
}

impl APDUAnswer {
    pub fn from_answer(mut raw: Vec<u8>) -> Result<Self, FrameError> {
        if raw.len() < STATUS_WORD_SIZE {
            return Err(FrameError::TooShort {
                len: raw.len(),
                min: STATUS_WORD_SIZE,
            });
        }
        let sw_start = raw.len() - STATUS_WORD_SIZE;
        let retcode = u16::from_be_bytes([raw[sw_start], raw[sw_start + 1]]);
        raw.truncate(sw_start);
        Ok(Self { data: raw, retcode })
    }

    /// Builds the raw form of a response, as a device would send it.
    pub fn to_raw(data: &[u8], retcode: u16) -> Vec<u8> {
        let mut raw = Vec::with_capacity(data.len() + STATUS_WORD_SIZE);
        raw.extend_from_slice(data);
        raw.extend_from_slice(&retcode.to_be_bytes());
        raw
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn retcode(&self) -> u16 {
        self.retcode
    }

    pub fn status_word(&self) -> Option<StatusWord> {
        StatusWord::try_from(self.retcode).ok()
    }

    pub fn is_success(&self) -> bool {
        self.retcode == StatusWord::OK as u16
    }
}
