/// Class byte of every command understood by the Bitcoin app.
pub const CLA: u8 = 0xE0;

/// Size of the command header: CLA, INS, P1, P2 and the single length byte.
pub const HEADER_SIZE: usize = 5;

/// Size of the status word trailing every response.
pub const STATUS_WORD_SIZE: usize = 2;

/// The length field is a single byte, so no command can carry more than this.
pub const MAX_DATA_LENGTH: usize = 255;

/// Largest frame the device accepts for a single command.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_DATA_LENGTH;

/// The Nano S cannot derive deeper than this.
pub const MAX_DERIVATION_DEPTH: usize = 10;

/// Instruction codes.
pub mod ins {
    pub const GET_WALLET_PUBLIC_KEY: u8 = 0x40;
    pub const GET_TRUSTED_INPUT: u8 = 0x42;
    pub const HASH_INPUT_START: u8 = 0x44;
    pub const HASH_SIGN: u8 = 0x48;
    pub const HASH_INPUT_FINALIZE_FULL: u8 = 0x4A;
    pub const GET_FIRMWARE_VERSION: u8 = 0xC4;
}

/// Values of the P1 parameter byte.
pub mod p1 {
    /// First frame of a multi-frame command.
    pub const FIRST: u8 = 0x00;
    /// Any frame after the first one.
    pub const NEXT: u8 = 0x80;
    /// More output data follows (output finalization only).
    pub const MORE: u8 = 0x00;
    /// Last chunk of output data (output finalization only).
    pub const LAST: u8 = 0x80;
    /// Do not display the address when fetching a public key.
    pub const NO_DISPLAY: u8 = 0x00;
    /// Display the address on the device screen when fetching a public key.
    pub const DISPLAY: u8 = 0x01;
}

/// Values of the P2 parameter byte.
pub mod p2 {
    pub const NONE: u8 = 0x00;
    /// Start hashing a new transaction.
    pub const NEW_TRANSACTION: u8 = 0x00;
    /// Keep hashing the transaction started by a previous hash-start.
    pub const CONTINUE_TRANSACTION: u8 = 0x80;
}

/// Marker bytes prefixing each input of the hash-start stream.
pub mod input_marker {
    pub const UNTRUSTED: u8 = 0x00;
    pub const TRUSTED: u8 = 0x01;
}

/// The device sets the low bit of the DER sequence tag to report the parity of R.
pub const SIGNATURE_PARITY_MASK: u8 = 0xFE;

/// ASN.1 tag opening a DER signature.
pub const DER_SEQUENCE_TAG: u8 = 0x30;
