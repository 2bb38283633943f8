//! Wire-level definitions shared by every component talking to the Bitcoin app of a Ledger
//! device: the command/response frame codec, status words, instruction constants and the
//! payload chunker.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod apdu;
pub mod comm;
pub mod constants;
