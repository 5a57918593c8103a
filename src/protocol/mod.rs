//! Protocol definitions for jetbeep communication.
//!
//! This module contains the line-oriented protocol layer:
//! - Line encoding/decoding
//! - Command and event verbs, parameters and argument layouts
//! - Token parsing for events and acknowledgements
//! - The protocol engine correlating commands with their acknowledgements

pub mod command;
pub mod engine;
pub mod line;
pub mod parser;

pub use command::{
    BeginPrivateMode, DeviceParameter, Interface, Verb, encode_metadata, encode_payment_args,
};
pub use engine::{Ack, ProtocolEngine};
pub use line::{LINE_END, LineDecoder, MAX_LINE_SIZE, encode as encode_line};
pub use parser::{
    parse_barcodes, parse_device_id, parse_device_state, parse_event, parse_metadata,
    parse_payment_args, parse_payment_error, tokenize,
};
