//! MAVLink message model, ingress conversion and decoding

pub mod ingress;
pub mod modes;
pub mod parser;
mod types;

pub use ingress::{parse_line, parse_record};
pub use parser::decode_batch;
pub use types::*;
