use std::io;

use thiserror::Error;

/// Rejected cache geometry or an unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a non-zero power of two, got {value}")]
    NotPowerOfTwo { field: &'static str, value: usize },
    #[error("ways must be at least 1")]
    NoWays,
    #[error("{offset_bits} offset bits + {index_bits} index bits do not fit a 32-bit address")]
    AddressTooNarrow { offset_bits: u32, index_bits: u32 },
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure while reading or decoding an access trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("cannot read trace: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: unknown operation `{token}`, expected r or w")]
    UnknownOp { line: usize, token: String },
    #[error("line {line}: operation `{op}` has no address")]
    MissingAddress { line: usize, op: String },
    #[error("line {line}: malformed address `{token}`")]
    BadAddress { line: usize, token: String },
    #[error("line {line}: address `{token}` does not fit in 32 bits")]
    AddressOverflow { line: usize, token: String },
}
