use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected {expected} register words, got {actual}")]
    WordCount { expected: usize, actual: usize },
}

/// Layout of a value stored in one or more 16-bit holding registers.
///
/// 32-bit layouts use standard Modbus word order: the high word sits in the
/// lower register address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterType {
    I16,
    U16,
    I32,
    U32,
}

impl RegisterType {
    /// Number of 16-bit registers the value occupies.
    pub fn width(self) -> u16 {
        match self {
            RegisterType::I16 | RegisterType::U16 => 1,
            RegisterType::I32 | RegisterType::U32 => 2,
        }
    }
}

pub fn decode(words: &[u16], data_type: RegisterType) -> Result<i64, DecodeError> {
    let expected = data_type.width() as usize;
    if words.len() != expected {
        return Err(DecodeError::WordCount {
            expected,
            actual: words.len(),
        });
    }

    let value = match data_type {
        RegisterType::I16 => words[0] as i16 as i64,
        RegisterType::U16 => words[0] as i64,
        RegisterType::I32 => combine(words[0], words[1]) as i32 as i64,
        RegisterType::U32 => combine(words[0], words[1]) as i64,
    };
    Ok(value)
}

fn combine(high: u16, low: u16) -> u32 {
    ((high as u32) << 16) | low as u32
}
