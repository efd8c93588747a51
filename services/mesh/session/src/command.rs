//! Operator command line parsing.
//!
//! ```text
//! [model] <element_index> <model_id> <opcode> [args...]
//! ```

use crate::error::SessionError;
use mesh_registry::parse_int;
use mesh_wire::Opcode;

/// Optional verb in front of a model command
pub const MODEL_VERB: &str = "model";

/// Minimum number of tokens after the verb
pub const MIN_TOKENS: usize = 4;

/// Usage shown for malformed command lines
pub const USAGE: &str = "model element_index model_id opcode dst_addr key_index [data]";

/// Parsed operator command targeting one model handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCommand {
    /// Target element index; range is checked against the registry
    pub element_index: u64,
    /// Target model id (standard or vendor)
    pub model_id: u16,
    /// Handler opcode
    pub opcode: Opcode,
    /// Remaining tokens handed to the handler
    pub args: Vec<String>,
}

impl ModelCommand {
    /// Parse a whitespace separated command line
    pub fn parse(line: &str) -> Result<Self, SessionError> {
        let mut tokens: Vec<&str> = line.split_whitespace().collect();

        match tokens.first() {
            Some(&MODEL_VERB) => {
                tokens.remove(0);
            }
            Some(verb) if parse_int(verb).is_none() => {
                return Err(SessionError::InvalidArgument(format!(
                    "unknown command {:?}, expected: {}",
                    verb, USAGE
                )));
            }
            _ => {}
        }

        if tokens.len() < MIN_TOKENS {
            return Err(SessionError::InvalidArgument(format!(
                "not enough arguments ({} of {}), expected: {}",
                tokens.len(),
                MIN_TOKENS,
                USAGE
            )));
        }

        let element_index = tokens[0].parse::<u64>().map_err(|_| {
            SessionError::InvalidArgument(format!("bad element index {:?}", tokens[0]))
        })?;

        let model_id = parse_int(tokens[1])
            .and_then(|v| u16::try_from(v).ok())
            .ok_or_else(|| SessionError::InvalidArgument(format!("bad model id {:?}", tokens[1])))?;

        let opcode = parse_int(tokens[2])
            .and_then(|v| u32::try_from(v).ok())
            .and_then(|v| Opcode::try_from(v).ok())
            .ok_or_else(|| SessionError::InvalidArgument(format!("bad opcode {:?}", tokens[2])))?;

        Ok(Self {
            element_index,
            model_id,
            opcode,
            args: tokens[3..].iter().map(|t| t.to_string()).collect(),
        })
    }
}
