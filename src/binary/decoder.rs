use capstone::prelude::*;
use serde::Serialize;
use std::fmt;

use super::Arch;
use crate::error::{Error, Result};

/// Canonical form of one decoded instruction.
///
/// Instructions are always decoded at virtual address 0, so relative
/// operands render the same wherever the bytes occur in the image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Instruction {
    pub mnemonic: String,
    pub operands: String,
    pub len: usize,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.operands.is_empty() {
            f.write_str(&self.mnemonic)
        } else {
            write!(f, "{} {}", self.mnemonic, self.operands)
        }
    }
}

/// Decodes a single instruction from the front of a byte buffer.
pub trait InstructionDecoder {
    /// `None` when the leading bytes do not form a valid instruction.
    fn decode(&self, code: &[u8]) -> Option<Instruction>;
}

pub struct CapstoneDecoder {
    cs: Capstone,
}

impl CapstoneDecoder {
    pub fn new(arch: Arch) -> Result<Self> {
        let mode = match arch {
            Arch::Amd64 => arch::x86::ArchMode::Mode64,
            Arch::I386 => arch::x86::ArchMode::Mode32,
            _ => {
                return Err(Error::UnknownArchitecture {
                    arch,
                    operation: "gadget decoding",
                });
            }
        };

        let cs = Capstone::new()
            .x86()
            .mode(mode)
            .syntax(arch::x86::ArchSyntax::Intel)
            .detail(false)
            .build()
            .map_err(|e| Error::Decoder(format!("Failed to initialize Capstone for {}: {}", arch, e)))?;

        Ok(Self { cs })
    }
}

impl InstructionDecoder for CapstoneDecoder {
    fn decode(&self, code: &[u8]) -> Option<Instruction> {
        let insns = self.cs.disasm_count(code, 0, 1).ok()?;
        let insn = insns.iter().next()?;
        Some(Instruction {
            mnemonic: insn.mnemonic().unwrap_or_default().to_string(),
            operands: insn.op_str().unwrap_or_default().to_string(),
            len: insn.len(),
        })
    }
}

/// Decode `code` front to back into at most `limit` instructions.
///
/// x86 code is not self-synchronizing: when the bytes at the current position
/// do not decode, one leading byte is dropped and decoding retries from the
/// next position.
pub fn decode_sequence<D: InstructionDecoder + ?Sized>(
    decoder: &D,
    code: &[u8],
    limit: usize,
) -> Vec<Instruction> {
    let mut rest = code;
    let mut instructions = Vec::new();

    while !rest.is_empty() && instructions.len() < limit {
        match decoder.decode(rest) {
            Some(insn) if insn.len > 0 && insn.len <= rest.len() => {
                rest = &rest[insn.len..];
                instructions.push(insn);
            }
            _ => rest = &rest[1..],
        }
    }

    instructions
}
