use goblin::elf::dynamic::{DF_1_NOW, DF_BIND_NOW, DT_FLAGS, DT_FLAGS_1};
use goblin::elf::header::ET_DYN;
use goblin::elf::program_header::{PF_X, PT_GNU_RELRO, PT_GNU_STACK, ProgramHeader};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::{Addr, Arch, ByteOrder};
use crate::error::{Error, Result};

/// Symbol the compiler calls when a stack guard check fails.
pub const STACK_CHK_FAIL: &str = "__stack_chk_fail";

/// Relocation read-only level. Three tiers, not a boolean: disabled,
/// relocations read-only, and relocations read-only with eager binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelRo {
    #[serde(rename = "full")]
    Enable,
    Partial,
    Disable,
    Unknown,
}

impl fmt::Display for RelRo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelRo::Enable => "full",
            RelRo::Partial => "partial",
            RelRo::Disable => "disable",
            RelRo::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityInfo {
    pub relro: RelRo,
    pub canary: bool,
    pub pie: bool,
    pub nx: bool,
}

impl SecurityInfo {
    /// Baseline for formats whose mitigations are only partially inferred.
    pub fn unknown() -> Self {
        Self {
            relro: RelRo::Unknown,
            canary: false,
            pie: false,
            nx: false,
        }
    }
}

/// Derive ELF mitigations from program headers, the `.dynamic` bytes and
/// the already-loaded symbol table.
pub(crate) fn scan_elf_security(
    arch: Arch,
    e_type: u16,
    program_headers: &[ProgramHeader],
    dynamic: Option<Result<&[u8]>>,
    order: ByteOrder,
    symbols: &HashMap<String, Addr>,
) -> Result<SecurityInfo> {
    let relro = scan_relro(arch, program_headers, dynamic, order)?;
    let security = SecurityInfo {
        relro,
        canary: symbols.contains_key(STACK_CHK_FAIL),
        pie: e_type == ET_DYN,
        nx: is_nx_enabled(program_headers),
    };

    tracing::debug!(
        "Security scan: relro={}, canary={}, pie={}, nx={}",
        security.relro,
        security.canary,
        security.pie,
        security.nx
    );

    Ok(security)
}

/// The stack is non-executable unless a `PT_GNU_STACK` header asks for `PF_X`.
pub fn is_nx_enabled(program_headers: &[ProgramHeader]) -> bool {
    !program_headers
        .iter()
        .any(|ph| ph.p_type == PT_GNU_STACK && ph.p_flags & PF_X != 0)
}

/// `dynamic` is `None` when the image has no `.dynamic` section, and an error
/// when the section exists but its bytes could not be read.
pub fn scan_relro(
    arch: Arch,
    program_headers: &[ProgramHeader],
    dynamic: Option<Result<&[u8]>>,
    order: ByteOrder,
) -> Result<RelRo> {
    if !program_headers.iter().any(|ph| ph.p_type == PT_GNU_RELRO) {
        return Ok(RelRo::Disable);
    }

    let Some(dynamic) = dynamic else {
        return Ok(RelRo::Partial);
    };

    let bits = arch.bits().ok_or(Error::UnknownArchitecture {
        arch,
        operation: "RELRO dynamic-table scan",
    })?;

    match dynamic.and_then(|table| find_bind_now(table, bits, order)) {
        Ok(true) => Ok(RelRo::Enable),
        Ok(false) => Ok(RelRo::Partial),
        Err(e) => {
            tracing::warn!("Could not stream .dynamic entries: {}", e);
            Ok(RelRo::Unknown)
        }
    }
}

/// Stream `(tag, value)` pairs of a dynamic table laid out for a `bits`-wide
/// target and report whether any of them requests eager binding.
///
/// A trailing partial entry is a read error. Entries are not cut short at
/// `DT_NULL`; every whole entry is inspected.
pub fn find_bind_now(dynamic: &[u8], bits: u8, order: ByteOrder) -> Result<bool> {
    let word = usize::from(bits / 8);
    let entry_size = word * 2;

    let mut entries = dynamic.chunks_exact(entry_size);
    for entry in entries.by_ref() {
        let tag = read_word(&entry[..word], order);
        let value = read_word(&entry[word..], order);

        if tag == DT_FLAGS && value & DF_BIND_NOW != 0 {
            return Ok(true);
        }
        if tag == DT_FLAGS_1 && value & DF_1_NOW != 0 {
            return Ok(true);
        }
    }

    let trailing = entries.remainder().len();
    if trailing != 0 {
        return Err(Error::MalformedDynamicTable {
            reason: format!(
                "{} trailing bytes do not form a {}-byte entry",
                trailing, entry_size
            ),
        });
    }

    Ok(false)
}

fn read_word(bytes: &[u8], order: ByteOrder) -> u64 {
    match (bytes.len(), order) {
        (4, ByteOrder::LittleEndian) => {
            u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        (4, ByteOrder::BigEndian) => {
            u64::from(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        }
        (_, ByteOrder::LittleEndian) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            u64::from_le_bytes(buf)
        }
        (_, ByteOrder::BigEndian) => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[..8]);
            u64::from_be_bytes(buf)
        }
    }
}
