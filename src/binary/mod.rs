// src/binary/mod.rs
pub mod assembler;
pub mod binary_analysis;
pub mod decoder;
pub mod elf;
pub mod gadgets;
pub mod macho;
pub mod pe;
pub mod security;

pub use self::assembler::{Assembler, NasmAssembler};
pub use self::binary_analysis::{Analyzer, analyze_binary};
pub use self::gadgets::{GadgetIndex, GadgetKey};
pub use self::security::{RelRo, SecurityInfo};

use serde::Serialize;
use std::fmt;

use crate::error::{Error, Result};

/// Container format that accepted the file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Format {
    #[serde(rename = "elf")]
    Elf,
    #[serde(rename = "pe")]
    Pe,
    #[serde(rename = "macho")]
    MachO,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Elf => "ELF",
            Format::Pe => "PE",
            Format::MachO => "Mach-O",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Arch {
    #[serde(rename = "amd64")]
    Amd64,
    #[serde(rename = "i386")]
    I386,
    #[serde(rename = "arm64")]
    Arm64,
    #[serde(rename = "arm")]
    Arm32,
    #[serde(rename = "unknown")]
    Unknown,
}

impl Arch {
    pub fn name(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::I386 => "i386",
            Arch::Arm64 => "arm64",
            Arch::Arm32 => "arm",
            Arch::Unknown => "unknown",
        }
    }

    /// Register and pointer width, when the architecture is known.
    pub fn bits(&self) -> Option<u8> {
        match self {
            Arch::Amd64 | Arch::Arm64 => Some(64),
            Arch::I386 | Arch::Arm32 => Some(32),
            Arch::Unknown => None,
        }
    }

    /// Single-byte near-return opcode that terminates a ROP gadget.
    pub fn return_opcode(&self) -> Option<u8> {
        match self {
            Arch::Amd64 | Arch::I386 => Some(0xc3),
            _ => None,
        }
    }

    /// Default gadget window, in bytes. It also caps the instruction count
    /// of a gadget key.
    pub fn max_gadget_bytes(&self) -> usize {
        match self {
            Arch::Amd64 => 20,
            Arch::I386 => 12,
            _ => 0,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OperatingSystem {
    Linux,
    Windows,
    #[serde(rename = "macOS")]
    MacOs,
    Unknown,
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperatingSystem::Linux => "Linux",
            OperatingSystem::Windows => "Windows",
            OperatingSystem::MacOs => "macOS",
            OperatingSystem::Unknown => "Unknown",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub fn from_little_endian(little_endian: bool) -> Self {
        if little_endian {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ByteOrder::LittleEndian => "LittleEndian",
            ByteOrder::BigEndian => "BigEndian",
        })
    }
}

/// Virtual address inside an analyzed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Addr(pub u64);

impl Addr {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value)
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

impl fmt::LowerHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryInfo {
    pub format: Format,
    pub arch: Arch,
    pub os: OperatingSystem,
    pub compiler: String,
    pub statically_linked: bool,
    pub byte_order: ByteOrder,
    pub security: SecurityInfo,
}

impl fmt::Display for BinaryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== BINARY INFO ===")?;
        writeln!(f, "Arch: {}", self.arch)?;
        writeln!(f, "OS: {}", self.os)?;
        writeln!(f, "Compiler: {}", self.compiler)?;
        writeln!(
            f,
            "Linking: {}",
            if self.statically_linked { "static" } else { "dynamic" }
        )?;
        writeln!(f, "Byte Order: {}", self.byte_order)?;
        writeln!(f, "=== SECURITY ===")?;
        writeln!(f, "RELRO: {}", self.security.relro)?;
        writeln!(f, "Canary: {}", self.security.canary)?;
        writeln!(f, "PIE: {}", self.security.pie)?;
        writeln!(f, "NX: {}", self.security.nx)
    }
}

/// A literal-data section kept for string search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSection {
    pub name: String,
    pub address: Addr,
    pub bytes: Vec<u8>,
}

/// Read-only query surface shared by every container format.
///
/// ELF implements every operation. PE and Mach-O only provide [`Binary::info`]
/// and fall back to the default methods, which report `NotSupported` so callers
/// can branch on capability instead of on format.
pub trait Binary: Send + Sync {
    fn format(&self) -> Format;

    fn info(&self) -> &BinaryInfo;

    fn symbol_addr(&self, _name: &str) -> Result<Addr> {
        Err(Error::NotSupported {
            format: self.format(),
            operation: "symbol lookup",
        })
    }

    fn string_addr(&self, _s: &str) -> Result<Addr> {
        Err(Error::NotSupported {
            format: self.format(),
            operation: "string lookup",
        })
    }

    /// Addresses of every gadget whose instructions match `instructions`
    /// exactly, after assembling them with the configured assembler.
    fn gadget_addrs(&self, _instructions: &[&str]) -> Result<Vec<Addr>> {
        Err(Error::NotSupported {
            format: self.format(),
            operation: "gadget lookup",
        })
    }

    fn gadget_addrs_for_bytes(&self, _code: &[u8]) -> Result<Vec<Addr>> {
        Err(Error::NotSupported {
            format: self.format(),
            operation: "gadget lookup",
        })
    }

    fn gadget_index(&self) -> Result<&GadgetIndex> {
        Err(Error::NotSupported {
            format: self.format(),
            operation: "gadget listing",
        })
    }
}
