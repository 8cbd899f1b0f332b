use goblin::pe::PE;
use goblin::pe::dll_characteristic::{
    IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE, IMAGE_DLLCHARACTERISTICS_NX_COMPAT,
};
use goblin::pe::header::{
    COFF_MACHINE_ARM, COFF_MACHINE_ARM64, COFF_MACHINE_ARMNT, COFF_MACHINE_X86,
    COFF_MACHINE_X86_64,
};

use super::security::{RelRo, SecurityInfo};
use super::{Arch, Binary, BinaryInfo, ByteOrder, Format, OperatingSystem};
use crate::error::{Error, Result};

/// Header-level view of a PE image. Only [`Binary::info`] is answered.
pub struct PeBinary {
    info: BinaryInfo,
}

impl PeBinary {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let pe = PE::parse(bytes).map_err(|source| Error::Malformed {
            format: Format::Pe,
            source,
        })?;

        let dll_characteristics = pe
            .header
            .optional_header
            .map_or(0, |oh| oh.windows_fields.dll_characteristics);

        let arch = match pe.header.coff_header.machine {
            COFF_MACHINE_X86_64 => Arch::Amd64,
            COFF_MACHINE_X86 => Arch::I386,
            COFF_MACHINE_ARM64 => Arch::Arm64,
            COFF_MACHINE_ARM | COFF_MACHINE_ARMNT => Arch::Arm32,
            _ => Arch::Unknown,
        };

        tracing::debug!("PE {} with {} imports", arch, pe.imports.len());

        Ok(Self {
            info: BinaryInfo {
                format: Format::Pe,
                arch,
                os: OperatingSystem::Windows,
                compiler: String::new(),
                statically_linked: pe.imports.is_empty(),
                byte_order: ByteOrder::LittleEndian,
                security: SecurityInfo {
                    relro: RelRo::Unknown,
                    canary: false,
                    pie: dll_characteristics & IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE != 0,
                    nx: dll_characteristics & IMAGE_DLLCHARACTERISTICS_NX_COMPAT != 0,
                },
            },
        })
    }
}

impl Binary for PeBinary {
    fn format(&self) -> Format {
        Format::Pe
    }

    fn info(&self) -> &BinaryInfo {
        &self.info
    }
}
