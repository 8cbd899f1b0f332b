use goblin::mach::constants::cputype::{
    CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64, CpuType,
};
use goblin::mach::header::{MH_ALLOW_STACK_EXECUTION, MH_PIE};
use goblin::mach::{Mach, MachO, SingleArch};

use super::security::{RelRo, SecurityInfo};
use super::{Arch, Binary, BinaryInfo, ByteOrder, Format, OperatingSystem};
use crate::error::{Error, Result};

/// Mach-O symbol names carry the C underscore prefix.
const STACK_CHK_FAIL: &str = "___stack_chk_fail";

/// Header-level view of a Mach-O image. Only [`Binary::info`] is answered.
pub struct MachOBinary {
    info: BinaryInfo,
}

impl MachOBinary {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let malformed = |source| Error::Malformed {
            format: Format::MachO,
            source,
        };

        let info = match Mach::parse(bytes).map_err(malformed)? {
            Mach::Binary(macho) => describe(&macho),
            Mach::Fat(fat) => {
                let mut first_error = None;
                let mut described = None;
                for i in 0..fat.narches {
                    match fat.get(i) {
                        Ok(SingleArch::MachO(macho)) => {
                            described = Some(describe(&macho));
                            break;
                        }
                        Ok(SingleArch::Archive(_)) => {
                            tracing::debug!("Skipping archive slice {} of fat Mach-O", i);
                        }
                        Err(e) => {
                            tracing::debug!("Slice {} of fat Mach-O did not parse: {}", i, e);
                            first_error.get_or_insert(e);
                        }
                    }
                }
                match (described, first_error) {
                    (Some(info), _) => info,
                    (None, Some(e)) => return Err(malformed(e)),
                    (None, None) => {
                        return Err(malformed(goblin::error::Error::Malformed(
                            "fat Mach-O has no Mach-O slice".to_string(),
                        )));
                    }
                }
            }
        };

        Ok(Self { info })
    }
}

fn arch_from_cputype(cputype: CpuType) -> Arch {
    match cputype {
        CPU_TYPE_X86_64 => Arch::Amd64,
        CPU_TYPE_X86 => Arch::I386,
        CPU_TYPE_ARM64 => Arch::Arm64,
        CPU_TYPE_ARM => Arch::Arm32,
        _ => Arch::Unknown,
    }
}

fn describe(macho: &MachO<'_>) -> BinaryInfo {
    let arch = arch_from_cputype(macho.header.cputype());
    let flags = macho.header.flags;

    // goblin lists the image itself as "self" ahead of real dylibs.
    let statically_linked = macho.libs.iter().all(|lib| *lib == "self");

    let canary = macho.symbols.as_ref().is_some_and(|symbols| {
        symbols
            .iter()
            .any(|symbol| matches!(symbol, Ok((name, _)) if name == STACK_CHK_FAIL))
    });

    tracing::debug!("Mach-O {} with {} load commands", arch, macho.load_commands.len());

    BinaryInfo {
        format: Format::MachO,
        arch,
        os: OperatingSystem::MacOs,
        compiler: String::new(),
        statically_linked,
        byte_order: ByteOrder::from_little_endian(macho.little_endian),
        security: SecurityInfo {
            relro: RelRo::Unknown,
            canary,
            pie: flags & MH_PIE != 0,
            nx: flags & MH_ALLOW_STACK_EXECUTION == 0,
        },
    }
}

impl Binary for MachOBinary {
    fn format(&self) -> Format {
        Format::MachO
    }

    fn info(&self) -> &BinaryInfo {
        &self.info
    }
}
