use std::path::Path;
use std::sync::Arc;

use super::assembler::{Assembler, NasmAssembler};
use super::elf::ElfBinary;
use super::macho::MachOBinary;
use super::pe::PeBinary;
use super::{Binary, Format};
use crate::config::Config;
use crate::error::{Error, Result};

/// Analyze `path` with default settings.
pub fn analyze_binary(path: impl AsRef<Path>) -> Result<Box<dyn Binary>> {
    Analyzer::new(&Config::default()).analyze(path)
}

/// Builds [`Binary`] views with a fixed configuration and assembler.
#[derive(Clone)]
pub struct Analyzer {
    config: Config,
    assembler: Arc<dyn Assembler>,
}

impl Analyzer {
    pub fn new(config: &Config) -> Self {
        let assembler = NasmAssembler::new(config.assembler.clone(), config.assembler_timeout());
        Self {
            config: config.clone(),
            assembler: Arc::new(assembler),
        }
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn Assembler>) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn analyze(&self, path: impl AsRef<Path>) -> Result<Box<dyn Binary>> {
        let path = path.as_ref();
        let contents = std::fs::read(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::info!("Starting binary analysis for '{}' ({} bytes)", path.display(), contents.len());
        self.analyze_bytes(&contents)
    }

    pub fn analyze_bytes(&self, contents: &[u8]) -> Result<Box<dyn Binary>> {
        let format = sniff_format(contents).ok_or(Error::UnrecognizedFormat)?;
        tracing::info!("{} magic detected, using goblin {} parser", format, format);

        let binary: Box<dyn Binary> = match format {
            Format::Elf => Box::new(ElfBinary::parse(contents, &self.config, self.assembler.clone())?),
            Format::Pe => Box::new(PeBinary::parse(contents)?),
            Format::MachO => Box::new(MachOBinary::parse(contents)?),
        };

        tracing::info!("Binary analysis complete: {} {}", format, binary.info().arch);
        Ok(binary)
    }
}

/// First matching magic wins: ELF, then PE, then Mach-O.
pub fn sniff_format(contents: &[u8]) -> Option<Format> {
    match contents {
        [0x7f, b'E', b'L', b'F', ..] => Some(Format::Elf),
        [b'M', b'Z', ..] => Some(Format::Pe),
        [0xfe, 0xed, 0xfa, 0xce | 0xcf, ..]
        | [0xce | 0xcf, 0xfa, 0xed, 0xfe, ..]
        | [0xca, 0xfe, 0xba, 0xbe, ..] => Some(Format::MachO),
        _ => None,
    }
}
