use aho_corasick::AhoCorasick;
use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64};
use goblin::elf::section_header::{SHT_NOBITS, SectionHeader};
use goblin::elf::Elf;
use goblin::elf::sym::Symtab;
use goblin::strtab::Strtab;
use std::collections::HashMap;
use std::sync::Arc;

use super::assembler::Assembler;
use super::gadgets::GadgetIndex;
use super::security::scan_elf_security;
use super::{Addr, Arch, Binary, BinaryInfo, ByteOrder, DataSection, Format, OperatingSystem};
use crate::config::Config;
use crate::error::{Error, Result};

const DATA_SECTIONS: [&str; 2] = [".data", ".rodata"];

pub struct ElfBinary {
    info: BinaryInfo,
    symbols: HashMap<String, Addr>,
    data_sections: Vec<DataSection>,
    gadgets: Option<GadgetIndex>,
    assembler: Arc<dyn Assembler>,
}

impl ElfBinary {
    pub fn parse(bytes: &[u8], config: &Config, assembler: Arc<dyn Assembler>) -> Result<Self> {
        let elf = Elf::parse(bytes).map_err(|source| Error::Malformed {
            format: Format::Elf,
            source,
        })?;

        let arch = arch_from_machine(elf.header.e_machine);
        let byte_order = ByteOrder::from_little_endian(elf.little_endian);
        let dynamic = find_section(&elf, ".dynamic");
        let statically_linked = dynamic.is_none();

        tracing::debug!(
            "ELF {} ({}), {} sections, {} program headers",
            arch,
            byte_order,
            elf.section_headers.len(),
            elf.program_headers.len()
        );

        let compiler = match find_section(&elf, ".comment") {
            Some(sh) => decode_comment(section_bytes(bytes, sh, ".comment")?),
            None => String::new(),
        };

        let symbols = load_symbols(&elf, statically_linked)?;
        let data_sections = collect_data_sections(&elf, bytes)?;

        let security = scan_elf_security(
            arch,
            elf.header.e_type,
            &elf.program_headers,
            dynamic.map(|sh| section_bytes(bytes, sh, ".dynamic")),
            byte_order,
            &symbols,
        )?;

        let gadgets = if config.scan_gadgets {
            let capacity = config
                .max_gadget_bytes
                .unwrap_or_else(|| arch.max_gadget_bytes());
            Some(GadgetIndex::build(
                bytes,
                &elf.program_headers,
                arch,
                capacity,
                config.scan_threads,
            )?)
        } else {
            tracing::debug!("Gadget scan disabled by configuration");
            None
        };

        Ok(Self {
            info: BinaryInfo {
                format: Format::Elf,
                arch,
                os: OperatingSystem::Linux,
                compiler,
                statically_linked,
                byte_order,
                security,
            },
            symbols,
            data_sections,
            gadgets,
            assembler,
        })
    }
}

impl Binary for ElfBinary {
    fn format(&self) -> Format {
        Format::Elf
    }

    fn info(&self) -> &BinaryInfo {
        &self.info
    }

    fn symbol_addr(&self, name: &str) -> Result<Addr> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| Error::SymbolNotFound(name.to_string()))
    }

    fn string_addr(&self, s: &str) -> Result<Addr> {
        let mut needle = s.as_bytes().to_vec();
        needle.push(0);
        let matcher = AhoCorasick::new([&needle])?;

        for section in &self.data_sections {
            if let Some(hit) = matcher.find(&section.bytes) {
                tracing::debug!("String {:?} found in {} at +{:#x}", s, section.name, hit.start());
                return Ok(Addr(section.address.value() + hit.start() as u64));
            }
        }

        Err(Error::StringNotFound(s.to_string()))
    }

    fn gadget_addrs(&self, instructions: &[&str]) -> Result<Vec<Addr>> {
        let index = self.gadget_index()?;
        let code = self.assembler.assemble(self.info.arch, instructions)?;
        index.lookup_bytes(&code)
    }

    fn gadget_addrs_for_bytes(&self, code: &[u8]) -> Result<Vec<Addr>> {
        self.gadget_index()?.lookup_bytes(code)
    }

    fn gadget_index(&self) -> Result<&GadgetIndex> {
        self.gadgets.as_ref().ok_or(Error::GadgetIndexUnavailable)
    }
}

pub fn arch_from_machine(e_machine: u16) -> Arch {
    match e_machine {
        EM_X86_64 => Arch::Amd64,
        EM_386 => Arch::I386,
        EM_AARCH64 => Arch::Arm64,
        EM_ARM => Arch::Arm32,
        _ => Arch::Unknown,
    }
}

fn find_section<'a>(elf: &'a Elf<'_>, name: &str) -> Option<&'a SectionHeader> {
    elf.section_headers
        .iter()
        .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(name))
}

fn section_bytes<'a>(bytes: &'a [u8], sh: &SectionHeader, name: &str) -> Result<&'a [u8]> {
    if sh.sh_type == SHT_NOBITS {
        return Ok(&[]);
    }

    let start = usize::try_from(sh.sh_offset).ok();
    let end = start.and_then(|s| s.checked_add(usize::try_from(sh.sh_size).ok()?));
    start
        .zip(end)
        .and_then(|(s, e)| bytes.get(s..e))
        .ok_or_else(|| Error::MalformedSection {
            name: name.to_string(),
            reason: format!(
                "range {:#x}+{:#x} lies outside the {:#x}-byte file",
                sh.sh_offset,
                sh.sh_size,
                bytes.len()
            ),
        })
}

fn decode_comment(raw: &[u8]) -> String {
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn read_symbol_table(
    table: &'static str,
    syms: &Symtab<'_>,
    strtab: &Strtab<'_>,
) -> Result<Vec<(String, Addr)>> {
    let mut entries = Vec::with_capacity(syms.len());
    for (index, sym) in syms.iter().enumerate() {
        if sym.st_name == 0 {
            continue;
        }
        let name = strtab
            .get_at(sym.st_name)
            .ok_or(Error::MalformedSymbolTable { table, index })?;
        if !name.is_empty() {
            entries.push((name.to_string(), Addr(sym.st_value)));
        }
    }
    Ok(entries)
}

/// `.symtab` first, then `.dynsym` for dynamically linked images. Later
/// tables overwrite earlier entries with the same name.
fn load_symbols(elf: &Elf<'_>, statically_linked: bool) -> Result<HashMap<String, Addr>> {
    let mut tables = vec![(".symtab", &elf.syms, &elf.strtab)];
    if !statically_linked {
        tables.push((".dynsym", &elf.dynsyms, &elf.dynstrtab));
    }

    let mut symbols = HashMap::new();
    let mut loaded = false;
    let mut first_error = None;

    for (table, syms, strtab) in tables {
        match read_symbol_table(table, syms, strtab) {
            Ok(entries) => {
                tracing::debug!("Loaded {} named symbols from {}", entries.len(), table);
                symbols.extend(entries);
                loaded = true;
            }
            Err(e) => {
                tracing::warn!("Skipping unreadable symbol table: {}", e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if !loaded => Err(e),
        _ => Ok(symbols),
    }
}

fn collect_data_sections(elf: &Elf<'_>, bytes: &[u8]) -> Result<Vec<DataSection>> {
    let mut sections = Vec::new();
    for sh in &elf.section_headers {
        let Some(name) = elf
            .shdr_strtab
            .get_at(sh.sh_name)
            .filter(|n| DATA_SECTIONS.contains(n))
        else {
            continue;
        };
        sections.push(DataSection {
            name: name.to_string(),
            address: Addr(sh.sh_addr),
            bytes: section_bytes(bytes, sh, name)?.to_vec(),
        });
    }
    Ok(sections)
}
