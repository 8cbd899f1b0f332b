use goblin::elf::program_header::{PF_X, PT_LOAD, ProgramHeader};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use super::decoder::{CapstoneDecoder, Instruction, InstructionDecoder, decode_sequence};
use super::{Addr, Arch};
use crate::error::{Error, Result};

/// Instruction sequence identifying a gadget, independent of where it occurs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GadgetKey {
    instructions: Vec<Instruction>,
}

impl GadgetKey {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl fmt::Display for GadgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, insn) in self.instructions.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", insn)?;
        }
        Ok(())
    }
}

/// Every return-terminated instruction sequence found in executable segments,
/// keyed by its decoded form. Address lists are ascending and unique.
#[derive(Debug, Clone)]
pub struct GadgetIndex {
    arch: Arch,
    capacity: usize,
    gadgets: HashMap<GadgetKey, Vec<Addr>>,
}

impl GadgetIndex {
    /// Index every executable `PT_LOAD` segment of an ELF image.
    ///
    /// `capacity` bounds both the byte window before each return opcode and
    /// the instruction count of a key. Architectures without a known return
    /// opcode produce an empty index.
    pub fn build(
        bytes: &[u8],
        program_headers: &[ProgramHeader],
        arch: Arch,
        capacity: usize,
        threads: Option<usize>,
    ) -> Result<Self> {
        let Some(terminator) = arch.return_opcode() else {
            tracing::debug!("No return opcode for {}, gadget index left empty", arch);
            return Ok(Self::empty(arch, capacity));
        };

        // Fail early if the decoder cannot be built at all.
        CapstoneDecoder::new(arch)?;

        let segments = executable_segments(bytes, program_headers)?;

        let scan = || -> Result<HashMap<GadgetKey, Vec<Addr>>> {
            let mut gadgets: HashMap<GadgetKey, Vec<Addr>> = HashMap::new();
            for (base, code) in &segments {
                let found = index_code(code, *base, terminator, capacity, || {
                    CapstoneDecoder::new(arch).ok()
                })?;
                merge_into(&mut gadgets, found);
            }
            Ok(gadgets)
        };

        let mut gadgets = match threads {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()?
                .install(scan)?,
            None => scan()?,
        };

        for addrs in gadgets.values_mut() {
            addrs.sort_unstable();
            addrs.dedup();
        }

        tracing::info!(
            "Indexed {} unique gadgets across {} executable segments",
            gadgets.len(),
            segments.len()
        );

        Ok(Self {
            arch,
            capacity,
            gadgets,
        })
    }

    pub fn empty(arch: Arch, capacity: usize) -> Self {
        Self {
            arch,
            capacity,
            gadgets: HashMap::new(),
        }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }

    pub fn get(&self, key: &GadgetKey) -> Option<&[Addr]> {
        self.gadgets.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GadgetKey, &[Addr])> {
        self.gadgets.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Entries ordered by lowest address, for stable listings.
    pub fn sorted(&self) -> Vec<(&GadgetKey, &[Addr])> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.1.first().cmp(&b.1.first()).then_with(|| a.0.cmp(b.0)));
        entries
    }

    /// Decode `code` the same way the scanner does and return the matching
    /// addresses.
    pub fn lookup_bytes(&self, code: &[u8]) -> Result<Vec<Addr>> {
        let decoder = CapstoneDecoder::new(self.arch)?;
        let key = GadgetKey::new(decode_sequence(&decoder, code, self.capacity));
        if key.is_empty() {
            return Err(Error::GadgetNotFound(hex::encode(code)));
        }

        self.get(&key)
            .map(<[Addr]>::to_vec)
            .ok_or_else(|| Error::GadgetNotFound(key.to_string()))
    }
}

fn executable_segments<'a>(
    bytes: &'a [u8],
    program_headers: &[ProgramHeader],
) -> Result<Vec<(u64, &'a [u8])>> {
    program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD && ph.p_flags & PF_X != 0)
        .map(|ph| {
            let start = usize::try_from(ph.p_offset).ok();
            let end = start.and_then(|s| s.checked_add(usize::try_from(ph.p_filesz).ok()?));
            let code = start
                .zip(end)
                .and_then(|(s, e)| bytes.get(s..e))
                .ok_or_else(|| Error::MalformedSection {
                    name: format!("PT_LOAD@{:#x}", ph.p_vaddr),
                    reason: format!(
                        "file range {:#x}+{:#x} exceeds image size {:#x}",
                        ph.p_offset,
                        ph.p_filesz,
                        bytes.len()
                    ),
                })?;
            // Every window start must stay addressable.
            if ph.p_vaddr.checked_add(ph.p_filesz).is_none() {
                return Err(Error::MalformedSection {
                    name: format!("PT_LOAD@{:#x}", ph.p_vaddr),
                    reason: format!("size {:#x} overflows the address space", ph.p_filesz),
                });
            }
            Ok((ph.p_vaddr, code))
        })
        .collect()
}

/// Window of up to `capacity` bytes ending with (and including) the
/// terminator at `end`, widened one byte at a time.
fn windows_at(code: &[u8], end: usize, capacity: usize) -> impl Iterator<Item = (usize, &[u8])> {
    (0..capacity.min(end + 1)).map(move |back| {
        let start = end - back;
        (start, &code[start..=end])
    })
}

fn merge_into(into: &mut HashMap<GadgetKey, Vec<Addr>>, from: HashMap<GadgetKey, Vec<Addr>>) {
    for (key, mut addrs) in from {
        into.entry(key).or_default().append(&mut addrs);
    }
}

/// Scan one code buffer mapped at `base`. Each rayon worker builds its own
/// decoder through `make_decoder`.
pub(crate) fn index_code<D, F>(
    code: &[u8],
    base: u64,
    terminator: u8,
    capacity: usize,
    make_decoder: F,
) -> Result<HashMap<GadgetKey, Vec<Addr>>>
where
    D: InstructionDecoder,
    F: Fn() -> Option<D> + Sync + Send,
{
    let returns: Vec<usize> = code
        .iter()
        .enumerate()
        .filter_map(|(i, &b)| (b == terminator).then_some(i))
        .collect();

    returns
        .par_iter()
        .map_init(make_decoder, |decoder, &end| -> Result<Vec<(GadgetKey, Addr)>> {
            let decoder = decoder
                .as_ref()
                .ok_or_else(|| Error::Decoder("worker could not build a decoder".to_string()))?;
            Ok(windows_at(code, end, capacity)
                .filter_map(|(start, window)| {
                    let key = GadgetKey::new(decode_sequence(decoder, window, capacity));
                    (!key.is_empty()).then(|| (key, Addr(base + start as u64)))
                })
                .collect::<Vec<_>>())
        })
        .try_fold(HashMap::new, |mut acc: HashMap<GadgetKey, Vec<Addr>>, found| -> Result<_> {
            for (key, addr) in found? {
                acc.entry(key).or_default().push(addr);
            }
            Ok(acc)
        })
        .try_reduce(HashMap::new, |mut a, b| {
            merge_into(&mut a, b);
            Ok(a)
        })
}
