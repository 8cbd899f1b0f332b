// Shared ELF image builder for integration tests.
#![allow(dead_code)]

pub const ET_EXEC: u16 = 2;
pub const ET_DYN: u16 = 3;

pub const EM_386: u16 = 3;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_GNU_STACK: u32 = 0x6474_e551;
pub const PT_GNU_RELRO: u32 = 0x6474_e552;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_DYNSYM: u32 = 11;

pub const DT_NULL: u64 = 0;
pub const DT_HASH: u64 = 4;
pub const DT_STRTAB: u64 = 5;
pub const DT_SYMTAB: u64 = 6;
pub const DT_STRSZ: u64 = 10;
pub const DT_SYMENT: u64 = 11;
pub const DT_DEBUG: u64 = 21;
pub const DT_FLAGS: u64 = 30;
pub const DT_FLAGS_1: u64 = 0x6fff_fffb;
pub const DF_BIND_NOW: u64 = 0x8;
pub const DF_1_NOW: u64 = 0x1;

struct Section {
    name: String,
    sh_type: u32,
    addr: u64,
    data: Vec<u8>,
}

#[derive(Clone)]
struct Segment {
    p_type: u32,
    p_flags: u32,
    section: Option<String>,
    // Maps the whole file at vaddr 0.
    whole_file: bool,
}

// (st_name override, name, value)
type SymbolEntry = (Option<u32>, String, u64);

/// Little-endian ELF32/ELF64 image with section headers, a `.symtab`, and
/// program headers that point at named sections.
///
/// Adding a dynamic symbol also emits `.dynsym`, `.dynstr` and `.hash`, a
/// `PT_DYNAMIC` over `.dynamic` and a read-only `PT_LOAD` mapping the file at
/// vaddr 0, which is how goblin finds the dynamic symbol table.
pub struct ElfBuilder {
    is_64: bool,
    machine: u16,
    e_type: u16,
    sections: Vec<Section>,
    segments: Vec<Segment>,
    symbols: Vec<SymbolEntry>,
    dynsyms: Vec<SymbolEntry>,
}

impl ElfBuilder {
    fn new(is_64: bool, machine: u16) -> Self {
        Self {
            is_64,
            machine,
            e_type: ET_EXEC,
            sections: Vec::new(),
            segments: Vec::new(),
            symbols: Vec::new(),
            dynsyms: Vec::new(),
        }
    }

    pub fn amd64() -> Self {
        Self::new(true, EM_X86_64)
    }

    pub fn i386() -> Self {
        Self::new(false, EM_386)
    }

    pub fn aarch64() -> Self {
        Self::new(true, EM_AARCH64)
    }

    pub fn e_type(mut self, e_type: u16) -> Self {
        self.e_type = e_type;
        self
    }

    pub fn section(mut self, name: &str, sh_type: u32, addr: u64, data: &[u8]) -> Self {
        self.sections.push(Section {
            name: name.to_string(),
            sh_type,
            addr,
            data: data.to_vec(),
        });
        self
    }

    pub fn segment(mut self, p_type: u32, p_flags: u32, section: Option<&str>) -> Self {
        self.segments.push(Segment {
            p_type,
            p_flags,
            section: section.map(str::to_string),
            whole_file: false,
        });
        self
    }

    /// `.text` plus the executable `PT_LOAD` that maps it.
    pub fn text(self, addr: u64, code: &[u8]) -> Self {
        self.section(".text", SHT_PROGBITS, addr, code)
            .segment(PT_LOAD, PF_R | PF_X, Some(".text"))
    }

    pub fn comment(self, text: &[u8]) -> Self {
        self.section(".comment", SHT_PROGBITS, 0, text)
    }

    pub fn relro(self) -> Self {
        self.segment(PT_GNU_RELRO, PF_R, None)
    }

    pub fn gnu_stack(self, executable: bool) -> Self {
        let flags = if executable { PF_R | PF_W | PF_X } else { PF_R | PF_W };
        self.segment(PT_GNU_STACK, flags, None)
    }

    /// `.dynamic` encoded with the class's native word width.
    pub fn dynamic(self, entries: &[(u64, u64)]) -> Self {
        let mut data = Vec::new();
        for &(tag, value) in entries {
            if self.is_64 {
                data.extend_from_slice(&tag.to_le_bytes());
                data.extend_from_slice(&value.to_le_bytes());
            } else {
                data.extend_from_slice(&(tag as u32).to_le_bytes());
                data.extend_from_slice(&(value as u32).to_le_bytes());
            }
        }
        self.raw_dynamic(&data)
    }

    pub fn raw_dynamic(self, data: &[u8]) -> Self {
        self.section(".dynamic", SHT_DYNAMIC, 0x403e00, data)
    }

    pub fn symbol(mut self, name: &str, value: u64) -> Self {
        self.symbols.push((None, name.to_string(), value));
        self
    }

    /// A symbol whose name offset points past the end of `.strtab`.
    pub fn symbol_with_bad_name(mut self, value: u64) -> Self {
        self.symbols.push((Some(0xffff), String::new(), value));
        self
    }

    /// A `.dynsym` entry. Makes the image dynamically linked.
    pub fn dynsym(mut self, name: &str, value: u64) -> Self {
        self.dynsyms.push((None, name.to_string(), value));
        self
    }

    /// A `.dynsym` entry whose name offset points past the end of `.dynstr`.
    pub fn dynsym_with_bad_name(mut self, value: u64) -> Self {
        self.dynsyms.push((Some(0xffff), String::new(), value));
        self
    }

    fn ehsize(&self) -> usize {
        if self.is_64 { 64 } else { 52 }
    }

    fn phentsize(&self) -> usize {
        if self.is_64 { 56 } else { 32 }
    }

    fn shentsize(&self) -> usize {
        if self.is_64 { 64 } else { 40 }
    }

    fn put_word(&self, out: &mut Vec<u8>, value: u64) {
        if self.is_64 {
            out.extend_from_slice(&value.to_le_bytes());
        } else {
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
    }

    fn word_size(&self) -> usize {
        if self.is_64 { 8 } else { 4 }
    }

    fn symtab_bytes(&self, symbols: &[SymbolEntry]) -> (Vec<u8>, Vec<u8>) {
        let mut strtab = vec![0u8];
        let mut symtab = vec![0u8; if self.is_64 { 24 } else { 16 }];

        for (override_name, name, value) in symbols {
            let st_name = match override_name {
                Some(offset) => *offset,
                None => {
                    let offset = strtab.len() as u32;
                    strtab.extend_from_slice(name.as_bytes());
                    strtab.push(0);
                    offset
                }
            };
            let st_info = 0x12u8; // STB_GLOBAL | STT_FUNC
            let st_shndx = 1u16;
            if self.is_64 {
                symtab.extend_from_slice(&st_name.to_le_bytes());
                symtab.push(st_info);
                symtab.push(0);
                symtab.extend_from_slice(&st_shndx.to_le_bytes());
                symtab.extend_from_slice(&value.to_le_bytes());
                symtab.extend_from_slice(&0u64.to_le_bytes());
            } else {
                symtab.extend_from_slice(&st_name.to_le_bytes());
                symtab.extend_from_slice(&(*value as u32).to_le_bytes());
                symtab.extend_from_slice(&0u32.to_le_bytes());
                symtab.push(st_info);
                symtab.push(0);
                symtab.extend_from_slice(&st_shndx.to_le_bytes());
            }
        }
        (symtab, strtab)
    }

    pub fn build(&self) -> Vec<u8> {
        let (symtab, strtab) = self.symtab_bytes(&self.symbols);
        let sym_entsize = if self.is_64 { 24 } else { 16 };

        // (name, type, addr, data, link, info, entsize)
        let mut all: Vec<(String, u32, u64, Vec<u8>, u32, u32, u64)> = self
            .sections
            .iter()
            .map(|s| {
                let entsize = match s.sh_type {
                    SHT_DYNAMIC if self.is_64 => 16,
                    SHT_DYNAMIC => 8,
                    _ => 0,
                };
                (s.name.clone(), s.sh_type, s.addr, s.data.clone(), 0, 0, entsize)
            })
            .collect();

        // Tags whose values are patched once every section is placed.
        let link_tags = [DT_HASH, DT_STRTAB, DT_SYMTAB, DT_STRSZ, DT_SYMENT];
        let entry_size = 2 * self.word_size();
        let mut segments = self.segments.clone();
        let mut dynamic_index = None;
        if !self.dynsyms.is_empty() {
            let prefix = vec![0u8; link_tags.len() * entry_size];
            let index = match all.iter().position(|(n, ..)| n == ".dynamic") {
                Some(i) => {
                    all[i].3.splice(0..0, prefix);
                    i
                }
                None => {
                    let mut data = prefix;
                    data.extend(std::iter::repeat_n(0u8, entry_size)); // DT_NULL
                    all.push((".dynamic".into(), SHT_DYNAMIC, 0, data, 0, 0, entry_size as u64));
                    all.len() - 1
                }
            };
            dynamic_index = Some(index);

            let (dynsym, dynstr) = self.symtab_bytes(&self.dynsyms);
            let nchain = (self.dynsyms.len() + 1) as u32;
            let mut hash = Vec::new();
            for word in [1, nchain, 0] {
                hash.extend_from_slice(&word.to_le_bytes());
            }
            hash.extend(std::iter::repeat_n(0u8, 4 * nchain as usize));

            let dynstr_index = all.len() + 2;
            all.push((".dynsym".into(), SHT_DYNSYM, 0, dynsym, dynstr_index as u32, 1, sym_entsize));
            all.push((".dynstr".into(), SHT_STRTAB, 0, dynstr, 0, 0, 0));
            all.push((".hash".into(), SHT_HASH, 0, hash, 0, 0, 4));

            segments.insert(
                0,
                Segment {
                    p_type: PT_LOAD,
                    p_flags: PF_R,
                    section: None,
                    whole_file: true,
                },
            );
            segments.push(Segment {
                p_type: PT_DYNAMIC,
                p_flags: PF_R | PF_W,
                section: Some(".dynamic".into()),
                whole_file: false,
            });
        }

        let strtab_index = all.len() + 2;
        let shstrtab_index = all.len() + 3;
        all.push((".symtab".into(), SHT_SYMTAB, 0, symtab, strtab_index as u32, 1, sym_entsize));
        all.push((".strtab".into(), SHT_STRTAB, 0, strtab, 0, 0, 0));

        let mut shstrtab = vec![0u8];
        let mut name_offsets = Vec::new();
        for (name, ..) in &all {
            name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(name.as_bytes());
            shstrtab.push(0);
        }
        name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(b".shstrtab\0");
        all.push((".shstrtab".into(), SHT_STRTAB, 0, shstrtab, 0, 0, 0));

        let phoff = self.ehsize();
        let mut out = vec![0u8; phoff + segments.len() * self.phentsize()];

        let mut placed = Vec::new();
        for (_, _, _, data, ..) in &all {
            while out.len() % 16 != 0 {
                out.push(0);
            }
            placed.push(out.len() as u64);
            out.extend_from_slice(data);
        }

        if let Some(index) = dynamic_index {
            // The whole-file PT_LOAD maps vaddr == file offset.
            for name in [".dynsym", ".dynstr", ".hash"] {
                if let Some(i) = all.iter().position(|(n, ..)| n == name) {
                    all[i].2 = placed[i];
                }
            }
            if all[index].2 == 0 {
                all[index].2 = placed[index];
            }
            let find = |name: &str| all.iter().position(|(n, ..)| n == name).map(|i| placed[i]);
            let values = [
                find(".hash").unwrap_or(0),
                find(".dynstr").unwrap_or(0),
                find(".dynsym").unwrap_or(0),
                all.iter().find(|(n, ..)| n == ".dynstr").map_or(0, |s| s.3.len() as u64),
                sym_entsize,
            ];
            let mut prefix = Vec::new();
            for (tag, value) in link_tags.into_iter().zip(values) {
                self.put_word(&mut prefix, tag);
                self.put_word(&mut prefix, value);
            }
            let at = placed[index] as usize;
            out[at..at + prefix.len()].copy_from_slice(&prefix);
        }

        while out.len() % 8 != 0 {
            out.push(0);
        }
        let shoff = out.len() as u64;

        out.extend(std::iter::repeat_n(0u8, self.shentsize()));
        for (i, (_, sh_type, addr, data, link, info, entsize)) in all.iter().enumerate() {
            let mut sh = Vec::new();
            sh.extend_from_slice(&name_offsets[i].to_le_bytes());
            sh.extend_from_slice(&sh_type.to_le_bytes());
            self.put_word(&mut sh, 0); // sh_flags
            self.put_word(&mut sh, *addr);
            self.put_word(&mut sh, placed[i]);
            self.put_word(&mut sh, data.len() as u64);
            sh.extend_from_slice(&link.to_le_bytes());
            sh.extend_from_slice(&info.to_le_bytes());
            self.put_word(&mut sh, 1); // sh_addralign
            self.put_word(&mut sh, *entsize);
            out.extend_from_slice(&sh);
        }

        let mut phdrs = Vec::new();
        let file_len = out.len() as u64;
        for seg in &segments {
            let (offset, vaddr, size) = match &seg.section {
                _ if seg.whole_file => (0, 0, file_len),
                Some(name) => {
                    let i = all
                        .iter()
                        .position(|(n, ..)| n == name)
                        .expect("segment refers to an unknown section");
                    (placed[i], all[i].2, all[i].3.len() as u64)
                }
                None => (0, 0, 0),
            };
            if self.is_64 {
                phdrs.extend_from_slice(&seg.p_type.to_le_bytes());
                phdrs.extend_from_slice(&seg.p_flags.to_le_bytes());
                phdrs.extend_from_slice(&offset.to_le_bytes());
                phdrs.extend_from_slice(&vaddr.to_le_bytes());
                phdrs.extend_from_slice(&vaddr.to_le_bytes());
                phdrs.extend_from_slice(&size.to_le_bytes());
                phdrs.extend_from_slice(&size.to_le_bytes());
                phdrs.extend_from_slice(&0x10u64.to_le_bytes());
            } else {
                phdrs.extend_from_slice(&seg.p_type.to_le_bytes());
                for word in [offset, vaddr, vaddr, size, size] {
                    phdrs.extend_from_slice(&(word as u32).to_le_bytes());
                }
                phdrs.extend_from_slice(&seg.p_flags.to_le_bytes());
                phdrs.extend_from_slice(&0x10u32.to_le_bytes());
            }
        }
        out[phoff..phoff + phdrs.len()].copy_from_slice(&phdrs);

        let mut header = Vec::new();
        header.extend_from_slice(b"\x7fELF");
        header.push(if self.is_64 { 2 } else { 1 }); // EI_CLASS
        header.push(1); // EI_DATA little-endian
        header.push(1); // EI_VERSION
        header.extend_from_slice(&[0u8; 9]);
        header.extend_from_slice(&self.e_type.to_le_bytes());
        header.extend_from_slice(&self.machine.to_le_bytes());
        header.extend_from_slice(&1u32.to_le_bytes());
        self.put_word(&mut header, 0); // e_entry
        self.put_word(&mut header, if segments.is_empty() { 0 } else { phoff as u64 });
        self.put_word(&mut header, shoff);
        header.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        header.extend_from_slice(&(self.ehsize() as u16).to_le_bytes());
        header.extend_from_slice(&(self.phentsize() as u16).to_le_bytes());
        header.extend_from_slice(&(segments.len() as u16).to_le_bytes());
        header.extend_from_slice(&(self.shentsize() as u16).to_le_bytes());
        header.extend_from_slice(&((all.len() + 1) as u16).to_le_bytes());
        header.extend_from_slice(&(shstrtab_index as u16).to_le_bytes());
        debug_assert_eq!(header.len(), self.ehsize());
        out[..header.len()].copy_from_slice(&header);

        out
    }
}
