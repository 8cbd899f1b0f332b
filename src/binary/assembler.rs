use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use which::which;

use super::Arch;
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Turns assembly text into machine code for a target architecture.
pub trait Assembler: Send + Sync {
    fn assemble(&self, arch: Arch, instructions: &[&str]) -> Result<Vec<u8>>;
}

/// Runs an external `nasm` in flat-binary mode.
#[derive(Debug, Clone)]
pub struct NasmAssembler {
    program: String,
    timeout: Duration,
}

impl NasmAssembler {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn source_for(arch: Arch, instructions: &[&str]) -> Result<String> {
        let bits = match arch {
            Arch::Amd64 => 64,
            Arch::I386 => 32,
            _ => {
                return Err(Error::UnknownArchitecture {
                    arch,
                    operation: "assembly",
                });
            }
        };

        let mut source = format!("BITS {}\n", bits);
        for insn in instructions {
            source.push_str(insn.trim());
            source.push('\n');
        }
        Ok(source)
    }

    fn run(&self, binary: &Path, dir: &Path) -> Result<()> {
        let input = dir.join("gadget.asm");
        let output = dir.join("gadget.bin");

        let mut child = Command::new(binary)
            .arg("-f")
            .arg("bin")
            .arg(&input)
            .arg("-o")
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| Error::Io {
                path: binary.to_path_buf(),
                source,
            })?;

        // Stderr is drained while the child runs; a full pipe would block it.
        let stderr_pipe = child.stderr.take();
        let drain = thread::spawn(move || {
            let mut captured = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut captured);
            }
            captured
        });

        let started = Instant::now();
        let status = loop {
            let polled = child.try_wait().map_err(|source| Error::Io {
                path: binary.to_path_buf(),
                source,
            })?;
            if let Some(status) = polled {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!("{} exceeded {:?}, killed", self.program, self.timeout);
                return Err(Error::AssemblerTimeout {
                    program: self.program.clone(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let captured = drain.join().unwrap_or_default();
            return Err(Error::AssemblerFailed {
                program: self.program.clone(),
                stderr: String::from_utf8_lossy(&captured).trim().to_string(),
            });
        }

        Ok(())
    }
}

impl Default for NasmAssembler {
    fn default() -> Self {
        Self::new("nasm", Duration::from_secs(10))
    }
}

impl Assembler for NasmAssembler {
    fn assemble(&self, arch: Arch, instructions: &[&str]) -> Result<Vec<u8>> {
        let source = Self::source_for(arch, instructions)?;

        let binary: PathBuf = which(&self.program).map_err(|_| Error::AssemblerUnavailable {
            program: self.program.clone(),
        })?;

        let dir = tempfile::tempdir().map_err(|source| Error::Io {
            path: std::env::temp_dir(),
            source,
        })?;
        let input = dir.path().join("gadget.asm");
        fs::write(&input, source).map_err(|source| Error::Io {
            path: input.clone(),
            source,
        })?;

        tracing::debug!("Assembling {} instructions with {}", instructions.len(), binary.display());
        self.run(&binary, dir.path())?;

        let output = dir.path().join("gadget.bin");
        fs::read(&output).map_err(|source| Error::Io {
            path: output,
            source,
        })
    }
}
