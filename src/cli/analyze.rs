use anyhow::{Context, Result, anyhow};
use std::path::Path;

use crate::binary::{Analyzer, Binary};
use crate::cli::BinsightCli;

impl BinsightCli {
    /// Analyze with the resolved configuration. Commands that never touch
    /// gadgets skip the scan.
    fn open(&self, file: &Path, needs_gadgets: bool) -> Result<Box<dyn Binary>> {
        let mut config = self.resolve_config()?;
        if !needs_gadgets {
            config.scan_gadgets = false;
        }

        Analyzer::new(&config)
            .analyze(file)
            .with_context(|| format!("Failed to analyze {}", file.display()))
    }

    pub fn handle_info_command(&mut self, file: &Path, json: bool) -> Result<()> {
        let binary = self.open(file, false)?;
        if json {
            println!("{}", serde_json::to_string_pretty(binary.info())?);
        } else {
            print!("{}", binary.info());
        }
        Ok(())
    }

    pub fn handle_symbol_command(&mut self, file: &Path, name: &str) -> Result<()> {
        let binary = self.open(file, false)?;
        let addr = binary.symbol_addr(name)?;
        println!("{}: {}", name, addr);
        Ok(())
    }

    pub fn handle_string_command(&mut self, file: &Path, text: &str) -> Result<()> {
        let binary = self.open(file, false)?;
        let addr = binary.string_addr(text)?;
        println!("{:?}: {}", text, addr);
        Ok(())
    }

    pub fn handle_gadget_command(
        &mut self,
        file: &Path,
        instructions: &[String],
        raw: Option<&str>,
    ) -> Result<()> {
        let binary = self.open(file, true)?;

        let addrs = match raw {
            Some(hex_code) => {
                let code = hex::decode(hex_code.trim().replace(' ', ""))
                    .with_context(|| format!("Invalid hex machine code: {}", hex_code))?;
                binary.gadget_addrs_for_bytes(&code)?
            }
            None => {
                let lines = split_instructions(instructions);
                if lines.is_empty() {
                    return Err(anyhow!("No instructions given"));
                }
                binary.gadget_addrs(&lines)?
            }
        };

        println!("🧩 {} match(es):", addrs.len());
        for addr in addrs {
            println!("  {}", addr);
        }
        Ok(())
    }

    pub fn handle_gadgets_command(
        &mut self,
        file: &Path,
        limit: usize,
        max_insns: Option<usize>,
    ) -> Result<()> {
        let binary = self.open(file, true)?;
        let index = binary.gadget_index()?;

        let entries: Vec<_> = index
            .sorted()
            .into_iter()
            .filter(|(key, _)| max_insns.is_none_or(|max| key.len() <= max))
            .collect();

        println!(
            "📋 {} unique gadgets ({} arch, window {} bytes)",
            entries.len(),
            index.arch(),
            index.capacity()
        );
        for (key, addrs) in entries.iter().take(limit) {
            let Some(first) = addrs.first() else { continue };
            println!("  {}  {}  ({} sites)", first, key, addrs.len());
        }
        if entries.len() > limit {
            println!("  ... {} more, raise --limit to see them", entries.len() - limit);
        }
        Ok(())
    }
}

/// Accept `"pop rdi; ret"` as well as `"pop rdi" "ret"`.
fn split_instructions(args: &[String]) -> Vec<&str> {
    args.iter()
        .flat_map(|arg| arg.split(';'))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}
