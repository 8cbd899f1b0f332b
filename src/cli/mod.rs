use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

mod analyze;
mod config;

pub use config::{ConfigCommands, ConfigStore};

use crate::config::Config;

#[derive(Subcommand)]
pub enum Commands {
    /// Print the format, linkage and mitigation report
    Info {
        file: PathBuf,
        /// Emit JSON instead of the text report
        #[arg(long)]
        json: bool,
    },
    /// Resolve a symbol to its address
    Symbol { file: PathBuf, name: String },
    /// Find a NUL-terminated string in .data or .rodata
    #[command(name = "string")]
    FindString { file: PathBuf, text: String },
    /// Find addresses of a gadget, given as assembly or raw bytes
    Gadget {
        file: PathBuf,
        /// Instructions, one per argument or separated by ';'
        #[arg(required_unless_present = "raw", conflicts_with = "raw")]
        instructions: Vec<String>,
        /// Hex-encoded machine code, bypassing the assembler
        #[arg(long)]
        raw: Option<String>,
    },
    /// List indexed gadgets, lowest address first
    Gadgets {
        file: PathBuf,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Only show gadgets with at most this many instructions
        #[arg(long)]
        max_insns: Option<usize>,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

pub struct BinsightCli {
    config_store: ConfigStore,
}

impl BinsightCli {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_store: ConfigStore::new()?,
        })
    }

    pub fn with_store(config_store: ConfigStore) -> Self {
        Self { config_store }
    }

    /// Defaults, then stored settings, then `BINSIGHT_*` variables.
    pub fn resolve_config(&self) -> Result<Config> {
        let mut config = Config::default();
        for (key, value) in self.config_store.load_config()?.settings {
            config.apply(&key, &value)?;
        }
        config.apply_env()?;
        Ok(config)
    }

    pub fn show_intro_and_help(&self) -> Result<()> {
        self.print_ascii_intro();
        self.print_help();
        Ok(())
    }

    pub fn handle_command(&mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Info { file, json } => self.handle_info_command(&file, json),
            Commands::Symbol { file, name } => self.handle_symbol_command(&file, &name),
            Commands::FindString { file, text } => self.handle_string_command(&file, &text),
            Commands::Gadget {
                file,
                instructions,
                raw,
            } => self.handle_gadget_command(&file, &instructions, raw.as_deref()),
            Commands::Gadgets {
                file,
                limit,
                max_insns,
            } => self.handle_gadgets_command(&file, limit, max_insns),
            Commands::Config { command } => self.handle_config_command(command),
        }
    }

    fn print_ascii_intro(&self) {
        println!(
            r#"
    _     _           _       _     _
   | |__ (_)_ __  ___(_) __ _| |__ | |_
   | '_ \| | '_ \/ __| |/ _` | '_ \| __|
   | |_) | | | | \__ \ | (_| | | | | |_
   |_.__/|_|_| |_|___/_|\__, |_| |_|\__|
                        |___/

    🔒 ELF Security Posture & ROP Gadget Inspector
        "#
        );
    }

    fn print_help(&self) {
        println!("Available Commands:");
        println!();
        println!("🔍 Inspection:");
        println!("  binsight info <file> [--json]          - Format, linkage and mitigations");
        println!("  binsight symbol <file> <name>          - Resolve a symbol address");
        println!("  binsight string <file> <text>          - Locate a string in .data/.rodata");
        println!();
        println!("🧩 Gadgets:");
        println!("  binsight gadget <file> \"pop rdi; ret\"  - Find a gadget by instructions");
        println!("  binsight gadget <file> --raw 5fc3      - Find a gadget by machine code");
        println!("  binsight gadgets <file> [--limit N]    - List indexed gadgets");
        println!();
        println!("⚙️  Configuration:");
        println!("  binsight config get <key>              - Get configuration value");
        println!("  binsight config set <key> <val>        - Set configuration value");
        println!("  binsight config list                   - List all configuration");
        println!();
        println!("💡 Tip: set RUST_LOG=binsight=debug to see per-section detail on stderr.");
    }
}
