// src/lib.rs
pub mod binary;
pub mod cli;
pub mod config;
pub mod error;

pub use binary::{
    Addr, Analyzer, Arch, Binary, BinaryInfo, ByteOrder, Format, GadgetIndex, GadgetKey,
    OperatingSystem, RelRo, SecurityInfo, analyze_binary,
};
pub use config::Config;
pub use error::{Error, Result};
