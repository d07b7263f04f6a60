//! Command line interface for the bundlestream demo binary.
//!
//! Provides a tiny CLI to demonstrate argument parsing and man page
//! generation.

use clap::Parser;

/// Command line arguments for the `bundlestream` binary.
#[derive(Debug, Parser)]
#[command(name = "bundlestream", version, about = "Bundle stream reassembly demo")]
pub struct Cli {
    /// Message to slice into frames and reassemble.
    #[arg(short, long, default_value = "the quick brown fox jumps over the lazy dog")]
    pub message: String,

    /// Frame payload cap in bytes.
    #[arg(short, long, default_value_t = 8)]
    pub frame_size: usize,
}
