use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "gestura")]
#[command(about = "Gesture practice capture and upload", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// List the gesture catalog and reference clips
    Gestures,
    /// Print version information
    Version,
}
