use anyhow::Result;

use crate::config::Config;
use crate::gesture;

mod args;

pub use args::{Cli, CliCommand};

/// Print the gesture catalog with reference clip availability.
pub fn handle_gestures_command() -> Result<()> {
    let config = Config::load()?;
    let reference_dir = config.reference_dir()?;

    println!("{:<42} {:<10} Reference clip", "Gesture", "Label");
    for gesture in gesture::all() {
        let reference = gesture.reference_clip(&reference_dir);
        let marker = if reference.exists() { "" } else { " (missing)" };
        println!(
            "{:<42} {:<10} {}{}",
            gesture.name,
            gesture.label,
            reference.display(),
            marker
        );
    }

    Ok(())
}
