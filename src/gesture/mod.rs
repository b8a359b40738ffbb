//! The gesture catalog.
//!
//! Maps the display names shown to the user onto the short labels used in
//! clip file names and reference clip lookups. Selection is always passed
//! explicitly into the capture layer, never held as ambient state.

use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gesture {
    pub name: &'static str,
    pub label: &'static str,
}

const GESTURES: &[Gesture] = &[
    Gesture {
        name: "Turn on lights",
        label: "LightOn",
    },
    Gesture {
        name: "Turn off lights",
        label: "LightOff",
    },
    Gesture {
        name: "Turn on fan",
        label: "FanOn",
    },
    Gesture {
        name: "Turn off fan",
        label: "FanOff",
    },
    Gesture {
        name: "Increase fan speed",
        label: "FanUp",
    },
    Gesture {
        name: "Decrease fan speed",
        label: "FanDown",
    },
    Gesture {
        name: "Set Thermostat to specified temperature",
        label: "SetThermo",
    },
    Gesture {
        name: "0",
        label: "Num0",
    },
    Gesture {
        name: "1",
        label: "Num1",
    },
    Gesture {
        name: "2",
        label: "Num2",
    },
    Gesture {
        name: "3",
        label: "Num3",
    },
    Gesture {
        name: "4",
        label: "Num4",
    },
    Gesture {
        name: "5",
        label: "Num5",
    },
    Gesture {
        name: "6",
        label: "Num6",
    },
    Gesture {
        name: "7",
        label: "Num7",
    },
    Gesture {
        name: "8",
        label: "Num8",
    },
    Gesture {
        name: "9",
        label: "Num9",
    },
];

/// All known gestures, in menu order.
pub fn all() -> &'static [Gesture] {
    GESTURES
}

impl Gesture {
    /// Look up a gesture by display name or label, case-insensitively.
    pub fn find(query: &str) -> Option<&'static Gesture> {
        GESTURES.iter().find(|g| {
            g.name.eq_ignore_ascii_case(query) || g.label.eq_ignore_ascii_case(query)
        })
    }

    /// File name for a practice clip. The (gesture, attempt, user) triple
    /// keeps successive takes from overwriting each other.
    pub fn clip_file_name(&self, attempt: u64, user_id: &str) -> String {
        format!("{}_PRACTICE_{}_{}.mp4", self.label, attempt, user_id)
    }

    /// Path of the reference clip demonstrating this gesture.
    pub fn reference_clip(&self, reference_dir: &Path) -> PathBuf {
        reference_dir.join(format!("{}.mp4", self.label.to_lowercase()))
    }
}
