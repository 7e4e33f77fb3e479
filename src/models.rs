//! Device model catalog.
//!
//! The model name is sent to the server in the `Model` header and supplies
//! default window dimensions when no explicit size is configured.

use std::fmt;

/// A device model with its native screen dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceModel {
    /// Model identifier sent in API headers
    pub name: &'static str,
    /// Screen width in pixels
    pub width: u32,
    /// Screen height in pixels
    pub height: u32,
    /// Human-readable description
    pub desc: &'static str,
}

/// All known device models, physical and virtual.
pub const ALL_MODELS: &[DeviceModel] = &[
    DeviceModel {
        name: "TRMNL",
        width: 800,
        height: 480,
        desc: "TRMNL e-ink display (800x480)",
    },
    DeviceModel {
        name: "virtual",
        width: 800,
        height: 480,
        desc: "Virtual display (800x480)",
    },
    DeviceModel {
        name: "virtual-hd",
        width: 1024,
        height: 768,
        desc: "Virtual display HD (1024x768)",
    },
    DeviceModel {
        name: "virtual-fhd",
        width: 1920,
        height: 1080,
        desc: "Virtual display Full HD (1920x1080)",
    },
    DeviceModel {
        name: "virtual-portrait",
        width: 480,
        height: 800,
        desc: "Virtual display portrait (480x800)",
    },
    DeviceModel {
        name: "waveshare-7.5",
        width: 800,
        height: 480,
        desc: "Waveshare 7.5\" e-ink (800x480)",
    },
    DeviceModel {
        name: "waveshare-9.7",
        width: 1200,
        height: 825,
        desc: "Waveshare 9.7\" e-ink (1200x825)",
    },
];

/// Look up a model by name.
pub fn get_model(name: &str) -> Option<DeviceModel> {
    ALL_MODELS.iter().copied().find(|m| m.name == name)
}

/// Formatted listing of all models for `--list-models`.
pub fn list_models() -> String {
    let mut out = String::from("Available device models:\n");
    for model in ALL_MODELS {
        out.push_str(&format!("  {:<20} {}\n", model.name, model.desc));
    }
    out
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.name, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_model() {
        let model = get_model("virtual-hd").unwrap();
        assert_eq!(model.width, 1024);
        assert_eq!(model.height, 768);

        assert!(get_model("no-such-model").is_none());
    }

    #[test]
    fn test_list_models_includes_all() {
        let listing = list_models();
        for model in ALL_MODELS {
            assert!(listing.contains(model.name));
        }
    }
}
