//! Audio endpoint enumeration.
//!
//! A [`DeviceCatalog`] answers one question: what endpoints exist *right
//! now*, and which ones are the defaults. Snapshots are never cached across
//! resolutions — devices appear and disappear between sessions (USB headsets,
//! Bluetooth), so the resolver queries a fresh list every time.

use serde::{Deserialize, Serialize};

/// Immutable snapshot of one audio endpoint from a single catalog query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    /// Catalog-assigned id, stable only within one snapshot.
    pub id: u32,
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    /// Preferred sample rate reported by the driver (Hz).
    pub default_sample_rate: u32,
    /// Host API this endpoint belongs to.
    pub host_api_id: u32,
}

impl AudioDevice {
    /// Whether this endpoint can be opened for capture at all.
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }
}

/// Names used by vendor drivers for loopback-capable recording endpoints.
const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "stereomix",
    "wave out mix",
    "what u hear",
    "loopback",
];

/// Best-effort heuristic for Windows-style loopback/system-output capture
/// devices. Case-insensitive substring match.
pub fn is_loopback_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Source of device snapshots.
///
/// The cpal-backed implementation is the production catalog; tests and
/// headless environments use [`StaticCatalog`].
pub trait DeviceCatalog: Send + Sync {
    /// All endpoints visible at this moment, in OS enumeration order.
    fn devices(&self) -> Vec<AudioDevice>;

    /// Id of the system default input endpoint, if one is reported.
    fn default_input(&self) -> Option<u32>;

    /// Id of the system default output endpoint, if one is reported.
    fn default_output(&self) -> Option<u32>;

    /// An OS-level loopback capture of the current default output
    /// (WASAPI-style), where the platform supports opening one.
    ///
    /// Returns `None` when the host API has no such capability; the
    /// resolver then degrades to the default input device.
    fn loopback_capture(&self) -> Option<AudioDevice>;
}

/// Fixed device snapshot.
///
/// Used by tests to script resolver scenarios, and usable directly in
/// headless environments where no real audio host exists.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    pub devices: Vec<AudioDevice>,
    pub default_input: Option<u32>,
    pub default_output: Option<u32>,
    pub loopback_capture: Option<AudioDevice>,
}

impl DeviceCatalog for StaticCatalog {
    fn devices(&self) -> Vec<AudioDevice> {
        self.devices.clone()
    }

    fn default_input(&self) -> Option<u32> {
        self.default_input
    }

    fn default_output(&self) -> Option<u32> {
        self.default_output
    }

    fn loopback_capture(&self) -> Option<AudioDevice> {
        self.loopback_capture.clone()
    }
}

/// Catalog backed by the default cpal host.
#[cfg(feature = "audio-cpal")]
#[derive(Debug, Default)]
pub struct CpalCatalog;

#[cfg(feature = "audio-cpal")]
impl DeviceCatalog for CpalCatalog {
    fn devices(&self) -> Vec<AudioDevice> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let devices = match host.devices() {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("failed to enumerate audio devices: {e}");
                return Vec::new();
            }
        };

        devices
            .enumerate()
            .map(|(idx, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Audio Device {}", idx + 1));
                let input = device.default_input_config().ok();
                let output = device.default_output_config().ok();
                let default_sample_rate = input
                    .as_ref()
                    .map(|c| c.sample_rate().0)
                    .or_else(|| output.as_ref().map(|c| c.sample_rate().0))
                    .unwrap_or(44_100);
                AudioDevice {
                    id: idx as u32,
                    name,
                    max_input_channels: input.map(|c| c.channels()).unwrap_or(0),
                    max_output_channels: output.map(|c| c.channels()).unwrap_or(0),
                    default_sample_rate,
                    host_api_id: 0,
                }
            })
            .collect()
    }

    fn default_input(&self) -> Option<u32> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let default_name = host.default_input_device()?.name().ok()?;
        self.devices()
            .into_iter()
            .find(|d| d.name == default_name)
            .map(|d| d.id)
    }

    fn default_output(&self) -> Option<u32> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let default_name = host.default_output_device()?.name().ok()?;
        self.devices()
            .into_iter()
            .find(|d| d.name == default_name)
            .map(|d| d.id)
    }

    fn loopback_capture(&self) -> Option<AudioDevice> {
        // cpal 0.15 cannot open an output endpoint in WASAPI loopback mode,
        // so the OS-level branch of the cascade is unavailable through this
        // catalog. Platform catalogs that can open one implement this.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::is_loopback_name;

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_name("Wave Out Mix (SigmaTel)"));
        assert!(is_loopback_name("What U Hear (Sound Blaster)"));
        assert!(is_loopback_name("Monitor Loopback"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert!(is_loopback_name("STEREO MIX (REALTEK AUDIO)"));
        assert!(is_loopback_name("  stereo mix  "));
    }

    #[test]
    fn plain_microphones_do_not_match() {
        assert!(!is_loopback_name("Microphone Array (USB PnP Audio Device)"));
        assert!(!is_loopback_name("Headset Microphone"));
    }
}
