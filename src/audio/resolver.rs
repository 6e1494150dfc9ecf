//! Source-mode to device resolution.
//!
//! Maps a logical capture request (microphone / system audio / both) onto a
//! concrete endpoint, applying the cascading fallback for system audio:
//!
//! ```text
//! System ─► named loopback device ("Stereo Mix", …)
//!             └─ none ─► OS-level loopback of the default output
//!                          └─ none ─► default input device + warning
//! ```
//!
//! Resolution happens once per session start against a fresh catalog
//! snapshot; the returned [`DeviceSelection`] is immutable for the
//! session's lifetime.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::catalog::{is_loopback_name, AudioDevice, DeviceCatalog};
use crate::error::{ConfabError, Result};

/// Capture sample rate used for every session.
///
/// Fixed rather than negotiated: recognition backends accept the chunk's
/// rate, and 44.1 kHz is universally supported by the endpoints this
/// targets.
pub const CAPTURE_SAMPLE_RATE: u32 = 44_100;

/// Logical audio source requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Default input device, mono.
    Microphone,
    /// Whatever is currently playing out (loopback cascade).
    System,
    /// Microphone and system audio together. Resolved through the system
    /// cascade; no independent-stream mixing is attempted.
    Both,
}

/// Non-fatal degradation attached to a selection when a preferred audio
/// route was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DegradationWarning {
    /// No loopback route exists; capturing from the default input instead.
    LoopbackUnavailable,
}

/// Concrete device choice for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSelection {
    pub device_id: u32,
    /// Carried so the capture engine can re-find the endpoint by name;
    /// catalog indices are not stable across enumerations.
    pub device_name: String,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub degradation: Option<DegradationWarning>,
}

/// Choose a concrete device for `mode`.
///
/// # Errors
/// `ConfabError::NoInputDeviceAvailable` when no endpoint in the catalog
/// exposes at least one input channel.
pub fn resolve(catalog: &dyn DeviceCatalog, mode: SourceMode) -> Result<DeviceSelection> {
    let devices = catalog.devices();

    match mode {
        SourceMode::Microphone => resolve_microphone(catalog, &devices),
        // The "both" path reuses the system cascade: mixing two independent
        // streams is out of scope, and a loopback endpoint often carries the
        // microphone anyway when the OS mixes it in.
        SourceMode::System | SourceMode::Both => resolve_system(catalog, &devices),
    }
}

fn resolve_microphone(
    catalog: &dyn DeviceCatalog,
    devices: &[AudioDevice],
) -> Result<DeviceSelection> {
    let device = default_input_device(catalog, devices)?;
    info!(device = %device.name, "resolved microphone source");
    Ok(selection(device, 1, None))
}

fn resolve_system(catalog: &dyn DeviceCatalog, devices: &[AudioDevice]) -> Result<DeviceSelection> {
    // 1. Dedicated loopback-named recording device, first match wins.
    if let Some(device) = devices.iter().find(|d| d.is_input() && is_loopback_name(&d.name)) {
        info!(device = %device.name, "resolved system source via loopback device");
        return Ok(selection(device.clone(), stereo_channels(device), None));
    }

    // 2. OS-level loopback capture of the default output.
    if let Some(device) = catalog.loopback_capture() {
        info!(device = %device.name, "resolved system source via host loopback");
        let channels = stereo_channels(&device);
        return Ok(selection(device, channels, None));
    }

    // 3. Default input device, flagged as degraded.
    warn!("no loopback route available, degrading to default input device");
    let device = default_input_device(catalog, devices)?;
    Ok(selection(device, 1, Some(DegradationWarning::LoopbackUnavailable)))
}

/// Default input endpoint, or the first input-capable endpoint when the OS
/// reports no default.
fn default_input_device(
    catalog: &dyn DeviceCatalog,
    devices: &[AudioDevice],
) -> Result<AudioDevice> {
    if let Some(id) = catalog.default_input() {
        if let Some(device) = devices.iter().find(|d| d.id == id && d.is_input()) {
            return Ok(device.clone());
        }
    }
    devices
        .iter()
        .find(|d| d.is_input())
        .cloned()
        .ok_or(ConfabError::NoInputDeviceAvailable)
}

fn stereo_channels(device: &AudioDevice) -> u16 {
    device.max_input_channels.min(2).max(1)
}

fn selection(
    device: AudioDevice,
    channel_count: u16,
    degradation: Option<DegradationWarning>,
) -> DeviceSelection {
    DeviceSelection {
        device_id: device.id,
        device_name: device.name,
        channel_count,
        sample_rate: CAPTURE_SAMPLE_RATE,
        degradation,
    }
}
