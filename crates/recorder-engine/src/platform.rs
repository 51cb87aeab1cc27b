//! Device enumeration and opening, per platform.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use recorder_audio::{AudioEndpoint, ToneEndpoint};
use recorder_capture::{TestPatternCamera, VideoSource};
use recorder_ipc::{AudioRole, Device, DeviceKind};
use tracing::{debug, info};

use crate::error::RecorderError;
use crate::RecorderResult;

/// OS capture APIs as seen by the engine.
pub trait Platform: Send + Sync {
    /// Devices of `kind`, in enumeration order.
    fn list_devices(&self, kind: DeviceKind) -> RecorderResult<Vec<Device>>;

    /// Open an audio endpoint by device id.
    fn open_audio(&self, id: &str, role: AudioRole) -> RecorderResult<Box<dyn AudioEndpoint>>;

    /// Open a video source by device id.
    fn open_video(&self, id: &str) -> RecorderResult<Box<dyn VideoSource>>;

    /// Name for logs.
    fn name(&self) -> &'static str;
}

/// Parameters of a simulated device.
#[derive(Debug, Clone, Copy)]
pub enum VirtualKind {
    /// Tone endpoint at the given frequency.
    Tone { frequency: f32 },

    /// Test-pattern camera.
    Camera { width: u32, height: u32, frame_rate: u32 },
}

struct VirtualDevice {
    device: Device,
    spec: VirtualKind,
    present: Arc<AtomicBool>,
}

/// In-process device registry.
///
/// Audio devices produce a sine tone and cameras a moving test pattern.
/// Devices can be plugged and unplugged at runtime; unplugging ends the
/// producer of an open device just like a removed USB device would.
#[derive(Default)]
pub struct VirtualPlatform {
    devices: Mutex<Vec<VirtualDevice>>,
}

impl VirtualPlatform {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with one default speaker, microphone and camera.
    pub fn with_default_devices() -> Self {
        let platform = Self::new();
        platform.plug(
            Device {
                id: "virtual:speaker".into(),
                name: "Virtual Speaker".into(),
                is_default: true,
                kind: DeviceKind::Speaker,
            },
            VirtualKind::Tone { frequency: 440.0 },
        );
        platform.plug(
            Device {
                id: "virtual:mic".into(),
                name: "Virtual Microphone".into(),
                is_default: true,
                kind: DeviceKind::Mic,
            },
            VirtualKind::Tone { frequency: 660.0 },
        );
        platform.plug(
            Device {
                id: "virtual:camera".into(),
                name: "Virtual Camera".into(),
                is_default: true,
                kind: DeviceKind::Camera,
            },
            VirtualKind::Camera {
                width: 320,
                height: 240,
                frame_rate: 30,
            },
        );
        platform
    }

    /// Add a device, replacing one with the same id.
    pub fn plug(&self, device: Device, spec: VirtualKind) {
        let mut devices = self.devices.lock();
        if let Some(old) = devices.iter().position(|d| d.device.id == device.id) {
            let old = devices.remove(old);
            old.present.store(false, Ordering::SeqCst);
        }
        info!(id = %device.id, kind = device.kind.name(), "Virtual device plugged");
        devices.push(VirtualDevice {
            device,
            spec,
            present: Arc::new(AtomicBool::new(true)),
        });
    }

    /// Remove a device. Returns false when no device has this id.
    pub fn unplug(&self, id: &str) -> bool {
        let mut devices = self.devices.lock();
        let Some(index) = devices.iter().position(|d| d.device.id == id) else {
            return false;
        };
        let removed = devices.remove(index);
        removed.present.store(false, Ordering::SeqCst);
        info!(id, "Virtual device unplugged");
        true
    }

    fn lookup(&self, id: &str) -> Option<(VirtualKind, Arc<AtomicBool>)> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.device.id == id)
            .map(|d| (d.spec, Arc::clone(&d.present)))
    }
}

impl Platform for VirtualPlatform {
    fn list_devices(&self, kind: DeviceKind) -> RecorderResult<Vec<Device>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .filter(|d| d.device.kind == kind)
            .map(|d| d.device.clone())
            .collect())
    }

    fn open_audio(&self, id: &str, role: AudioRole) -> RecorderResult<Box<dyn AudioEndpoint>> {
        match self.lookup(id) {
            Some((VirtualKind::Tone { frequency }, present)) => {
                debug!(id, ?role, "Opening virtual audio endpoint");
                Ok(Box::new(ToneEndpoint::new(role, frequency, present)))
            }
            _ => Err(RecorderError::DeviceUnavailable(format!(
                "no audio device {id}"
            ))),
        }
    }

    fn open_video(&self, id: &str) -> RecorderResult<Box<dyn VideoSource>> {
        match self.lookup(id) {
            Some((
                VirtualKind::Camera {
                    width,
                    height,
                    frame_rate,
                },
                present,
            )) => {
                debug!(id, width, height, "Opening virtual camera");
                Ok(Box::new(
                    TestPatternCamera::new(width, height, present).with_frame_rate(frame_rate),
                ))
            }
            _ => Err(RecorderError::DeviceUnavailable(format!(
                "no video device {id}"
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "virtual"
    }
}

/// WASAPI endpoints and Windows Graphics Capture displays.
#[cfg(windows)]
#[derive(Debug, Default)]
pub struct WindowsPlatform;

#[cfg(windows)]
impl Platform for WindowsPlatform {
    fn list_devices(&self, kind: DeviceKind) -> RecorderResult<Vec<Device>> {
        match kind {
            DeviceKind::Speaker | DeviceKind::Mic => {
                Ok(recorder_audio::enumerate_audio_devices(kind)?)
            }
            DeviceKind::Camera => {
                let monitors = recorder_capture::enumerate_monitors()
                    .map_err(|e| RecorderError::Enumeration(e.to_string()))?;
                Ok(monitors.iter().map(|m| m.to_device()).collect())
            }
        }
    }

    fn open_audio(&self, id: &str, role: AudioRole) -> RecorderResult<Box<dyn AudioEndpoint>> {
        Ok(Box::new(recorder_audio::WasapiEndpoint::open(id, role)?))
    }

    fn open_video(&self, id: &str) -> RecorderResult<Box<dyn VideoSource>> {
        Ok(Box::new(recorder_capture::DisplaySource::open(id)?))
    }

    fn name(&self) -> &'static str {
        "windows"
    }
}

/// The platform used when the host does not supply one.
pub fn default_platform() -> Arc<dyn Platform> {
    #[cfg(windows)]
    {
        Arc::new(WindowsPlatform)
    }
    #[cfg(not(windows))]
    {
        Arc::new(VirtualPlatform::with_default_devices())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_one_device_per_kind() {
        let platform = VirtualPlatform::with_default_devices();
        for kind in DeviceKind::ALL {
            let devices = platform.list_devices(kind).unwrap();
            assert_eq!(devices.len(), 1);
            assert!(devices[0].is_default);
        }
    }

    #[test]
    fn unplugged_device_cannot_be_opened() {
        let platform = VirtualPlatform::with_default_devices();
        assert!(platform.open_audio("virtual:mic", AudioRole::Mic).is_ok());
        assert!(platform.unplug("virtual:mic"));
        assert!(!platform.unplug("virtual:mic"));
        assert!(matches!(
            platform.open_audio("virtual:mic", AudioRole::Mic),
            Err(RecorderError::DeviceUnavailable(_))
        ));
        assert!(platform.list_devices(DeviceKind::Mic).unwrap().is_empty());
    }

    #[test]
    fn kinds_are_not_interchangeable() {
        let platform = VirtualPlatform::with_default_devices();
        assert!(platform.open_video("virtual:speaker").is_err());
        assert!(platform.open_audio("virtual:camera", AudioRole::Speaker).is_err());
    }
}
