//! Display enumeration for capture.

use recorder_ipc::{Device, DeviceKind};
use tracing::{debug, instrument};
use windows::Graphics::Capture::GraphicsCaptureItem;
use windows::Win32::Foundation::{BOOL, LPARAM, RECT};
use windows::Win32::Graphics::Gdi::{
    EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

use crate::error::CaptureError;
use crate::CaptureResult;

const MONITORINFOF_PRIMARY: u32 = 1;

/// An attached display.
#[derive(Debug, Clone)]
pub struct MonitorInfo {
    /// Monitor handle, valid for the current display configuration.
    pub handle: isize,

    /// GDI device name, e.g. `\\.\DISPLAY1`.
    pub name: String,

    /// Monitor bounds: left, top, right, bottom.
    pub bounds: (i32, i32, i32, i32),

    /// Whether this is the primary monitor.
    pub is_primary: bool,
}

impl MonitorInfo {
    /// Capture width, rounded down to even.
    pub fn width(&self) -> u32 {
        ((self.bounds.2 - self.bounds.0) as u32) & !1
    }

    /// Capture height, rounded down to even.
    pub fn height(&self) -> u32 {
        ((self.bounds.3 - self.bounds.1) as u32) & !1
    }

    /// Stable identifier; device names survive re-enumeration.
    pub fn id(&self) -> String {
        format!("display:{}", self.name)
    }

    /// Describe this display as a video device.
    pub fn to_device(&self) -> Device {
        Device {
            id: self.id(),
            name: format!("{} ({}x{})", self.name, self.width(), self.height()),
            is_default: self.is_primary,
            kind: DeviceKind::Camera,
        }
    }

    /// Create a GraphicsCaptureItem for this monitor.
    pub fn create_capture_item(&self) -> CaptureResult<GraphicsCaptureItem> {
        let interop: IGraphicsCaptureItemInterop =
            windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()?;

        let hmonitor = HMONITOR(self.handle as *mut _);
        let item: GraphicsCaptureItem = unsafe { interop.CreateForMonitor(hmonitor)? };
        Ok(item)
    }
}

/// Enumerate attached displays.
#[instrument(name = "enumerate_monitors")]
pub fn enumerate_monitors() -> CaptureResult<Vec<MonitorInfo>> {
    let mut monitors: Vec<MonitorInfo> = Vec::new();

    unsafe {
        EnumDisplayMonitors(
            HDC::default(),
            None,
            Some(enum_monitor_callback),
            LPARAM(&mut monitors as *mut Vec<MonitorInfo> as isize),
        )
        .ok()
        .map_err(|_| CaptureError::WindowsApi {
            message: "Failed to enumerate monitors".to_string(),
            source: None,
        })?;
    }

    debug!(count = monitors.len(), "Enumerated monitors");
    Ok(monitors)
}

unsafe extern "system" fn enum_monitor_callback(
    hmonitor: HMONITOR,
    _hdc: HDC,
    _rect: *mut RECT,
    lparam: LPARAM,
) -> BOOL {
    let monitors = &mut *(lparam.0 as *mut Vec<MonitorInfo>);

    let mut info = MONITORINFOEXW::default();
    info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

    if GetMonitorInfoW(hmonitor, &mut info.monitorInfo).as_bool() {
        let len = info
            .szDevice
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(info.szDevice.len());
        let rect = info.monitorInfo.rcMonitor;

        monitors.push(MonitorInfo {
            handle: hmonitor.0 as isize,
            name: String::from_utf16_lossy(&info.szDevice[..len]),
            bounds: (rect.left, rect.top, rect.right, rect.bottom),
            is_primary: info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY != 0,
        });
    }

    BOOL::from(true)
}

/// Find a display by its device id.
pub fn find_monitor_by_id(id: &str) -> CaptureResult<MonitorInfo> {
    enumerate_monitors()?
        .into_iter()
        .find(|m| m.id() == id)
        .ok_or_else(|| CaptureError::SourceNotFound(id.to_string()))
}
