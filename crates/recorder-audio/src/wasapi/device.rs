//! Audio device enumeration.

use recorder_ipc::{Device, DeviceKind};
use tracing::{debug, instrument};
use windows::core::PCWSTR;
use windows::Win32::Media::Audio::{
    eCapture, eConsole, eRender, EDataFlow, IMMDevice, IMMDeviceEnumerator, MMDeviceEnumerator,
    DEVICE_STATE_ACTIVE,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED, STGM_READ,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

use crate::error::AudioError;
use crate::AudioResult;

/// Initialize COM for the current thread if not already initialized.
pub(crate) fn ensure_com_initialized() -> AudioResult<()> {
    unsafe {
        // S_FALSE means this thread already joined the apartment.
        let result = CoInitializeEx(None, COINIT_MULTITHREADED);
        if result.is_err() && result != windows::Win32::Foundation::S_FALSE {
            return Err(AudioError::WindowsApi {
                message: "Failed to initialize COM".to_string(),
                source: None,
            });
        }
    }
    Ok(())
}

fn data_flow(kind: DeviceKind) -> AudioResult<EDataFlow> {
    match kind {
        DeviceKind::Speaker => Ok(eRender),
        DeviceKind::Mic => Ok(eCapture),
        DeviceKind::Camera => Err(AudioError::EnumerationFailed(
            "cameras are not audio endpoints".to_string(),
        )),
    }
}

/// Enumerate active speakers or microphones, in OS order.
#[instrument(name = "enumerate_audio_devices")]
pub fn enumerate_audio_devices(kind: DeviceKind) -> AudioResult<Vec<Device>> {
    ensure_com_initialized()?;
    let flow = data_flow(kind)?;

    let enumerator: IMMDeviceEnumerator =
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };

    let default_id = unsafe {
        enumerator
            .GetDefaultAudioEndpoint(flow, eConsole)
            .ok()
            .and_then(|device| device.GetId().ok())
            .and_then(|id| id.to_string().ok())
    };

    let collection = unsafe { enumerator.EnumAudioEndpoints(flow, DEVICE_STATE_ACTIVE)? };
    let count = unsafe { collection.GetCount()? };
    let mut devices = Vec::with_capacity(count as usize);

    for i in 0..count {
        let device: IMMDevice = unsafe { collection.Item(i)? };
        if let Ok(info) = device_info(&device, kind, default_id.as_deref()) {
            devices.push(info);
        }
    }

    debug!(count = devices.len(), kind = kind.name(), "Enumerated audio devices");
    Ok(devices)
}

fn device_info(device: &IMMDevice, kind: DeviceKind, default_id: Option<&str>) -> AudioResult<Device> {
    let id = unsafe {
        let id_ptr = device.GetId()?;
        id_ptr.to_string().map_err(|_| AudioError::WindowsApi {
            message: "Failed to get device ID".to_string(),
            source: None,
        })?
    };

    let name = device_name(device).unwrap_or_else(|_| "Unknown Device".to_string());
    let is_default = default_id == Some(id.as_str());

    Ok(Device {
        id,
        name,
        is_default,
        kind,
    })
}

fn device_name(device: &IMMDevice) -> AudioResult<String> {
    unsafe {
        let store: IPropertyStore = device.OpenPropertyStore(STGM_READ)?;

        // PKEY_Device_FriendlyName
        let key = PROPERTYKEY {
            fmtid: windows::core::GUID::from_u128(0xa45c254e_df1c_4efd_8020_67d146a850e0),
            pid: 14,
        };
        let name = store.GetValue(&key)?.to_string();

        if name.is_empty() {
            Ok("Unknown".to_string())
        } else {
            Ok(name)
        }
    }
}

/// Find an audio device by its ID.
pub fn find_device_by_id(id: &str) -> AudioResult<IMMDevice> {
    ensure_com_initialized()?;

    let enumerator: IMMDeviceEnumerator =
        unsafe { CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)? };

    let id_wide: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();

    unsafe {
        enumerator
            .GetDevice(PCWSTR(id_wide.as_ptr()))
            .map_err(|_| AudioError::DeviceNotFound(id.to_string()))
    }
}
