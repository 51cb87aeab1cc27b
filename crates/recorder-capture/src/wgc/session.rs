//! Display capture source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;
use recorder_ipc::QueueConfig;
use tracing::{debug, info, instrument};
use windows::core::Interface;
use windows::Graphics::Capture::{GraphicsCaptureSession, IGraphicsCaptureSession2};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11DeviceFromDXGIDevice;

use super::frame_pool::{FramePoolManager, FrameSink};
use super::monitor::{find_monitor_by_id, MonitorInfo};
use crate::error::CaptureError;
use crate::frame::VideoFrame;
use crate::preview::PreviewTap;
use crate::{CaptureResult, VideoSource};

struct Direct3D {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    winrt_device: IDirect3DDevice,
}

#[instrument(name = "d3d11_create_device")]
fn create_direct3d() -> CaptureResult<Direct3D> {
    let mut device = None;
    let mut context = None;

    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT,
            None,
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )?;
    }

    let (Some(device), Some(context)) = (device, context) else {
        return Err(CaptureError::WindowsApi {
            message: "Failed to create D3D11 device".to_string(),
            source: None,
        });
    };

    let dxgi: IDXGIDevice = device.cast()?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi)? };
    let winrt_device: IDirect3DDevice = inspectable.cast()?;

    debug!("Created D3D11 device for capture");
    Ok(Direct3D {
        device,
        context,
        winrt_device,
    })
}

/// Captures one attached display through Windows Graphics Capture.
pub struct DisplaySource {
    monitor: MonitorInfo,
    direct3d: Direct3D,
    frame_pool_manager: Option<Arc<FramePoolManager>>,
    session: Option<GraphicsCaptureSession>,
    should_stop: Arc<AtomicBool>,
    is_active: AtomicBool,
}

// SAFETY: the D3D11 device is created free-threaded and the WinRT objects
// are agile; the source is only driven from one thread at a time.
unsafe impl Send for DisplaySource {}

impl DisplaySource {
    /// Open the display with the given device id.
    #[instrument(name = "display_source_open")]
    pub fn open(id: &str) -> CaptureResult<Self> {
        if !GraphicsCaptureSession::IsSupported()? {
            return Err(CaptureError::NotSupported);
        }

        let monitor = find_monitor_by_id(id)?;
        let direct3d = create_direct3d()?;

        Ok(Self {
            monitor,
            direct3d,
            frame_pool_manager: None,
            session: None,
            should_stop: Arc::new(AtomicBool::new(false)),
            is_active: AtomicBool::new(false),
        })
    }
}

impl VideoSource for DisplaySource {
    #[instrument(name = "display_capture_start", skip(self, queue, preview))]
    fn start(
        &mut self,
        queue: QueueConfig,
        preview: Option<PreviewTap>,
    ) -> CaptureResult<Receiver<VideoFrame>> {
        if self.is_active.load(Ordering::SeqCst) {
            return Err(CaptureError::AlreadyStarted);
        }

        info!(display = %self.monitor.name, "Starting display capture");

        let item = self.monitor.create_capture_item()?;
        let (sender, receiver) = queue.channel();
        self.should_stop.store(false, Ordering::SeqCst);

        let sink = FrameSink {
            sender,
            evict: receiver.clone(),
            queue,
            preview,
        };
        let manager = FramePoolManager::new(
            &item,
            self.direct3d.device.clone(),
            self.direct3d.context.clone(),
            &self.direct3d.winrt_device,
            sink,
            Arc::clone(&self.should_stop),
        )?;

        let session = manager.frame_pool().CreateCaptureSession(&item)?;
        if let Ok(session2) = session.cast::<IGraphicsCaptureSession2>() {
            let _ = session2.SetIsCursorCaptureEnabled(true);
        }

        manager.set_active(true);
        session.StartCapture()?;

        self.frame_pool_manager = Some(manager);
        self.session = Some(session);
        self.is_active.store(true, Ordering::SeqCst);
        info!("Display capture started");

        Ok(receiver)
    }

    #[instrument(name = "display_capture_stop", skip(self))]
    fn stop(&mut self) -> CaptureResult<()> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.should_stop.store(true, Ordering::SeqCst);
        if let Some(manager) = &self.frame_pool_manager {
            manager.close_sink();
        }
        if let Some(session) = self.session.take() {
            session.Close()?;
        }
        if let Some(manager) = self.frame_pool_manager.take() {
            manager.frame_pool().Close()?;
        }

        self.is_active.store(false, Ordering::SeqCst);
        info!("Display capture stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.monitor.width(), self.monitor.height())
    }
}

impl Drop for DisplaySource {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
