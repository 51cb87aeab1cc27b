//! Frame pool handling for display capture.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use recorder_ipc::{offer, Offer, PixelFormat, QueueConfig};
use tracing::{debug, trace, warn};
use windows::core::Interface;
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{Direct3D11CaptureFramePool, GraphicsCaptureItem};
use windows::Graphics::DirectX::Direct3D11::{IDirect3DDevice, IDirect3DSurface};
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_CPU_ACCESS_READ, D3D11_MAP_READ,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_STAGING,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::System::WinRT::Direct3D11::IDirect3DDxgiInterfaceAccess;

use crate::convert::bgra_to_nv12;
use crate::error::CaptureError;
use crate::frame::VideoFrame;
use crate::preview::PreviewTap;
use crate::CaptureResult;

/// Where converted frames go.
pub(crate) struct FrameSink {
    pub sender: Sender<VideoFrame>,
    pub evict: Receiver<VideoFrame>,
    pub queue: QueueConfig,
    pub preview: Option<PreviewTap>,
}

/// Converts pool frames to NV12 and forwards them.
///
/// The sink is dropped when the capture item closes, which the consumer
/// observes as a disconnected channel.
pub(crate) struct FramePoolManager {
    frame_pool: Direct3D11CaptureFramePool,
    d3d_device: ID3D11Device,
    context: ID3D11DeviceContext,
    staging_texture: Mutex<Option<ID3D11Texture2D>>,
    sink: Mutex<Option<FrameSink>>,
    sequence: AtomicU64,
    is_active: AtomicBool,
    should_stop: Arc<AtomicBool>,
    surface_size: (u32, u32),
    width: u32,
    height: u32,
}

impl FramePoolManager {
    pub fn new(
        item: &GraphicsCaptureItem,
        d3d_device: ID3D11Device,
        context: ID3D11DeviceContext,
        direct3d_device: &IDirect3DDevice,
        sink: FrameSink,
        should_stop: Arc<AtomicBool>,
    ) -> CaptureResult<Arc<Self>> {
        let size = item.Size()?;
        let surface_size = (size.Width as u32, size.Height as u32);
        let width = (size.Width as u32) & !1;
        let height = (size.Height as u32) & !1;

        debug!(width, height, "Creating frame pool");

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            direct3d_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            2,
            size,
        )?;

        let manager = Arc::new(Self {
            frame_pool,
            d3d_device,
            context,
            staging_texture: Mutex::new(None),
            sink: Mutex::new(Some(sink)),
            sequence: AtomicU64::new(0),
            is_active: AtomicBool::new(false),
            should_stop,
            surface_size,
            width,
            height,
        });

        let on_frame = Arc::clone(&manager);
        manager.frame_pool.FrameArrived(&TypedEventHandler::new(
            move |pool: &Option<Direct3D11CaptureFramePool>, _| {
                if let Some(pool) = pool {
                    if let Err(e) = on_frame.on_frame_arrived(pool) {
                        warn!("Frame processing error: {}", e);
                    }
                }
                Ok(())
            },
        ))?;

        let on_closed = Arc::clone(&manager);
        item.Closed(&TypedEventHandler::new(move |_, _| {
            warn!("Display capture item closed");
            on_closed.close_sink();
            Ok(())
        }))?;

        Ok(manager)
    }

    pub fn frame_pool(&self) -> &Direct3D11CaptureFramePool {
        &self.frame_pool
    }

    pub fn set_active(&self, active: bool) {
        self.is_active.store(active, Ordering::SeqCst);
    }

    pub fn close_sink(&self) {
        self.is_active.store(false, Ordering::SeqCst);
        self.sink.lock().take();
    }

    fn on_frame_arrived(&self, pool: &Direct3D11CaptureFramePool) -> CaptureResult<()> {
        if !self.is_active.load(Ordering::SeqCst) {
            return Ok(());
        }

        let frame = pool.TryGetNextFrame()?;
        let captured_at = Instant::now();
        let surface = frame.Surface()?;
        let data = self.convert_to_nv12(&surface)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let frame = VideoFrame {
            data,
            width: self.width,
            height: self.height,
            format: PixelFormat::Nv12,
            captured_at,
            sequence,
        };

        let mut sink = self.sink.lock();
        let Some(target) = sink.as_ref() else {
            return Ok(());
        };
        if let Some(preview) = &target.preview {
            preview.offer(&frame);
        }
        match offer(
            &target.sender,
            &target.evict,
            frame,
            target.queue.policy,
            &self.should_stop,
        ) {
            Offer::Queued => trace!(sequence, "Captured frame"),
            Offer::EvictedOldest | Offer::Dropped => debug!(sequence, "Frame queue full"),
            Offer::Disconnected => {
                sink.take();
                return Err(CaptureError::DeviceLost("frame consumer closed".to_string()));
            }
        }

        Ok(())
    }

    fn convert_to_nv12(&self, surface: &IDirect3DSurface) -> CaptureResult<Bytes> {
        let access: IDirect3DDxgiInterfaceAccess = surface.cast()?;
        let texture: ID3D11Texture2D = unsafe { access.GetInterface()? };

        let staging = {
            let mut slot = self.staging_texture.lock();
            match slot.as_ref() {
                Some(staging) => staging.clone(),
                None => {
                    let staging = self.create_staging_texture()?;
                    *slot = Some(staging.clone());
                    staging
                }
            }
        };

        unsafe {
            self.context.CopyResource(&staging, &texture);
        }

        let mapped = unsafe {
            let mut mapped = std::mem::zeroed();
            self.context
                .Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))?;
            mapped
        };

        let bgra = unsafe {
            std::slice::from_raw_parts(
                mapped.pData as *const u8,
                (mapped.RowPitch * self.height) as usize,
            )
        };
        let nv12 = bgra_to_nv12(bgra, self.width, self.height, mapped.RowPitch as usize);

        unsafe {
            self.context.Unmap(&staging, 0);
        }

        Ok(Bytes::from(nv12))
    }

    fn create_staging_texture(&self) -> CaptureResult<ID3D11Texture2D> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: self.surface_size.0,
            Height: self.surface_size.1,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_STAGING,
            BindFlags: Default::default(),
            CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
            MiscFlags: Default::default(),
        };

        let mut texture = None;
        unsafe {
            self.d3d_device
                .CreateTexture2D(&desc, None, Some(&mut texture))?;
        }

        texture.ok_or_else(|| CaptureError::WindowsApi {
            message: "Failed to create staging texture".to_string(),
            source: None,
        })
    }
}
