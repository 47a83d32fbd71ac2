//! DXGI Desktop Duplication capture backend (Windows).
//!
//! Owns the `IDXGIOutputDuplication` pipeline for the primary output:
//!
//! 1. Create a D3D11 device on [`start`](super::FrameSource::start).
//! 2. Duplicate output 0 and create a CPU-readable staging texture.
//! 3. Per poll: `AcquireNextFrame` (bounded by the capture deadline),
//!    copy to staging, map, memcpy into the frame buffer, unmap.
//!
//! # Safety
//!
//! All unsafe FFI calls are confined to this module. On non-Windows
//! targets the type exists but construction fails at runtime.

use crate::capture::{Captured, FrameSource};
#[cfg(target_os = "windows")]
use crate::config::CAPTURE_POLL;
use crate::error::EngineError;

/// Desktop-duplication frame source for the primary display.
pub struct DxgiSource {
    width: u32,
    height: u32,
    sequence: u64,

    #[cfg(target_os = "windows")]
    state: Option<platform::DxgiState>,
}

impl DxgiSource {
    /// Create an unstarted source. The duplication handle is acquired
    /// by [`start`](FrameSource::start) so a failed accept does not
    /// leave the output locked.
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            sequence: 0,
            #[cfg(target_os = "windows")]
            state: None,
        }
    }
}

impl Default for DxgiSource {
    fn default() -> Self {
        Self::new()
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use crate::capture::Frame;
    use windows::core::Interface;
    use windows::Win32::Graphics::{
        Direct3D::D3D_DRIVER_TYPE_HARDWARE,
        Direct3D11::*,
        Dxgi::{Common::*, *},
    };

    /// Live duplication handles; dropped as a unit on close.
    pub(super) struct DxgiState {
        _device: ID3D11Device,
        context: ID3D11DeviceContext,
        duplication: IDXGIOutputDuplication,
        staging: ID3D11Texture2D,
    }

    impl FrameSource for DxgiSource {
        fn start(&mut self) -> Result<(), EngineError> {
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
                )
                .map_err(|e| EngineError::Capture(format!("D3D11CreateDevice failed: {e}")))?;
            }
            let device =
                device.ok_or_else(|| EngineError::Capture("D3D11 device is None".into()))?;
            let context =
                context.ok_or_else(|| EngineError::Capture("D3D11 context is None".into()))?;

            // Device → adapter → primary output → duplication.
            let dxgi_device: IDXGIDevice = device
                .cast()
                .map_err(|e| EngineError::Capture(format!("cast to IDXGIDevice failed: {e}")))?;
            let adapter = unsafe {
                dxgi_device
                    .GetAdapter()
                    .map_err(|e| EngineError::Capture(format!("GetAdapter failed: {e}")))?
            };
            let output: IDXGIOutput = unsafe {
                adapter
                    .EnumOutputs(0)
                    .map_err(|e| EngineError::Capture(format!("EnumOutputs(0) failed: {e}")))?
            };
            let output1: IDXGIOutput1 = output
                .cast()
                .map_err(|e| EngineError::Capture(format!("cast to IDXGIOutput1 failed: {e}")))?;
            let duplication = unsafe {
                output1
                    .DuplicateOutput(&device)
                    .map_err(|e| EngineError::Capture(format!("DuplicateOutput failed: {e}")))?
            };

            let desc = unsafe { duplication.GetDesc() };
            self.width = desc.ModeDesc.Width;
            self.height = desc.ModeDesc.Height;

            let staging_desc = D3D11_TEXTURE2D_DESC {
                Width: self.width,
                Height: self.height,
                MipLevels: 1,
                ArraySize: 1,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut staging = None;
            unsafe {
                device
                    .CreateTexture2D(&staging_desc, None, Some(&mut staging))
                    .map_err(|e| EngineError::Capture(format!("CreateTexture2D failed: {e}")))?;
            }
            let staging =
                staging.ok_or_else(|| EngineError::Capture("staging texture is None".into()))?;

            self.state = Some(DxgiState {
                _device: device,
                context,
                duplication,
                staging,
            });
            Ok(())
        }

        fn capture(&mut self) -> Result<Captured, EngineError> {
            let state = self
                .state
                .as_ref()
                .ok_or_else(|| EngineError::Capture("capture source not started".into()))?;

            let mut frame_info = DXGI_OUTDUPL_FRAME_INFO::default();
            let mut resource = None;
            match unsafe {
                state.duplication.AcquireNextFrame(
                    CAPTURE_POLL.as_millis() as u32,
                    &mut frame_info,
                    &mut resource,
                )
            } {
                Ok(()) => {}
                Err(e) if e.code() == DXGI_ERROR_WAIT_TIMEOUT => return Ok(Captured::Timeout),
                Err(e) => {
                    return Err(EngineError::Capture(format!("AcquireNextFrame failed: {e}")));
                }
            }

            let resource =
                resource.ok_or_else(|| EngineError::Capture("acquired resource is None".into()))?;
            let texture: ID3D11Texture2D = resource.cast().map_err(|e| {
                let _ = unsafe { state.duplication.ReleaseFrame() };
                EngineError::Capture(format!("cast to ID3D11Texture2D failed: {e}"))
            })?;

            unsafe { state.context.CopyResource(&state.staging, &texture) };
            // Release the desktop texture as early as possible.
            let _ = unsafe { state.duplication.ReleaseFrame() };

            let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
            unsafe {
                state
                    .context
                    .Map(&state.staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped))
                    .map_err(|e| EngineError::Capture(format!("Map failed: {e}")))?;
            }

            let stride = mapped.RowPitch;
            let len = stride as usize * self.height as usize;
            let pixels =
                unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) }.to_vec();
            unsafe { state.context.Unmap(&state.staging, 0) };

            self.sequence += 1;
            Ok(Captured::Frame(Frame {
                width: self.width,
                height: self.height,
                stride,
                pixels,
                sequence: self.sequence,
            }))
        }

        fn size(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        fn close(&mut self) {
            self.state = None;
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl FrameSource for DxgiSource {
    fn start(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Capture(
            "desktop duplication is only available on Windows".into(),
        ))
    }

    fn capture(&mut self) -> Result<Captured, EngineError> {
        Err(EngineError::Capture(
            "desktop duplication is only available on Windows".into(),
        ))
    }

    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unstarted_source_reports_zero_size() {
        let src = DxgiSource::new();
        assert_eq!(src.size(), (0, 0));
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn stub_fails_at_runtime() {
        let mut src = DxgiSource::new();
        assert!(src.start().is_err());
        assert!(src.capture().is_err());
    }
}
