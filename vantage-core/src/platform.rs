//! Process-wide platform state.
//!
//! DPI awareness must be declared before the first capture or
//! injector call: coordinate mapping assumes the real pixel grid, and
//! a DPI-virtualised process would see scaled dimensions instead.

/// Declare the process per-monitor DPI-aware.
///
/// Call once at startup, before any [`crate::capture::FrameSource`]
/// or [`crate::input::InputInjector`] use. Safe to call on platforms
/// without a DPI concept (no-op). Best-effort: a manifest or an
/// earlier caller may already have fixed the awareness level, in
/// which case the OS refuses the change and we keep whatever is set.
pub fn declare_dpi_awareness() {
    #[cfg(target_os = "windows")]
    {
        use windows::Win32::UI::HiDpi::{
            SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
        };
        unsafe {
            let _ = SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2);
        }
    }
}
