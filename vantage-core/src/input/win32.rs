//! Win32 `SendInput` injector backend.
//!
//! Replays Viewer events into the OS input stream. Requires the
//! process to run in the interactive desktop session. Normalised
//! coordinates are passed straight to `MOUSEEVENTF_ABSOLUTE`, whose
//! native domain is the same 0..65535 grid as the wire protocol.
//!
//! # Safety
//!
//! All unsafe FFI calls are confined to this module. On non-Windows
//! targets the type exists but every method fails at runtime.

use crate::error::EngineError;
use crate::input::{InputInjector, MouseButton};

/// Virtual keys released by [`InputInjector::reset`]: SHIFT, CTRL,
/// ALT, LWIN, RWIN.
const MODIFIER_VKS: [u16; 5] = [0x10, 0x11, 0x12, 0x5B, 0x5C];

/// `SendInput`-backed injector.
pub struct SendInputInjector {
    _priv: (),
}

impl SendInputInjector {
    /// Create an injector; fails on platforms without `SendInput`.
    pub fn new() -> Result<Self, EngineError> {
        #[cfg(target_os = "windows")]
        {
            Ok(Self { _priv: () })
        }
        #[cfg(not(target_os = "windows"))]
        {
            Err(EngineError::Inject(
                "synthetic input is only available on Windows".into(),
            ))
        }
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;

    fn send(input: INPUT) -> Result<(), EngineError> {
        let sent = unsafe { SendInput(&[input], std::mem::size_of::<INPUT>() as i32) };
        if sent == 0 {
            return Err(EngineError::Inject("SendInput returned 0".into()));
        }
        Ok(())
    }

    fn mouse_input(dx: i32, dy: i32, data: u32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn key_input(vk: u16, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn vk_to_scancode(vk: u16) -> u16 {
        unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) as u16 }
    }

    impl InputInjector for SendInputInjector {
        fn move_mouse(&mut self, nx: u16, ny: u16) -> Result<(), EngineError> {
            send(mouse_input(
                nx as i32,
                ny as i32,
                0,
                MOUSEEVENTF_MOVE | MOUSEEVENTF_ABSOLUTE,
            ))
        }

        fn mouse_button(&mut self, button: MouseButton, down: bool) -> Result<(), EngineError> {
            let flags = match (button, down) {
                (MouseButton::Left, true) => MOUSEEVENTF_LEFTDOWN,
                (MouseButton::Left, false) => MOUSEEVENTF_LEFTUP,
                (MouseButton::Right, true) => MOUSEEVENTF_RIGHTDOWN,
                (MouseButton::Right, false) => MOUSEEVENTF_RIGHTUP,
                (MouseButton::Middle, true) => MOUSEEVENTF_MIDDLEDOWN,
                (MouseButton::Middle, false) => MOUSEEVENTF_MIDDLEUP,
            };
            send(mouse_input(0, 0, 0, flags))
        }

        fn mouse_wheel(&mut self, delta: i16) -> Result<(), EngineError> {
            send(mouse_input(0, 0, delta as u16 as u32, MOUSEEVENTF_WHEEL))
        }

        fn key_scancode(&mut self, vk: u16, up: bool, extended: bool) -> Result<(), EngineError> {
            let scan = vk_to_scancode(vk);
            if scan == 0 {
                // No physical mapping on this layout; drop silently.
                return Ok(());
            }

            let mut flags = KEYEVENTF_SCANCODE;
            if up {
                flags |= KEYEVENTF_KEYUP;
            }
            if extended {
                flags |= KEYEVENTF_EXTENDEDKEY;
            }
            send(key_input(0, scan, flags))
        }

        fn key_unicode(&mut self, ch: char) -> Result<(), EngineError> {
            // UTF-16 units, down then up each; surrogate pairs arrive
            // as two taps, which is how `KEYEVENTF_UNICODE` expects them.
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                send(key_input(0, *unit, KEYEVENTF_UNICODE))?;
                send(key_input(0, *unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP))?;
            }
            Ok(())
        }

        fn reset(&mut self) {
            for vk in MODIFIER_VKS {
                let scan = vk_to_scancode(vk);
                if scan == 0 {
                    continue;
                }
                let _ = send(key_input(
                    0,
                    scan,
                    KEYEVENTF_SCANCODE | KEYEVENTF_KEYUP,
                ));
            }
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
impl InputInjector for SendInputInjector {
    fn move_mouse(&mut self, _nx: u16, _ny: u16) -> Result<(), EngineError> {
        Err(EngineError::Inject("not supported on this platform".into()))
    }

    fn mouse_button(&mut self, _button: MouseButton, _down: bool) -> Result<(), EngineError> {
        Err(EngineError::Inject("not supported on this platform".into()))
    }

    fn mouse_wheel(&mut self, _delta: i16) -> Result<(), EngineError> {
        Err(EngineError::Inject("not supported on this platform".into()))
    }

    fn key_scancode(&mut self, _vk: u16, _up: bool, _extended: bool) -> Result<(), EngineError> {
        Err(EngineError::Inject("not supported on this platform".into()))
    }

    fn key_unicode(&mut self, _ch: char) -> Result<(), EngineError> {
        Err(EngineError::Inject("not supported on this platform".into()))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn stub_fails_at_construction() {
        assert!(SendInputInjector::new().is_err());
    }

    #[test]
    fn modifier_list_covers_both_meta_keys() {
        assert!(MODIFIER_VKS.contains(&0x5B));
        assert!(MODIFIER_VKS.contains(&0x5C));
    }
}
