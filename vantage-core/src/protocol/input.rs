//! Input event wire format (Viewer → Host).
//!
//! # Wire format
//!
//! ```text
//! off 0  u8  device     {0=mouse, 1=keyboard}
//! off 1  u8  action     {0=move,1=down,2=up,3=wheel,4=text}
//! off 2  u8  flags      (mouse: button mask bit0=left bit1=right bit2=middle;
//!                        keyboard: bit0=extended-key)
//! off 3  u8  reserved   (must be 0)
//! off 4  u16 x          normalised absolute 0..65535
//! off 6  u16 y          normalised absolute 0..65535
//! off 8  i16 wheel      120 units ≈ one notch
//! off 10 u16 key        virtual-key code
//! off 12 u16 text_len   bytes of UTF-8 to follow (≤ 256)
//! ```
//!
//! All fields little-endian. `text_len > 0` iff `action = text`; every
//! other event is exactly the 14 header bytes.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::EngineError;

/// Fixed header length in bytes.
pub const INPUT_HEADER_LEN: usize = 14;

/// Maximum UTF-8 text payload per event.
pub const MAX_TEXT_LEN: usize = 256;

/// Mouse button mask: left button.
pub const BUTTON_LEFT: u8 = 0b001;
/// Mouse button mask: right button.
pub const BUTTON_RIGHT: u8 = 0b010;
/// Mouse button mask: middle button.
pub const BUTTON_MIDDLE: u8 = 0b100;

/// Keyboard flag: the virtual key is an extended key.
pub const FLAG_EXTENDED_KEY: u8 = 0b001;

// ── InputDevice ──────────────────────────────────────────────────

/// Source device of an input event.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputDevice {
    Mouse = 0,
    Keyboard = 1,
}

impl TryFrom<u8> for InputDevice {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InputDevice::Mouse),
            1 => Ok(InputDevice::Keyboard),
            _ => Err(EngineError::UnknownVariant {
                type_name: "InputDevice",
                value: value as u64,
            }),
        }
    }
}

// ── InputAction ──────────────────────────────────────────────────

/// What the device did.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputAction {
    Move = 0,
    Down = 1,
    Up = 2,
    Wheel = 3,
    Text = 4,
}

impl TryFrom<u8> for InputAction {
    type Error = EngineError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InputAction::Move),
            1 => Ok(InputAction::Down),
            2 => Ok(InputAction::Up),
            3 => Ok(InputAction::Wheel),
            4 => Ok(InputAction::Text),
            _ => Err(EngineError::UnknownVariant {
                type_name: "InputAction",
                value: value as u64,
            }),
        }
    }
}

// ── InputEvent ───────────────────────────────────────────────────

/// A single decoded input event.
///
/// Coordinates are normalised to the 0..65535 domain; the injector
/// maps them onto the primary display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputEvent {
    pub device: InputDevice,
    pub action: InputAction,
    pub flags: u8,
    pub x: u16,
    pub y: u16,
    pub wheel: i16,
    pub key: u16,
    pub text: String,
}

impl InputEvent {
    /// Absolute pointer move.
    pub fn mouse_move(x: u16, y: u16) -> Self {
        Self {
            device: InputDevice::Mouse,
            action: InputAction::Move,
            flags: 0,
            x,
            y,
            wheel: 0,
            key: 0,
            text: String::new(),
        }
    }

    /// Button press (`buttons` is a [`BUTTON_LEFT`]-style mask) at a position.
    pub fn mouse_down(buttons: u8, x: u16, y: u16) -> Self {
        Self {
            action: InputAction::Down,
            flags: buttons,
            ..Self::mouse_move(x, y)
        }
    }

    /// Button release at a position.
    pub fn mouse_up(buttons: u8, x: u16, y: u16) -> Self {
        Self {
            action: InputAction::Up,
            flags: buttons,
            ..Self::mouse_move(x, y)
        }
    }

    /// Wheel rotation; 120 units per notch, negative = towards the user.
    pub fn mouse_wheel(delta: i16, x: u16, y: u16) -> Self {
        Self {
            action: InputAction::Wheel,
            wheel: delta,
            ..Self::mouse_move(x, y)
        }
    }

    /// Physical key transition carrying a virtual-key code.
    pub fn key(vk: u16, down: bool, extended: bool) -> Self {
        Self {
            device: InputDevice::Keyboard,
            action: if down { InputAction::Down } else { InputAction::Up },
            flags: if extended { FLAG_EXTENDED_KEY } else { 0 },
            x: 0,
            y: 0,
            wheel: 0,
            key: vk,
            text: String::new(),
        }
    }

    /// Composed text to be replayed as Unicode key taps.
    ///
    /// Fails if the UTF-8 encoding exceeds [`MAX_TEXT_LEN`] bytes.
    pub fn text(text: impl Into<String>) -> Result<Self, EngineError> {
        let text = text.into();
        if text.len() > MAX_TEXT_LEN {
            return Err(EngineError::ProtocolViolation("input text too long"));
        }
        Ok(Self {
            device: InputDevice::Keyboard,
            action: InputAction::Text,
            flags: 0,
            x: 0,
            y: 0,
            wheel: 0,
            key: 0,
            text,
        })
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Result<Vec<u8>, EngineError> {
        let text_bytes = self.text.as_bytes();
        if text_bytes.len() > MAX_TEXT_LEN {
            return Err(EngineError::ProtocolViolation("input text too long"));
        }
        if (self.action == InputAction::Text) != !text_bytes.is_empty() {
            return Err(EngineError::ProtocolViolation(
                "text payload allowed only on text events",
            ));
        }

        let mut buf = Vec::with_capacity(INPUT_HEADER_LEN + text_bytes.len());
        buf.push(self.device as u8);
        buf.push(self.action as u8);
        buf.push(self.flags);
        buf.push(0); // reserved
        buf.extend_from_slice(&self.x.to_le_bytes());
        buf.extend_from_slice(&self.y.to_le_bytes());
        buf.extend_from_slice(&self.wheel.to_le_bytes());
        buf.extend_from_slice(&self.key.to_le_bytes());
        buf.extend_from_slice(&(text_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(text_bytes);
        Ok(buf)
    }

    /// Parse a complete event (header plus text) from `data`.
    pub fn decode(data: &[u8]) -> Result<Self, EngineError> {
        if data.len() < INPUT_HEADER_LEN {
            return Err(EngineError::ProtocolViolation("input event truncated"));
        }

        let device = InputDevice::try_from(data[0])?;
        let action = InputAction::try_from(data[1])?;
        let flags = data[2];
        let x = u16::from_le_bytes([data[4], data[5]]);
        let y = u16::from_le_bytes([data[6], data[7]]);
        let wheel = i16::from_le_bytes([data[8], data[9]]);
        let key = u16::from_le_bytes([data[10], data[11]]);
        let text_len = u16::from_le_bytes([data[12], data[13]]) as usize;

        if text_len > MAX_TEXT_LEN {
            return Err(EngineError::ProtocolViolation("input text too long"));
        }
        if (text_len > 0) != (action == InputAction::Text) {
            return Err(EngineError::ProtocolViolation(
                "text payload allowed only on text events",
            ));
        }
        if data.len() != INPUT_HEADER_LEN + text_len {
            return Err(EngineError::ProtocolViolation("input event length mismatch"));
        }

        let text = if text_len > 0 {
            String::from_utf8(data[INPUT_HEADER_LEN..].to_vec())?
        } else {
            String::new()
        };

        Ok(Self {
            device,
            action,
            flags,
            x,
            y,
            wheel,
            key,
            text,
        })
    }

    /// Read one event from a byte stream: fixed header first, then the
    /// text payload when the header announces one.
    ///
    /// Short reads and oversized `text_len` are fatal for the calling
    /// session.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, EngineError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; INPUT_HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let text_len = u16::from_le_bytes([header[12], header[13]]) as usize;
        if text_len > MAX_TEXT_LEN {
            return Err(EngineError::ProtocolViolation("input text too long"));
        }

        if text_len == 0 {
            return Self::decode(&header);
        }

        let mut buf = Vec::with_capacity(INPUT_HEADER_LEN + text_len);
        buf.extend_from_slice(&header);
        buf.resize(INPUT_HEADER_LEN + text_len, 0);
        reader.read_exact(&mut buf[INPUT_HEADER_LEN..]).await?;
        Self::decode(&buf)
    }
}
