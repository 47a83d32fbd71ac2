//! Input return channel: wire events → injector calls.
//!
//! Reads 14-byte event headers (plus optional text) off the video
//! socket's reverse direction and replays them:
//!
//! - mouse events move first, then emit one press/release per set
//!   button bit, in bit order;
//! - text events become Unicode key taps per code point;
//! - physical key events go through scancode translation, where a
//!   zero mapping means "ignore".
//!
//! Malformed events are fatal for the session; a finished session
//! always releases the modifier keys.

use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::EngineError;
use crate::input::{InputInjector, MouseButton};
use crate::protocol::input::{
    InputAction, InputDevice, InputEvent, BUTTON_LEFT, BUTTON_MIDDLE, BUTTON_RIGHT,
    FLAG_EXTENDED_KEY,
};

/// Parses inbound input frames and drives an [`InputInjector`].
pub struct InputReceiver<I: InputInjector> {
    injector: I,
}

impl<I: InputInjector> InputReceiver<I> {
    pub fn new(injector: I) -> Self {
        Self { injector }
    }

    /// Consume events until the stream errors, the peer disconnects or
    /// the session stop signal fires. Always resets modifiers on the
    /// way out.
    pub async fn run<R>(&mut self, mut reader: R, stop: CancellationToken) -> Result<(), EngineError>
    where
        R: AsyncRead + Unpin,
    {
        let result = loop {
            let event = tokio::select! {
                biased;
                _ = stop.cancelled() => break Ok(()),
                event = InputEvent::read_from(&mut reader) => event,
            };

            match event {
                Ok(event) => self.apply(&event),
                Err(e) => break Err(e),
            }
        };

        self.injector.reset();
        result
    }

    /// Replay one decoded event. Injection failures are logged and
    /// swallowed; a busy desktop must not kill the stream.
    pub fn apply(&mut self, event: &InputEvent) {
        let outcome = match event.device {
            InputDevice::Mouse => self.apply_mouse(event),
            InputDevice::Keyboard => self.apply_keyboard(event),
        };
        if let Err(e) = outcome {
            debug!(error = %e, "input injection failed");
        }
    }

    fn apply_mouse(&mut self, event: &InputEvent) -> Result<(), EngineError> {
        // Position first, so presses land where the Viewer aimed.
        self.injector.move_mouse(event.x, event.y)?;

        match event.action {
            InputAction::Move => Ok(()),
            InputAction::Down | InputAction::Up => {
                let down = event.action == InputAction::Down;
                for (bit, button) in [
                    (BUTTON_LEFT, MouseButton::Left),
                    (BUTTON_RIGHT, MouseButton::Right),
                    (BUTTON_MIDDLE, MouseButton::Middle),
                ] {
                    if event.flags & bit != 0 {
                        self.injector.mouse_button(button, down)?;
                    }
                }
                Ok(())
            }
            InputAction::Wheel => self.injector.mouse_wheel(event.wheel),
            InputAction::Text => Ok(()), // meaningless on a mouse; drop
        }
    }

    fn apply_keyboard(&mut self, event: &InputEvent) -> Result<(), EngineError> {
        match event.action {
            InputAction::Text => {
                for ch in event.text.chars() {
                    self.injector.key_unicode(ch)?;
                }
                Ok(())
            }
            InputAction::Down => {
                self.injector
                    .key_scancode(event.key, false, event.flags & FLAG_EXTENDED_KEY != 0)
            }
            InputAction::Up => {
                self.injector
                    .key_scancode(event.key, true, event.flags & FLAG_EXTENDED_KEY != 0)
            }
            InputAction::Move | InputAction::Wheel => Ok(()), // not keyboard verbs; drop
        }
    }

    /// Hand the injector back (tests inspect recorded calls).
    pub fn into_inner(self) -> I {
        self.injector
    }
}
