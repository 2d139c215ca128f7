//! Synthetic input injection
//!
//! Events are sent with SendEvent addressed directly at the target window
//! rather than injected at the device level. This needs no privileges and
//! works for most clients, but applications that discard synthetic events
//! (the `send_event` flag) will ignore them.

pub mod keymap;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::backend::{DisplayBackend, KeyEvent, NativeWindow, PointerAction, PointerEvent};

/// Translate a host mouse button to a core protocol button
///
/// Hosts number right as 2 and middle as 3; X swaps those.
pub fn native_button(host_button: u8) -> u8 {
    match host_button {
        2 => 3,
        3 => 2,
        other => other,
    }
}

/// Per-session keyboard state: the modifier mask and keys currently held down
///
/// Held keys are tracked per target window so the same key held on two
/// windows gets released on both.
#[derive(Debug, Default)]
pub struct InputInjector {
    modifiers: u16,
    held: BTreeMap<(NativeWindow, u8), Option<u16>>,
}

impl InputInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modifier mask attached to the next synthesized event
    pub fn modifiers(&self) -> u16 {
        self.modifiers
    }

    /// Number of keys pressed through this injector and not yet released
    pub fn held_keys(&self) -> usize {
        self.held.len()
    }

    /// Press or release a mouse button at window-relative `(x, y)`
    pub fn send_button(
        &self,
        backend: &dyn DisplayBackend,
        window: NativeWindow,
        button: u8,
        pressed: bool,
        x: i32,
        y: i32,
    ) {
        let button = native_button(button);
        let action = if pressed {
            PointerAction::Press(button)
        } else {
            PointerAction::Release(button)
        };
        self.send_pointer(backend, window, action, x, y);
    }

    /// Move the pointer to window-relative `(x, y)`
    pub fn send_motion(&self, backend: &dyn DisplayBackend, window: NativeWindow, x: i32, y: i32) {
        self.send_pointer(backend, window, PointerAction::Motion, x, y);
    }

    fn send_pointer(
        &self,
        backend: &dyn DisplayBackend,
        window: NativeWindow,
        action: PointerAction,
        x: i32,
        y: i32,
    ) {
        // Ask the server: configure data may lag behind the real position
        let (abs_x, abs_y) = match backend.absolute_position(window) {
            Ok(position) => position,
            Err(e) => {
                debug!("Cannot resolve position of window {:#x}: {}", window, e);
                return;
            }
        };

        let event = PointerEvent {
            action,
            x,
            y,
            root_x: abs_x + x,
            root_y: abs_y + y,
            state: self.modifiers,
        };

        debug!(
            "Pointer {:?} to window {:#x} at ({}, {}) root ({}, {})",
            action, window, x, y, event.root_x, event.root_y
        );

        if let Err(e) = backend.send_pointer(window, event) {
            debug!("Failed to send pointer event: {}", e);
        }
    }

    /// Press or release a key given as a host virtual key code
    ///
    /// Codes the layout cannot resolve are dropped with a warning and leave the
    /// modifier state untouched.
    pub fn send_key(
        &mut self,
        backend: &dyn DisplayBackend,
        window: NativeWindow,
        virtual_code: u32,
        pressed: bool,
    ) {
        let keysym = keymap::keysym_for(virtual_code);
        let Some(keycode) = backend.keysym_to_keycode(keysym) else {
            warn!(
                "Cannot map virtual key {:#x} (keysym {:#x}) to a keycode",
                virtual_code, keysym
            );
            return;
        };

        // The state field carries the modifiers in effect before this event
        let event = KeyEvent {
            keycode,
            pressed,
            state: self.modifiers,
        };
        if let Err(e) = backend.send_key(window, event) {
            debug!("Failed to send key event: {}", e);
        }

        let modifier = keymap::modifier_for(virtual_code);
        if let Some(bit) = modifier {
            if pressed {
                self.modifiers |= bit;
            } else {
                self.modifiers &= !bit;
            }
        }

        if pressed {
            self.held.insert((window, keycode), modifier);
        } else {
            self.held.remove(&(window, keycode));
        }
    }

    /// Release every key still held and clear the modifier mask
    ///
    /// Without a backend (session gone) only the local state is reset.
    pub fn release_all(&mut self, backend: Option<&dyn DisplayBackend>) {
        let held = std::mem::take(&mut self.held);

        if let Some(backend) = backend {
            // Ordinary keys first so they still see the modifiers they were pressed with
            let (modifiers, others): (Vec<_>, Vec<_>) =
                held.into_iter().partition(|(_, modifier)| modifier.is_some());

            for ((window, keycode), modifier) in others.into_iter().chain(modifiers) {
                let event = KeyEvent {
                    keycode,
                    pressed: false,
                    state: self.modifiers,
                };
                if let Err(e) = backend.send_key(window, event) {
                    debug!("Failed to release keycode {}: {}", keycode, e);
                }
                if let Some(bit) = modifier {
                    self.modifiers &= !bit;
                }
            }
        }

        self.modifiers = 0;
    }
}
