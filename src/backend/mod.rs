//! Display backend abstraction
//!
//! This module defines the seam between the mirroring core and the windowing
//! protocol. The registry, capture pipeline and input injector only talk to a
//! [`DisplayBackend`], which keeps them testable without a running X server.

mod x11;

#[cfg(test)]
pub(crate) mod fake;

pub use x11::{X11Backend, display_is_live};

/// Native window handle as used by the session
pub type NativeWindow = u32;

/// Change-tracking handle allocated per window when Damage is available
pub type DamageHandle = u32;

/// Version and event base of an optional protocol extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extension {
    /// First event code assigned to this extension by the server
    pub event_base: u8,
    pub major: u32,
    pub minor: u32,
}

/// Optional capabilities discovered after connecting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Off-screen buffer compositing (Composite)
    pub composite: Option<Extension>,
    /// Change-region notification (Damage)
    pub damage: Option<Extension>,
}

impl Capabilities {
    pub fn compositing(&self) -> bool {
        self.composite.is_some()
    }

    pub fn change_notification(&self) -> bool {
        self.damage.is_some()
    }
}

/// Attributes needed by the tracking filter and for initial geometry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowAttributes {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// InputOnly windows have no pixels
    pub input_only: bool,
    /// Map state is viewable
    pub viewable: bool,
    /// Window carries a WM_STATE property
    pub managed: bool,
}

/// Static metadata read once when a window is first tracked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowMetadata {
    pub title: String,
    pub class: String,
    pub pid: Option<u32>,
    /// Native handle named by WM_TRANSIENT_FOR
    pub transient_for: Option<NativeWindow>,
}

/// Structural and damage notifications translated from the protocol stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Created(NativeWindow),
    Destroyed(NativeWindow),
    Mapped(NativeWindow),
    Unmapped(NativeWindow),
    Configured {
        window: NativeWindow,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
    Damaged {
        drawable: NativeWindow,
        damage: DamageHandle,
    },
}

/// Byte order of pixel data returned by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LsbFirst,
    MsbFirst,
}

/// Pixel rectangle read from a window's off-screen buffer, in server format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bits_per_pixel: u8,
    /// Bytes per row including scanline padding
    pub stride: usize,
    pub byte_order: ByteOrder,
    pub data: Vec<u8>,
}

/// Kind of synthetic pointer event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAction {
    Press(u8),
    Release(u8),
    Motion,
}

/// Synthetic pointer event addressed at a specific window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerEvent {
    pub action: PointerAction,
    /// Window-relative coordinates
    pub x: i32,
    pub y: i32,
    /// Root-relative coordinates
    pub root_x: i32,
    pub root_y: i32,
    /// Modifier mask
    pub state: u16,
}

/// Synthetic key event addressed at a specific window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub keycode: u8,
    pub pressed: bool,
    pub state: u16,
}

/// Operations the core needs from a connected display session
///
/// Methods returning `anyhow::Result` may fail when the window vanished or the
/// connection broke; callers absorb those failures.
pub trait DisplayBackend: Send {
    /// Capabilities recorded by the extension probe
    fn capabilities(&self) -> Capabilities;

    /// Root window of the default screen
    fn root(&self) -> NativeWindow;

    /// Next already-queued notification, never blocking
    fn poll_event(&self) -> anyhow::Result<Option<SessionEvent>>;

    /// Current children of the root window, bottom to top
    fn top_level_windows(&self) -> anyhow::Result<Vec<NativeWindow>>;

    fn window_attributes(&self, window: NativeWindow) -> anyhow::Result<WindowAttributes>;

    fn window_metadata(&self, window: NativeWindow) -> WindowMetadata;

    /// Subscribe to structure notifications and allocate a damage handle if supported
    fn watch_window(&self, window: NativeWindow) -> anyhow::Result<Option<DamageHandle>>;

    /// Destroy a damage handle, tolerating an already destroyed window
    fn unwatch_window(&self, damage: DamageHandle);

    /// Clear the accumulated damage so further notifications are delivered
    fn acknowledge_damage(&self, damage: DamageHandle);

    /// Read the full off-screen pixel rectangle of a window
    fn read_pixels(
        &self,
        window: NativeWindow,
        width: u32,
        height: u32,
    ) -> anyhow::Result<RawImage>;

    /// Absolute position of the window's origin on the root window
    fn absolute_position(&self, window: NativeWindow) -> anyhow::Result<(i32, i32)>;

    fn send_pointer(&self, window: NativeWindow, event: PointerEvent) -> anyhow::Result<()>;

    fn send_key(&self, window: NativeWindow, event: KeyEvent) -> anyhow::Result<()>;

    /// Resolve a keysym to a keycode in the current layout
    fn keysym_to_keycode(&self, keysym: u32) -> Option<u8>;

    /// Give the window input focus and raise it
    fn focus_window(&self, window: NativeWindow) -> anyhow::Result<()>;

    fn flush(&self) -> anyhow::Result<()>;

    /// Undo session-wide setup such as root redirection
    fn shutdown(&self);
}

/// Connect to a display and run the extension probe
pub fn connect(name: &str) -> anyhow::Result<Box<dyn DisplayBackend>> {
    tracing::info!("Connecting X11 backend (DISPLAY={})", name);
    Ok(Box::new(X11Backend::connect(name)?))
}

/// Display string for a display number, e.g. `:3`
pub fn display_name(display: u32) -> String {
    format!(":{}", display)
}
