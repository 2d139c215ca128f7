//! In-memory display backend for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ByteOrder, Capabilities, DamageHandle, DisplayBackend, Extension, KeyEvent, NativeWindow,
    PointerEvent, RawImage, SessionEvent, WindowAttributes, WindowMetadata,
};

pub const ROOT: NativeWindow = 1;

#[derive(Debug, Clone, Default)]
pub struct FakeWindow {
    pub attributes: WindowAttributes,
    pub metadata: WindowMetadata,
    pub image: Option<RawImage>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub capabilities: Capabilities,
    pub windows: HashMap<NativeWindow, FakeWindow>,
    pub stacking: Vec<NativeWindow>,
    pub events: VecDeque<SessionEvent>,
    pub next_damage: DamageHandle,
    pub live_damage: HashMap<DamageHandle, NativeWindow>,
    pub acknowledged: Vec<DamageHandle>,
    pub watched: Vec<NativeWindow>,
    pub pixel_reads: HashMap<NativeWindow, usize>,
    pub pointer_events: Vec<(NativeWindow, PointerEvent)>,
    pub key_events: Vec<(NativeWindow, KeyEvent)>,
    pub keymap: HashMap<u32, u8>,
    pub focused: Vec<NativeWindow>,
    pub shut_down: bool,
}

/// Cloneable handle; clones share state so tests can inspect after handing
/// one clone to the compositor
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
}

pub fn full_capabilities() -> Capabilities {
    Capabilities {
        composite: Some(Extension {
            event_base: 0,
            major: 0,
            minor: 4,
        }),
        damage: Some(Extension {
            event_base: 91,
            major: 1,
            minor: 1,
        }),
    }
}

/// 32bpp LSB-first image where every pixel is the given B, G, R bytes
pub fn solid_image(width: u32, height: u32, bgr: [u8; 3]) -> RawImage {
    let stride = width as usize * 4;
    let mut data = Vec::with_capacity(stride * height as usize);
    for _ in 0..(width * height) {
        data.extend_from_slice(&[bgr[0], bgr[1], bgr[2], 0]);
    }
    RawImage {
        width,
        height,
        depth: 24,
        bits_per_pixel: 32,
        stride,
        byte_order: ByteOrder::LsbFirst,
        data,
    }
}

pub fn viewable(x: i32, y: i32, width: u32, height: u32) -> WindowAttributes {
    WindowAttributes {
        x,
        y,
        width,
        height,
        input_only: false,
        viewable: true,
        managed: false,
    }
}

impl FakeBackend {
    pub fn new(capabilities: Capabilities) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state();
            state.capabilities = capabilities;
            state.next_damage = 1000;
            // Plain ASCII keysyms resolve to a keycode derived from the keysym
            for keysym in 0x20..0x7f_u32 {
                state.keymap.insert(keysym, (keysym - 0x20 + 10) as u8);
            }
            for (keysym, keycode) in [
                (0xff0d, 36),
                (0xff08, 22),
                (0xff1b, 9),
                (0xff09, 23),
                (0xffe1, 50),
                (0xffe3, 37),
                (0xffe9, 64),
                (0xffe7, 133),
                (0xff51, 113),
                (0xffbe, 67),
            ] {
                state.keymap.insert(keysym, keycode);
            }
        }
        backend
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Add a window that exists before the registry scans
    pub fn add_window(
        &self,
        native: NativeWindow,
        attributes: WindowAttributes,
        metadata: WindowMetadata,
    ) {
        let mut state = self.state();
        let image = solid_image(attributes.width, attributes.height, [10, 20, 30]);
        state.windows.insert(
            native,
            FakeWindow {
                attributes,
                metadata,
                image: Some(image),
            },
        );
        state.stacking.push(native);
    }

    pub fn push_event(&self, event: SessionEvent) {
        self.state().events.push_back(event);
    }

    pub fn set_image(&self, native: NativeWindow, image: Option<RawImage>) {
        if let Some(window) = self.state().windows.get_mut(&native) {
            window.image = image;
        }
    }

    pub fn set_geometry(&self, native: NativeWindow, x: i32, y: i32, width: u32, height: u32) {
        if let Some(window) = self.state().windows.get_mut(&native) {
            window.attributes.x = x;
            window.attributes.y = y;
            window.attributes.width = width;
            window.attributes.height = height;
        }
    }

    /// Remove the window on the server side without emitting an event
    pub fn vanish(&self, native: NativeWindow) {
        let mut state = self.state();
        state.windows.remove(&native);
        state.stacking.retain(|w| *w != native);
    }

    pub fn pixel_reads(&self, native: NativeWindow) -> usize {
        self.state().pixel_reads.get(&native).copied().unwrap_or(0)
    }

    pub fn damage_for(&self, native: NativeWindow) -> Option<DamageHandle> {
        self.state()
            .live_damage
            .iter()
            .find(|(_, w)| **w == native)
            .map(|(d, _)| *d)
    }

    pub fn key_events(&self) -> Vec<(NativeWindow, KeyEvent)> {
        self.state().key_events.clone()
    }

    pub fn pointer_events(&self) -> Vec<(NativeWindow, PointerEvent)> {
        self.state().pointer_events.clone()
    }
}

impl DisplayBackend for FakeBackend {
    fn capabilities(&self) -> Capabilities {
        self.state().capabilities
    }

    fn root(&self) -> NativeWindow {
        ROOT
    }

    fn poll_event(&self) -> anyhow::Result<Option<SessionEvent>> {
        Ok(self.state().events.pop_front())
    }

    fn top_level_windows(&self) -> anyhow::Result<Vec<NativeWindow>> {
        Ok(self.state().stacking.clone())
    }

    fn window_attributes(&self, window: NativeWindow) -> anyhow::Result<WindowAttributes> {
        self.state()
            .windows
            .get(&window)
            .map(|w| w.attributes)
            .ok_or_else(|| anyhow::anyhow!("BadWindow {}", window))
    }

    fn window_metadata(&self, window: NativeWindow) -> WindowMetadata {
        self.state()
            .windows
            .get(&window)
            .map(|w| w.metadata.clone())
            .unwrap_or_default()
    }

    fn watch_window(&self, window: NativeWindow) -> anyhow::Result<Option<DamageHandle>> {
        let mut state = self.state();
        state.watched.push(window);
        if state.capabilities.damage.is_none() {
            return Ok(None);
        }
        let damage = state.next_damage;
        state.next_damage += 1;
        state.live_damage.insert(damage, window);
        Ok(Some(damage))
    }

    fn unwatch_window(&self, damage: DamageHandle) {
        self.state().live_damage.remove(&damage);
    }

    fn acknowledge_damage(&self, damage: DamageHandle) {
        self.state().acknowledged.push(damage);
    }

    fn read_pixels(
        &self,
        window: NativeWindow,
        width: u32,
        height: u32,
    ) -> anyhow::Result<RawImage> {
        let mut state = self.state();
        *state.pixel_reads.entry(window).or_default() += 1;
        let image = state
            .windows
            .get(&window)
            .and_then(|w| w.image.clone())
            .ok_or_else(|| anyhow::anyhow!("BadMatch for window {}", window))?;
        anyhow::ensure!(
            image.width == width && image.height == height,
            "image is {}x{}, asked for {}x{}",
            image.width,
            image.height,
            width,
            height
        );
        Ok(image)
    }

    fn absolute_position(&self, window: NativeWindow) -> anyhow::Result<(i32, i32)> {
        self.state()
            .windows
            .get(&window)
            .map(|w| (w.attributes.x, w.attributes.y))
            .ok_or_else(|| anyhow::anyhow!("BadWindow {}", window))
    }

    fn send_pointer(&self, window: NativeWindow, event: PointerEvent) -> anyhow::Result<()> {
        self.state().pointer_events.push((window, event));
        Ok(())
    }

    fn send_key(&self, window: NativeWindow, event: KeyEvent) -> anyhow::Result<()> {
        self.state().key_events.push((window, event));
        Ok(())
    }

    fn keysym_to_keycode(&self, keysym: u32) -> Option<u8> {
        self.state().keymap.get(&keysym).copied()
    }

    fn focus_window(&self, window: NativeWindow) -> anyhow::Result<()> {
        let mut state = self.state();
        state.focused.push(window);
        state.stacking.retain(|w| *w != window);
        state.stacking.push(window);
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn shutdown(&self) {
        self.state().shut_down = true;
    }
}
