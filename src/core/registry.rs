//! Window Registry - tracks mirrored windows and their stable ids
//!
//! Ids (1, 2, ...) are assigned when a window is first seen and are never
//! reused. The registry is the only owner of [`TrackedWindow`] records; the
//! forward (id -> window) and reverse (native handle -> id) maps are only
//! touched together inside [`WindowRegistry::add`] and [`WindowRegistry::remove`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::backend::{DamageHandle, DisplayBackend, NativeWindow, SessionEvent};

/// Stable id handed to the host
pub type WindowId = u32;

/// Geometry of a window as last reported by the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Snapshot of a captured window buffer (RGBA8, row-major, no padding)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A window the registry decided to mirror
#[derive(Debug, Clone)]
pub struct TrackedWindow {
    /// Stable id (never reused)
    pub id: WindowId,
    /// Session window handle
    pub native: NativeWindow,
    /// Geometry from creation or the last configure notification
    pub geometry: Geometry,
    /// Damage handle, present only when change notification is supported
    pub damage: Option<DamageHandle>,
    pub mapped: bool,
    /// Cached buffer is stale
    pub dirty: bool,
    /// Last captured RGBA buffer matching `geometry`
    pub frame: Option<Vec<u8>>,
    /// Window class/app name
    pub class: String,
    /// Window title
    pub title: String,
    pub pid: Option<u32>,
    /// Tracked window this one is transient for, as resolved at discovery
    pub parent: Option<WindowId>,
    format_warned: bool,
}

/// Registry of mirrored windows
pub struct WindowRegistry {
    /// Map from id to window
    windows: BTreeMap<WindowId, TrackedWindow>,
    /// Map from native handle to id (for quick lookup)
    native_to_id: HashMap<NativeWindow, WindowId>,
    /// Next id to assign
    next_id: WindowId,
    /// Windows narrower or shorter than this are ignored
    min_size: u32,
}

impl WindowRegistry {
    /// Create a new empty registry
    pub fn new(min_size: u32) -> Self {
        Self {
            windows: BTreeMap::new(),
            native_to_id: HashMap::new(),
            next_id: 1,
            min_size,
        }
    }

    /// Ids of all tracked windows in ascending order
    pub fn ids(&self) -> Vec<WindowId> {
        self.windows.keys().copied().collect()
    }

    pub fn get(&self, id: WindowId) -> Option<&TrackedWindow> {
        self.windows.get(&id)
    }

    pub fn id_for(&self, native: NativeWindow) -> Option<WindowId> {
        self.native_to_id.get(&native).copied()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Parent id, or `None` when there is none or the parent has since been destroyed
    pub fn parent_of(&self, id: WindowId) -> Option<WindowId> {
        self.windows
            .get(&id)
            .and_then(|w| w.parent)
            .filter(|parent| self.windows.contains_key(parent))
    }

    /// Tracking filter: skip InputOnly and tiny windows, accept managed or viewable ones
    pub fn should_track(&self, backend: &dyn DisplayBackend, native: NativeWindow) -> bool {
        let Ok(attrs) = backend.window_attributes(native) else {
            return false;
        };

        if attrs.input_only {
            return false;
        }

        // Popup menus can be small, so the threshold stays low
        if attrs.width < self.min_size || attrs.height < self.min_size {
            return false;
        }

        attrs.managed || attrs.viewable
    }

    /// Apply the tracking filter to every current child of the root window
    pub fn scan_existing(&mut self, backend: &dyn DisplayBackend) {
        let children = match backend.top_level_windows() {
            Ok(children) => children,
            Err(e) => {
                tracing::warn!("Failed to query existing windows: {}", e);
                return;
            }
        };

        for native in children {
            if self.should_track(backend, native) {
                self.add(backend, native);
            }
        }

        info!("Tracking {} windows after initial scan", self.len());
    }

    /// Start tracking a window, returning its id (existing id if already tracked)
    pub fn add(&mut self, backend: &dyn DisplayBackend, native: NativeWindow) -> Option<WindowId> {
        if let Some(id) = self.id_for(native) {
            return Some(id);
        }

        let attrs = backend.window_attributes(native).ok()?;
        let metadata = backend.window_metadata(native);

        let parent = metadata
            .transient_for
            .and_then(|transient| self.id_for(transient));

        let damage = match backend.watch_window(native) {
            Ok(damage) => damage,
            Err(e) => {
                debug!("Failed to watch window {:#x}: {}", native, e);
                None
            }
        };

        let id = self.next_id;
        self.next_id += 1;

        let window = TrackedWindow {
            id,
            native,
            geometry: Geometry {
                x: attrs.x,
                y: attrs.y,
                width: attrs.width,
                height: attrs.height,
            },
            damage,
            mapped: attrs.viewable,
            dirty: true,
            frame: None,
            class: metadata.class,
            title: metadata.title,
            pid: metadata.pid,
            parent,
            format_warned: false,
        };

        info!(
            "Tracking window {}: {} [{}] ({}x{}){}",
            id,
            window.title,
            window.class,
            window.geometry.width,
            window.geometry.height,
            parent
                .map(|p| format!(" transient for {}", p))
                .unwrap_or_default()
        );

        self.native_to_id.insert(native, id);
        self.windows.insert(id, window);
        Some(id)
    }

    /// Stop tracking a window; unknown handles are ignored
    pub fn remove(
        &mut self,
        backend: &dyn DisplayBackend,
        native: NativeWindow,
    ) -> Option<WindowId> {
        let id = self.native_to_id.remove(&native)?;
        let window = self.windows.remove(&id)?;

        if let Some(damage) = window.damage {
            backend.unwatch_window(damage);
        }

        info!("Removed window {}", id);
        Some(id)
    }

    /// Drop every record, releasing damage handles
    pub fn clear(&mut self, backend: &dyn DisplayBackend) {
        for window in self.windows.values() {
            if let Some(damage) = window.damage {
                backend.unwatch_window(damage);
            }
        }
        self.windows.clear();
        self.native_to_id.clear();
    }

    /// Dispatch one notification to its handler
    pub fn handle_event(&mut self, backend: &dyn DisplayBackend, event: SessionEvent) {
        match event {
            SessionEvent::Created(native) => self.on_create(backend, native),
            SessionEvent::Destroyed(native) => self.on_destroy(backend, native),
            SessionEvent::Mapped(native) => self.on_map(backend, native),
            SessionEvent::Unmapped(native) => self.on_unmap(native),
            SessionEvent::Configured {
                window,
                x,
                y,
                width,
                height,
            } => self.on_configure(
                window,
                Geometry {
                    x,
                    y,
                    width,
                    height,
                },
            ),
            SessionEvent::Damaged { drawable, damage } => self.on_damage(backend, drawable, damage),
        }
    }

    pub fn on_create(&mut self, backend: &dyn DisplayBackend, native: NativeWindow) {
        if self.id_for(native).is_none() && self.should_track(backend, native) {
            self.add(backend, native);
        }
    }

    pub fn on_destroy(&mut self, backend: &dyn DisplayBackend, native: NativeWindow) {
        self.remove(backend, native);
    }

    pub fn on_map(&mut self, backend: &dyn DisplayBackend, native: NativeWindow) {
        if let Some(window) = self.window_mut(native) {
            window.mapped = true;
            debug!("Window {} mapped", window.id);
        } else if self.should_track(backend, native) {
            // Existed before our subscription took effect
            self.add(backend, native);
        }
    }

    pub fn on_unmap(&mut self, native: NativeWindow) {
        if let Some(window) = self.window_mut(native) {
            window.mapped = false;
            debug!("Window {} unmapped", window.id);
        }
    }

    pub fn on_configure(&mut self, native: NativeWindow, geometry: Geometry) {
        let Some(window) = self.window_mut(native) else {
            return;
        };

        let size_changed =
            window.geometry.width != geometry.width || window.geometry.height != geometry.height;
        window.geometry = geometry;

        if size_changed {
            debug!(
                "Window {} resized to {}x{}",
                window.id, geometry.width, geometry.height
            );
            // A buffer of the old size must never be served
            window.frame = None;
            window.dirty = true;
        }
    }

    pub fn on_damage(
        &mut self,
        backend: &dyn DisplayBackend,
        drawable: NativeWindow,
        damage: DamageHandle,
    ) {
        backend.acknowledge_damage(damage);
        if let Some(window) = self.window_mut(drawable) {
            window.dirty = true;
        }
    }

    /// Store a freshly captured buffer; ignored if the size moved on meanwhile
    pub fn store_frame(&mut self, id: WindowId, width: u32, height: u32, pixels: Vec<u8>) -> bool {
        let Some(window) = self.windows.get_mut(&id) else {
            return false;
        };
        if window.geometry.width != width || window.geometry.height != height {
            return false;
        }
        window.frame = Some(pixels);
        window.dirty = false;
        true
    }

    /// Record an unsupported pixel format; true only the first time for this window
    pub fn note_unsupported_format(&mut self, id: WindowId) -> bool {
        match self.windows.get_mut(&id) {
            Some(window) if !window.format_warned => {
                window.format_warned = true;
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the cached buffer
    pub fn frame(&self, id: WindowId) -> Option<WindowFrame> {
        let window = self.windows.get(&id)?;
        let pixels = window.frame.as_ref()?;
        Some(WindowFrame {
            width: window.geometry.width,
            height: window.geometry.height,
            pixels: pixels.clone(),
        })
    }

    fn window_mut(&mut self, native: NativeWindow) -> Option<&mut TrackedWindow> {
        let id = self.native_to_id.get(&native)?;
        self.windows.get_mut(id)
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new(10)
    }
}
