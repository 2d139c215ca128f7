//! Host-facing mirroring surface
//!
//! The host calls [`Compositor::initialize`] once, [`Compositor::pump`] once per
//! frame, and the query/input methods on demand, all from the same thread.
//! Unknown window ids are a normal miss and yield empty/sentinel values.

use tracing::{error, info, warn};

use crate::backend::{Capabilities, DisplayBackend, NativeWindow};
use crate::capture::{self, CaptureOutcome};
use crate::config::CompositorConfig;
use crate::core::registry::{WindowFrame, WindowId, WindowRegistry};
use crate::error::BootstrapError;
use crate::input::InputInjector;
use crate::session::Session;

pub struct Compositor {
    config: CompositorConfig,
    session: Option<Session>,
    registry: WindowRegistry,
    input: InputInjector,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        let registry = WindowRegistry::new(config.min_window_size);
        Self {
            config,
            session: None,
            registry,
            input: InputInjector::new(),
        }
    }

    /// Build an initialized compositor on an already connected backend
    pub fn attach(
        config: CompositorConfig,
        display: u32,
        backend: Box<dyn DisplayBackend>,
    ) -> Self {
        let mut compositor = Self::new(config);
        compositor.adopt(Session::attach(display, backend));
        compositor
    }

    /// Start the headless session; false on any bootstrap failure, with
    /// everything already cleaned up
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to initialize compositor [{}]: {}", e.error_code(), e);
                false
            }
        }
    }

    pub fn try_initialize(&mut self) -> Result<(), BootstrapError> {
        if self.session.is_some() {
            info!("Compositor already initialized");
            return Ok(());
        }

        info!("Initializing compositor...");
        let session = Session::start(&self.config)?;
        self.adopt(session);
        Ok(())
    }

    fn adopt(&mut self, session: Session) {
        self.registry.scan_existing(session.backend());
        info!(
            "Compositor initialized on {} tracking {} windows",
            session.display_name(),
            self.registry.len()
        );
        self.session = Some(session);
    }

    /// Drain queued notifications, then capture every window that is due
    pub fn pump(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let backend = session.backend();

        loop {
            match backend.poll_event() {
                Ok(Some(event)) => self.registry.handle_event(backend, event),
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read session events: {}", e);
                    break;
                }
            }
        }

        let capabilities = backend.capabilities();
        for id in self.registry.ids() {
            let Some(window) = self.registry.get(id) else {
                continue;
            };
            let (width, height) = (window.geometry.width, window.geometry.height);

            match capture::capture(backend, &capabilities, window) {
                CaptureOutcome::Captured(pixels) => {
                    self.registry.store_frame(id, width, height, pixels);
                }
                CaptureOutcome::Unsupported(e) => {
                    if self.registry.note_unsupported_format(id) {
                        warn!("Window {}: {}", id, e);
                    }
                }
                CaptureOutcome::Skipped | CaptureOutcome::Failed => {}
            }
        }

        if let Err(e) = backend.flush() {
            warn!("Flush failed: {}", e);
        }
    }

    pub fn window_ids(&self) -> Vec<WindowId> {
        self.registry.ids()
    }

    pub fn has_window(&self, id: WindowId) -> bool {
        self.registry.get(id).is_some()
    }

    /// Copy of the latest captured buffer, if any
    pub fn window_buffer(&self, id: WindowId) -> Option<WindowFrame> {
        self.registry.frame(id)
    }

    /// `(0, 0)` for unknown ids
    pub fn window_size(&self, id: WindowId) -> (u32, u32) {
        self.registry
            .get(id)
            .map(|w| (w.geometry.width, w.geometry.height))
            .unwrap_or((0, 0))
    }

    pub fn window_class(&self, id: WindowId) -> String {
        self.registry.get(id).map(|w| w.class.clone()).unwrap_or_default()
    }

    pub fn window_title(&self, id: WindowId) -> String {
        self.registry.get(id).map(|w| w.title.clone()).unwrap_or_default()
    }

    pub fn window_pid(&self, id: WindowId) -> Option<u32> {
        self.registry.get(id).and_then(|w| w.pid)
    }

    pub fn parent_window_id(&self, id: WindowId) -> Option<WindowId> {
        self.registry.parent_of(id)
    }

    /// Absolute position on the root window, queried from the session; falls
    /// back to the last configured position
    pub fn window_position(&self, id: WindowId) -> (i32, i32) {
        let Some(window) = self.registry.get(id) else {
            return (0, 0);
        };
        self.session
            .as_ref()
            .and_then(|s| s.backend().absolute_position(window.native).ok())
            .unwrap_or((window.geometry.x, window.geometry.y))
    }

    pub fn is_window_mapped(&self, id: WindowId) -> bool {
        self.registry.get(id).is_some_and(|w| w.mapped)
    }

    pub fn send_mouse_button(&self, id: WindowId, button: u8, pressed: bool, x: i32, y: i32) {
        if let Some((backend, native)) = self.target(id) {
            self.input.send_button(backend, native, button, pressed, x, y);
        }
    }

    pub fn send_mouse_motion(&self, id: WindowId, x: i32, y: i32) {
        if let Some((backend, native)) = self.target(id) {
            self.input.send_motion(backend, native, x, y);
        }
    }

    pub fn send_key_event(&mut self, id: WindowId, virtual_code: u32, pressed: bool) {
        let (Some(session), Some(window)) = (self.session.as_ref(), self.registry.get(id)) else {
            return;
        };
        self.input
            .send_key(session.backend(), window.native, virtual_code, pressed);
    }

    pub fn set_window_focus(&self, id: WindowId) {
        if let Some((backend, native)) = self.target(id) {
            if let Err(e) = backend.focus_window(native) {
                warn!("Failed to focus window {}: {}", id, e);
            }
        }
    }

    /// Release every held key and clear the modifier mask; call whenever the
    /// host drops its input grab
    pub fn release_all_keys(&mut self) {
        let backend = self.session.as_ref().map(Session::backend);
        self.input.release_all(backend);
    }

    /// Current modifier mask attached to synthesized events
    pub fn modifier_state(&self) -> u16 {
        self.input.modifiers()
    }

    /// `:N`, or empty before initialization
    pub fn display_name(&self) -> String {
        self.session
            .as_ref()
            .map(Session::display_name)
            .unwrap_or_default()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.session
            .as_ref()
            .map(|s| s.backend().capabilities())
            .unwrap_or_default()
    }

    /// Root window of the session, if initialized
    pub fn root_window(&self) -> Option<NativeWindow> {
        self.session.as_ref().map(|s| s.backend().root())
    }

    pub fn server_pid(&self) -> Option<u32> {
        self.session.as_ref().and_then(Session::server_pid)
    }

    /// Release keys, drop all tracking, disconnect and stop the server
    pub fn shutdown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        info!("Shutting down compositor...");
        self.input.release_all(Some(session.backend()));
        self.registry.clear(session.backend());
        session.teardown();
        info!("Compositor shutdown complete");
    }

    fn target(&self, id: WindowId) -> Option<(&dyn DisplayBackend, NativeWindow)> {
        let session = self.session.as_ref()?;
        let window = self.registry.get(id)?;
        Some((session.backend(), window.native))
    }
}

impl Drop for Compositor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, ROOT, full_capabilities, solid_image, viewable};
    use crate::backend::{SessionEvent, WindowMetadata};
    use crate::input::keymap::vk;

    fn compositor_with(backend: &FakeBackend) -> Compositor {
        Compositor::attach(CompositorConfig::default(), 7, Box::new(backend.clone()))
    }

    fn two_windows(capabilities: Capabilities) -> FakeBackend {
        let backend = FakeBackend::new(capabilities);
        backend.add_window(
            0x100,
            viewable(0, 0, 64, 32),
            WindowMetadata {
                title: "Editor".to_string(),
                class: "Gedit".to_string(),
                pid: Some(1234),
                transient_for: None,
            },
        );
        backend.add_window(
            0x101,
            viewable(20, 20, 16, 16),
            WindowMetadata {
                transient_for: Some(0x100),
                ..Default::default()
            },
        );
        backend
    }

    #[test]
    fn test_uninitialized_surface() {
        let mut compositor = Compositor::new(CompositorConfig::default());
        assert!(!compositor.is_initialized());
        assert_eq!(compositor.display_name(), "");
        assert_eq!(compositor.root_window(), None);
        assert!(compositor.window_ids().is_empty());
        assert_eq!(compositor.window_size(1), (0, 0));
        compositor.pump();
        compositor.release_all_keys();
        assert_eq!(compositor.modifier_state(), 0);
    }

    #[test]
    fn test_attach_scans_and_reports_metadata() {
        let backend = two_windows(full_capabilities());
        let compositor = compositor_with(&backend);

        assert!(compositor.is_initialized());
        assert_eq!(compositor.display_name(), ":7");
        assert_eq!(compositor.root_window(), Some(ROOT));
        assert_eq!(compositor.window_ids(), vec![1, 2]);
        assert_eq!(compositor.window_title(1), "Editor");
        assert_eq!(compositor.window_class(1), "Gedit");
        assert_eq!(compositor.window_pid(1), Some(1234));
        assert_eq!(compositor.window_pid(2), None);
        assert_eq!(compositor.parent_window_id(2), Some(1));
        assert_eq!(compositor.parent_window_id(1), None);
        assert_eq!(compositor.window_position(2), (20, 20));
        assert!(compositor.is_window_mapped(1));
        assert_eq!(compositor.window_class(99), "");
        assert_eq!(compositor.parent_window_id(99), None);
    }

    #[test]
    fn test_pump_captures_and_buffer_is_a_snapshot() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);
        assert!(compositor.window_buffer(1).is_none());

        compositor.pump();
        let frame = compositor.window_buffer(1).unwrap();
        assert_eq!((frame.width, frame.height), (64, 32));
        assert_eq!(frame.pixels.len(), 64 * 32 * 4);
        assert_eq!(&frame.pixels[..4], &[30, 20, 10, 0xff]);

        // New content after damage does not alter the copy already handed out
        backend.set_image(0x100, Some(solid_image(64, 32, [1, 1, 1])));
        let damage = backend.damage_for(0x100).unwrap();
        backend.push_event(SessionEvent::Damaged {
            drawable: 0x100,
            damage,
        });
        compositor.pump();

        assert_eq!(&frame.pixels[..4], &[30, 20, 10, 0xff]);
        assert_eq!(&compositor.window_buffer(1).unwrap().pixels[..4], &[1, 1, 1, 0xff]);
    }

    #[test]
    fn test_damage_gates_recapture() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);

        compositor.pump();
        compositor.pump();
        compositor.pump();
        assert_eq!(backend.pixel_reads(0x100), 1);

        let damage = backend.damage_for(0x100).unwrap();
        backend.push_event(SessionEvent::Damaged {
            drawable: 0x100,
            damage,
        });
        compositor.pump();
        assert_eq!(backend.pixel_reads(0x100), 2);
        assert_eq!(backend.pixel_reads(0x101), 1);
    }

    #[test]
    fn test_without_damage_every_pump_recaptures() {
        let capabilities = Capabilities {
            damage: None,
            ..full_capabilities()
        };
        let backend = two_windows(capabilities);
        let mut compositor = compositor_with(&backend);
        assert!(backend.damage_for(0x100).is_none());

        for _ in 0..3 {
            compositor.pump();
        }
        assert_eq!(backend.pixel_reads(0x100), 3);
        assert_eq!(backend.pixel_reads(0x101), 3);
    }

    #[test]
    fn test_damage_and_polling_paths_produce_identical_buffers() {
        let gated = two_windows(full_capabilities());
        let polled = two_windows(Capabilities {
            damage: None,
            ..full_capabilities()
        });
        let mut a = compositor_with(&gated);
        let mut b = compositor_with(&polled);
        a.pump();
        b.pump();

        for backend in [&gated, &polled] {
            backend.set_image(0x100, Some(solid_image(64, 32, [9, 8, 7])));
        }
        let damage = gated.damage_for(0x100).unwrap();
        gated.push_event(SessionEvent::Damaged {
            drawable: 0x100,
            damage,
        });
        a.pump();
        b.pump();

        assert_eq!(a.window_buffer(1), b.window_buffer(1));
    }

    #[test]
    fn test_without_composite_no_buffers() {
        let backend = two_windows(Capabilities::default());
        let mut compositor = compositor_with(&backend);
        compositor.pump();

        assert_eq!(compositor.window_ids(), vec![1, 2]);
        assert!(compositor.window_buffer(1).is_none());
        assert_eq!(backend.pixel_reads(0x100), 0);
    }

    #[test]
    fn test_resize_invalidates_buffer_until_next_capture() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);
        compositor.pump();
        assert!(compositor.window_buffer(1).is_some());

        backend.set_geometry(0x100, 0, 0, 128, 64);
        backend.push_event(SessionEvent::Configured {
            window: 0x100,
            x: 0,
            y: 0,
            width: 128,
            height: 64,
        });

        // Capture fails this frame, so only the configure is applied
        backend.set_image(0x100, None);
        compositor.pump();
        assert_eq!(compositor.window_size(1), (128, 64));
        assert!(compositor.window_buffer(1).is_none());

        backend.set_image(0x100, Some(solid_image(128, 64, [0, 0, 0])));
        compositor.pump();
        let frame = compositor.window_buffer(1).unwrap();
        assert_eq!(frame.pixels.len(), 128 * 64 * 4);
    }

    #[test]
    fn test_unmapped_window_is_not_captured() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);
        backend.push_event(SessionEvent::Unmapped(0x101));
        compositor.pump();

        assert!(!compositor.is_window_mapped(2));
        assert_eq!(backend.pixel_reads(0x101), 0);
        assert!(compositor.window_buffer(2).is_none());
    }

    #[test]
    fn test_unsupported_depth_is_skipped() {
        let backend = two_windows(full_capabilities());
        let mut image = solid_image(64, 32, [0, 0, 0]);
        image.bits_per_pixel = 8;
        image.depth = 8;
        backend.set_image(0x100, Some(image));

        let mut compositor = compositor_with(&backend);
        compositor.pump();
        compositor.pump();

        assert!(compositor.window_buffer(1).is_none());
        assert!(compositor.window_buffer(2).is_some());
        // Still dirty, so retried each frame
        assert_eq!(backend.pixel_reads(0x100), 2);
    }

    #[test]
    fn test_destroy_removes_window_and_is_idempotent() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);
        compositor.pump();

        backend.push_event(SessionEvent::Destroyed(0x100));
        backend.push_event(SessionEvent::Destroyed(0x100));
        compositor.pump();

        assert_eq!(compositor.window_ids(), vec![2]);
        assert!(compositor.window_buffer(1).is_none());
        assert_eq!(compositor.window_size(1), (0, 0));
        assert_eq!(compositor.window_title(1), "");
        assert_eq!(compositor.window_pid(1), None);
        assert!(!compositor.is_window_mapped(1));
        assert_eq!(compositor.window_position(1), (0, 0));
        // Dangling parent reads as none
        assert_eq!(compositor.parent_window_id(2), None);
    }

    #[test]
    fn test_new_window_via_create_event() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);

        backend.add_window(0x200, viewable(5, 5, 40, 40), WindowMetadata::default());
        backend.push_event(SessionEvent::Created(0x200));
        backend.push_event(SessionEvent::Created(0x200));
        compositor.pump();

        assert_eq!(compositor.window_ids(), vec![1, 2, 3]);
        assert!(compositor.window_buffer(3).is_some());
    }

    #[test]
    fn test_input_routing() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);

        compositor.send_mouse_button(2, 1, true, 3, 4);
        compositor.send_mouse_motion(2, 5, 6);
        compositor.send_mouse_button(99, 1, true, 0, 0);
        let events = backend.pointer_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, 0x101);
        assert_eq!((events[0].1.root_x, events[0].1.root_y), (23, 24));
        assert_eq!((events[1].1.root_x, events[1].1.root_y), (25, 26));

        compositor.send_key_event(1, vk::SHIFT, true);
        compositor.send_key_event(1, 'a' as u32, true);
        compositor.send_key_event(1, vk::SHIFT, false);
        compositor.release_all_keys();
        assert_eq!(compositor.modifier_state(), 0);
        assert_eq!(backend.key_events().len(), 4);

        compositor.set_window_focus(2);
        assert_eq!(backend.state().focused, vec![0x101]);
        assert_eq!(backend.state().stacking.last(), Some(&0x101));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);
        compositor.send_key_event(1, vk::CTRL, true);

        compositor.shutdown();

        assert!(!compositor.is_initialized());
        assert!(compositor.window_ids().is_empty());
        assert_eq!(compositor.modifier_state(), 0);
        let state = backend.state();
        assert!(state.shut_down);
        assert!(state.live_damage.is_empty());
        assert_eq!(state.key_events.len(), 2);
        drop(state);

        // Second shutdown and drop are no-ops
        compositor.shutdown();
    }

    #[test]
    fn test_initialize_is_idempotent_when_attached() {
        let backend = two_windows(full_capabilities());
        let mut compositor = compositor_with(&backend);
        assert!(compositor.initialize());
        assert_eq!(compositor.window_ids(), vec![1, 2]);
    }

    #[test]
    fn test_initialize_failure_leaves_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CompositorConfig {
            server_binary: "/nonexistent/xmirror-test-server".to_string(),
            lock_dir: tmp.path().to_path_buf(),
            socket_dir: tmp.path().join(".X11-unix"),
            display_first: 500,
            display_last: 505,
            ..Default::default()
        };
        let mut compositor = Compositor::new(config);

        assert!(!compositor.initialize());
        assert!(!compositor.is_initialized());
        assert_eq!(compositor.display_name(), "");
        assert_eq!(compositor.server_pid(), None);
    }
}
