//! X11 display backend using x11rb

use anyhow::Context;
use tracing::{debug, info, warn};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::Event;
use x11rb::protocol::composite::{self, ConnectionExt as _, Redirect};
use x11rb::protocol::damage::{self, ConnectionExt as _, ReportLevel};
use x11rb::protocol::xproto::{
    self, Atom, AtomEnum, ChangeWindowAttributesAux, ConfigureWindowAux, ConnectionExt as _,
    EventMask, GetPropertyReply, ImageFormat, ImageOrder, InputFocus, KeyButMask, StackMode,
    Window, WindowClass,
};
use x11rb::rust_connection::RustConnection;
use x11rb::{CURRENT_TIME, NONE};

use super::{
    ByteOrder, Capabilities, DamageHandle, DisplayBackend, Extension, KeyEvent, NativeWindow,
    PointerAction, PointerEvent, RawImage, SessionEvent, WindowAttributes, WindowMetadata,
};
use crate::input::keymap::KeyboardMapping;

/// X11 backend bound to one display connection
pub struct X11Backend {
    conn: RustConnection,
    root: Window,
    atoms: X11Atoms,
    capabilities: Capabilities,
    keyboard: KeyboardMapping,
}

// Cached X11 atoms for efficiency
x11rb::atom_manager! {
    X11Atoms: X11AtomsCookie {
        _NET_WM_NAME,
        _NET_WM_PID,
        WM_CLASS,
        WM_NAME,
        WM_STATE,
        WM_TRANSIENT_FOR,
        UTF8_STRING,
    }
}

/// Check whether a display accepts client connections
pub fn display_is_live(name: &str) -> bool {
    RustConnection::connect(Some(name)).is_ok()
}

impl X11Backend {
    /// Connect, probe extensions, redirect the root's children and select
    /// structure notifications on the root window
    pub fn connect(name: &str) -> anyhow::Result<Self> {
        let (conn, screen_num) = RustConnection::connect(Some(name))
            .with_context(|| format!("Failed to connect to X11 display {}", name))?;
        let root = conn.setup().roots[screen_num].root;

        let atoms = X11Atoms::new(&conn)?.reply()?;
        let capabilities = Self::probe_extensions(&conn);
        let keyboard = Self::load_keyboard_mapping(&conn)?;

        if capabilities.compositing() {
            // Automatic redirection keeps windows rendered into off-screen pixmaps
            conn.composite_redirect_subwindows(root, Redirect::AUTOMATIC)?;
        } else {
            warn!("Composite extension not available, window capture will not work");
        }
        if !capabilities.change_notification() {
            info!("Damage extension not available, capturing every frame instead");
        }

        // SUBSTRUCTURE_NOTIFY only: SUBSTRUCTURE_REDIRECT would make us the window manager
        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY),
        )?;
        conn.flush()?;

        Ok(Self {
            conn,
            root,
            atoms,
            capabilities,
            keyboard,
        })
    }

    fn probe_extensions(conn: &RustConnection) -> Capabilities {
        let composite = probe(conn, composite::X11_EXTENSION_NAME, || {
            let version = conn.composite_query_version(0, 4).ok()?.reply().ok()?;
            Some((version.major_version, version.minor_version))
        });
        // The version query is mandatory before any other Damage request
        let damage = probe(conn, damage::X11_EXTENSION_NAME, || {
            let version = conn.damage_query_version(1, 1).ok()?.reply().ok()?;
            Some((version.major_version, version.minor_version))
        });

        Capabilities { composite, damage }
    }

    fn load_keyboard_mapping(conn: &RustConnection) -> anyhow::Result<KeyboardMapping> {
        let setup = conn.setup();
        let min = setup.min_keycode;
        let count = setup.max_keycode - min + 1;
        let reply = conn.get_keyboard_mapping(min, count)?.reply()?;
        Ok(KeyboardMapping::new(
            min,
            reply.keysyms_per_keycode,
            reply.keysyms,
        ))
    }

    fn get_window_property(
        &self,
        window: Window,
        property: Atom,
        type_: impl Into<Atom>,
    ) -> anyhow::Result<Option<GetPropertyReply>> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, u32::MAX)?
            .reply()?;

        if reply.type_ == NONE {
            Ok(None)
        } else {
            Ok(Some(reply))
        }
    }

    fn get_window_title(&self, window: Window) -> String {
        // Try _NET_WM_NAME first (UTF-8)
        if let Ok(Some(reply)) =
            self.get_window_property(window, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)
        {
            if let Ok(s) = String::from_utf8(reply.value) {
                return s;
            }
        }

        // Fall back to WM_NAME
        if let Ok(Some(reply)) =
            self.get_window_property(window, self.atoms.WM_NAME, AtomEnum::STRING)
        {
            return String::from_utf8_lossy(&reply.value).into_owned();
        }

        String::new()
    }

    fn get_window_class(&self, window: Window) -> String {
        if let Ok(Some(reply)) =
            self.get_window_property(window, self.atoms.WM_CLASS, AtomEnum::STRING)
        {
            // WM_CLASS is instance name and class name, each NUL terminated
            let parts: Vec<&[u8]> = reply.value.split(|&b| b == 0).collect();
            if let Some(class) = parts.get(1).filter(|p| !p.is_empty()) {
                return String::from_utf8_lossy(class).into_owned();
            }
            if let Some(instance) = parts.first() {
                return String::from_utf8_lossy(instance).into_owned();
            }
        }
        String::new()
    }

    fn get_window_pid(&self, window: Window) -> Option<u32> {
        let reply = self
            .get_window_property(window, self.atoms._NET_WM_PID, AtomEnum::CARDINAL)
            .ok()??;
        reply.value32()?.next()
    }

    fn get_transient_for(&self, window: Window) -> Option<Window> {
        let reply = self
            .get_window_property(window, self.atoms.WM_TRANSIENT_FOR, AtomEnum::WINDOW)
            .ok()??;
        reply.value32()?.next().filter(|&w| w != NONE)
    }

    fn has_wm_state(&self, window: Window) -> bool {
        // Zero-length read: only the property type matters
        self.conn
            .get_property(false, window, self.atoms.WM_STATE, AtomEnum::ANY, 0, 0)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .is_some_and(|reply| reply.type_ != NONE)
    }

    /// Bits per pixel and scanline pad the server uses for a depth
    fn pixmap_format(&self, depth: u8) -> Option<(u8, u8)> {
        self.conn
            .setup()
            .pixmap_formats
            .iter()
            .find(|f| f.depth == depth)
            .map(|f| (f.bits_per_pixel, f.scanline_pad))
    }

    fn byte_order(&self) -> ByteOrder {
        if self.conn.setup().image_byte_order == ImageOrder::LSB_FIRST {
            ByteOrder::LsbFirst
        } else {
            ByteOrder::MsbFirst
        }
    }
}

/// Extension info plus negotiated version, if the server has it
fn probe(
    conn: &RustConnection,
    name: &'static str,
    query_version: impl FnOnce() -> Option<(u32, u32)>,
) -> Option<Extension> {
    let info = conn.extension_information(name).ok().flatten()?;
    let (major, minor) = query_version()?;
    info!("{} extension available: {}.{}", name, major, minor);
    Some(Extension {
        event_base: info.first_event,
        major,
        minor,
    })
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

impl DisplayBackend for X11Backend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn root(&self) -> NativeWindow {
        self.root
    }

    fn poll_event(&self) -> anyhow::Result<Option<SessionEvent>> {
        while let Some(event) = self.conn.poll_for_event()? {
            let translated = match event {
                Event::CreateNotify(e) => SessionEvent::Created(e.window),
                Event::DestroyNotify(e) => SessionEvent::Destroyed(e.window),
                Event::MapNotify(e) => SessionEvent::Mapped(e.window),
                Event::UnmapNotify(e) => SessionEvent::Unmapped(e.window),
                Event::ConfigureNotify(e) => SessionEvent::Configured {
                    window: e.window,
                    x: e.x as i32,
                    y: e.y as i32,
                    width: e.width as u32,
                    height: e.height as u32,
                },
                Event::DamageNotify(e) => SessionEvent::Damaged {
                    drawable: e.drawable,
                    damage: e.damage,
                },
                Event::Error(e) => {
                    // Requests against windows that vanished mid-frame land here
                    debug!("X11 error ignored: {:?}", e.error_kind);
                    continue;
                }
                _ => continue,
            };
            return Ok(Some(translated));
        }
        Ok(None)
    }

    fn top_level_windows(&self) -> anyhow::Result<Vec<NativeWindow>> {
        Ok(self.conn.query_tree(self.root)?.reply()?.children)
    }

    fn window_attributes(&self, window: NativeWindow) -> anyhow::Result<WindowAttributes> {
        let attrs = self.conn.get_window_attributes(window)?.reply()?;
        let geom = self.conn.get_geometry(window)?.reply()?;

        Ok(WindowAttributes {
            x: geom.x as i32,
            y: geom.y as i32,
            width: geom.width as u32,
            height: geom.height as u32,
            input_only: attrs.class == WindowClass::INPUT_ONLY,
            viewable: attrs.map_state == xproto::MapState::VIEWABLE,
            managed: self.has_wm_state(window),
        })
    }

    fn window_metadata(&self, window: NativeWindow) -> WindowMetadata {
        WindowMetadata {
            title: self.get_window_title(window),
            class: self.get_window_class(window),
            pid: self.get_window_pid(window),
            transient_for: self.get_transient_for(window),
        }
    }

    fn watch_window(&self, window: NativeWindow) -> anyhow::Result<Option<DamageHandle>> {
        self.conn.change_window_attributes(
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
        )?;

        let damage = if self.capabilities.change_notification() {
            let damage = self.conn.generate_id()?;
            self.conn
                .damage_create(damage, window, ReportLevel::NON_EMPTY)?;
            Some(damage)
        } else {
            None
        };

        self.conn.flush()?;
        Ok(damage)
    }

    fn unwatch_window(&self, damage: DamageHandle) {
        // The window may already be gone, which invalidates the damage object
        match self.conn.damage_destroy(damage) {
            Ok(cookie) => cookie.ignore_error(),
            Err(e) => debug!("Failed to destroy damage {}: {}", damage, e),
        }
    }

    fn acknowledge_damage(&self, damage: DamageHandle) {
        match self.conn.damage_subtract(damage, NONE, NONE) {
            Ok(cookie) => cookie.ignore_error(),
            Err(e) => debug!("Failed to subtract damage {}: {}", damage, e),
        }
    }

    fn read_pixels(
        &self,
        window: NativeWindow,
        width: u32,
        height: u32,
    ) -> anyhow::Result<RawImage> {
        let pixmap = self.conn.generate_id()?;
        self.conn
            .composite_name_window_pixmap(window, pixmap)?
            .check()
            .context("Failed to name window pixmap")?;

        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                pixmap,
                0,
                0,
                width.min(u16::MAX as u32) as u16,
                height.min(u16::MAX as u32) as u16,
                !0,
            )
            .map(|cookie| cookie.reply());

        // Release the pixmap before looking at the image result
        if let Ok(cookie) = self.conn.free_pixmap(pixmap) {
            cookie.ignore_error();
        }
        let image = reply??;

        let (bits_per_pixel, scanline_pad) = self
            .pixmap_format(image.depth)
            .with_context(|| format!("No pixmap format for depth {}", image.depth))?;
        let pad = scanline_pad.max(8) as usize;
        let row_bits = width as usize * bits_per_pixel as usize;
        let stride = row_bits.div_ceil(pad) * pad / 8;

        Ok(RawImage {
            width,
            height,
            depth: image.depth,
            bits_per_pixel,
            stride,
            byte_order: self.byte_order(),
            data: image.data,
        })
    }

    fn absolute_position(&self, window: NativeWindow) -> anyhow::Result<(i32, i32)> {
        let translated = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)?
            .reply()?;
        Ok((translated.dst_x as i32, translated.dst_y as i32))
    }

    fn send_pointer(&self, window: NativeWindow, event: PointerEvent) -> anyhow::Result<()> {
        let state = KeyButMask::from(event.state);
        let (root_x, root_y) = (clamp_i16(event.root_x), clamp_i16(event.root_y));
        let (event_x, event_y) = (clamp_i16(event.x), clamp_i16(event.y));

        match event.action {
            PointerAction::Press(button) | PointerAction::Release(button) => {
                let response_type = if matches!(event.action, PointerAction::Press(_)) {
                    xproto::BUTTON_PRESS_EVENT
                } else {
                    xproto::BUTTON_RELEASE_EVENT
                };
                let button_event = xproto::ButtonPressEvent {
                    response_type,
                    detail: button,
                    sequence: 0,
                    time: CURRENT_TIME,
                    root: self.root,
                    event: window,
                    child: NONE,
                    root_x,
                    root_y,
                    event_x,
                    event_y,
                    state,
                    same_screen: true,
                };
                self.conn.send_event(
                    true,
                    window,
                    EventMask::BUTTON_PRESS | EventMask::BUTTON_RELEASE,
                    button_event,
                )?;
            }
            PointerAction::Motion => {
                let motion_event = xproto::MotionNotifyEvent {
                    response_type: xproto::MOTION_NOTIFY_EVENT,
                    detail: xproto::Motion::NORMAL,
                    sequence: 0,
                    time: CURRENT_TIME,
                    root: self.root,
                    event: window,
                    child: NONE,
                    root_x,
                    root_y,
                    event_x,
                    event_y,
                    state,
                    same_screen: true,
                };
                self.conn
                    .send_event(true, window, EventMask::POINTER_MOTION, motion_event)?;
            }
        }

        self.conn.flush()?;
        Ok(())
    }

    fn send_key(&self, window: NativeWindow, event: KeyEvent) -> anyhow::Result<()> {
        let key_event = xproto::KeyPressEvent {
            response_type: if event.pressed {
                xproto::KEY_PRESS_EVENT
            } else {
                xproto::KEY_RELEASE_EVENT
            },
            detail: event.keycode,
            sequence: 0,
            time: CURRENT_TIME,
            root: self.root,
            event: window,
            child: NONE,
            root_x: 0,
            root_y: 0,
            event_x: 0,
            event_y: 0,
            state: KeyButMask::from(event.state),
            same_screen: true,
        };

        self.conn.send_event(
            true,
            window,
            EventMask::KEY_PRESS | EventMask::KEY_RELEASE,
            key_event,
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn keysym_to_keycode(&self, keysym: u32) -> Option<u8> {
        self.keyboard.keycode_for(keysym)
    }

    fn focus_window(&self, window: NativeWindow) -> anyhow::Result<()> {
        self.conn
            .set_input_focus(InputFocus::PARENT, window, CURRENT_TIME)?;
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.conn.flush()?;
        Ok(())
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.conn.flush()?;
        Ok(())
    }

    fn shutdown(&self) {
        if self.capabilities.compositing() {
            if let Err(e) = self
                .conn
                .composite_unredirect_subwindows(self.root, Redirect::AUTOMATIC)
            {
                debug!("Failed to unredirect root subwindows: {}", e);
            }
        }
        if let Err(e) = self.conn.flush() {
            debug!("Flush during shutdown failed: {}", e);
        }
    }
}
