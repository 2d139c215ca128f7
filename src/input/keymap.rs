//! Virtual key codes, keysyms and keyboard layout lookup
//!
//! Hosts deliver keys in their own code space: printable characters use their
//! Unicode value, special keys live above `0x400000`. Those are mapped to X
//! keysyms here, and keysyms to layout-specific keycodes by [`KeyboardMapping`].

/// Host virtual key codes for non-printable keys
pub mod vk {
    pub const ESCAPE: u32 = 0x40_0001;
    pub const TAB: u32 = 0x40_0002;
    pub const BACKSPACE: u32 = 0x40_0004;
    pub const ENTER: u32 = 0x40_0005;
    pub const INSERT: u32 = 0x40_0007;
    pub const DELETE: u32 = 0x40_0008;
    pub const HOME: u32 = 0x40_000D;
    pub const END: u32 = 0x40_000E;
    pub const LEFT: u32 = 0x40_000F;
    pub const UP: u32 = 0x40_0010;
    pub const RIGHT: u32 = 0x40_0011;
    pub const DOWN: u32 = 0x40_0012;
    pub const PAGE_UP: u32 = 0x40_0013;
    pub const PAGE_DOWN: u32 = 0x40_0014;
    pub const SHIFT: u32 = 0x40_0015;
    pub const CTRL: u32 = 0x40_0016;
    pub const META: u32 = 0x40_0017;
    pub const ALT: u32 = 0x40_0018;
    pub const F1: u32 = 0x40_001C;
    pub const F12: u32 = 0x40_0027;
    pub const SPACE: u32 = 0x20;
}

/// X keysyms used by the translation table
pub mod keysym {
    pub const RETURN: u32 = 0xff0d;
    pub const BACKSPACE: u32 = 0xff08;
    pub const ESCAPE: u32 = 0xff1b;
    pub const TAB: u32 = 0xff09;
    pub const SPACE: u32 = 0x0020;
    pub const LEFT: u32 = 0xff51;
    pub const UP: u32 = 0xff52;
    pub const RIGHT: u32 = 0xff53;
    pub const DOWN: u32 = 0xff54;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const META_L: u32 = 0xffe7;
    pub const ALT_L: u32 = 0xffe9;
    pub const F1: u32 = 0xffbe;
    pub const DELETE: u32 = 0xffff;
    pub const INSERT: u32 = 0xff63;
    pub const HOME: u32 = 0xff50;
    pub const END: u32 = 0xff57;
    pub const PAGE_UP: u32 = 0xff55;
    pub const PAGE_DOWN: u32 = 0xff56;
}

/// Core protocol modifier bits
pub mod modmask {
    pub const SHIFT: u16 = 1 << 0;
    pub const CONTROL: u16 = 1 << 2;
    pub const MOD1: u16 = 1 << 3;
    pub const MOD4: u16 = 1 << 6;
}

/// Translate a host virtual key code to a keysym
///
/// Codes outside the table pass through unchanged, which is correct for
/// Latin-1 printable characters whose keysym equals their code point.
pub fn keysym_for(virtual_code: u32) -> u32 {
    match virtual_code {
        vk::ENTER => keysym::RETURN,
        vk::BACKSPACE => keysym::BACKSPACE,
        vk::ESCAPE => keysym::ESCAPE,
        vk::TAB => keysym::TAB,
        vk::SPACE => keysym::SPACE,

        vk::LEFT => keysym::LEFT,
        vk::UP => keysym::UP,
        vk::RIGHT => keysym::RIGHT,
        vk::DOWN => keysym::DOWN,

        vk::SHIFT => keysym::SHIFT_L,
        vk::CTRL => keysym::CONTROL_L,
        vk::ALT => keysym::ALT_L,
        vk::META => keysym::META_L,

        code @ vk::F1..=vk::F12 => keysym::F1 + (code - vk::F1),

        vk::DELETE => keysym::DELETE,
        vk::INSERT => keysym::INSERT,
        vk::HOME => keysym::HOME,
        vk::END => keysym::END,
        vk::PAGE_UP => keysym::PAGE_UP,
        vk::PAGE_DOWN => keysym::PAGE_DOWN,

        other => other,
    }
}

/// Modifier bit a virtual key toggles, if it is a modifier
pub fn modifier_for(virtual_code: u32) -> Option<u16> {
    match virtual_code {
        vk::SHIFT => Some(modmask::SHIFT),
        vk::CTRL => Some(modmask::CONTROL),
        vk::ALT => Some(modmask::MOD1),
        vk::META => Some(modmask::MOD4),
        _ => None,
    }
}

/// Map a human-readable key name to a host virtual key code
pub fn virtual_code_from_name(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let code = match lower.as_str() {
        "return" | "enter" => vk::ENTER,
        "escape" | "esc" => vk::ESCAPE,
        "tab" => vk::TAB,
        "backspace" => vk::BACKSPACE,
        "space" => vk::SPACE,
        "delete" => vk::DELETE,
        "insert" => vk::INSERT,
        "home" => vk::HOME,
        "end" => vk::END,
        "pageup" => vk::PAGE_UP,
        "pagedown" => vk::PAGE_DOWN,

        "up" => vk::UP,
        "down" => vk::DOWN,
        "left" => vk::LEFT,
        "right" => vk::RIGHT,

        "shift" => vk::SHIFT,
        "ctrl" | "control" => vk::CTRL,
        "alt" => vk::ALT,
        "super" | "meta" | "win" => vk::META,

        _ => {
            if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u32>().ok()) {
                if (1..=12).contains(&n) {
                    return Some(vk::F1 + n - 1);
                }
            }
            // Single printable character, taken verbatim (case preserved)
            let mut chars = name.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) if !c.is_control() => Some(c as u32),
                _ => None,
            };
        }
    };
    Some(code)
}

/// Keysym table of the session's keyboard, as returned by GetKeyboardMapping
#[derive(Debug, Clone, Default)]
pub struct KeyboardMapping {
    min_keycode: u8,
    keysyms_per_keycode: u8,
    keysyms: Vec<u32>,
}

impl KeyboardMapping {
    pub fn new(min_keycode: u8, keysyms_per_keycode: u8, keysyms: Vec<u32>) -> Self {
        Self {
            min_keycode,
            keysyms_per_keycode,
            keysyms,
        }
    }

    /// First keycode whose row contains the keysym
    pub fn keycode_for(&self, keysym: u32) -> Option<u8> {
        if keysym == 0 || self.keysyms_per_keycode == 0 {
            return None;
        }
        let per = self.keysyms_per_keycode as usize;
        self.keysyms
            .chunks(per)
            .position(|row| row.contains(&keysym))
            .and_then(|index| u8::try_from(index + self.min_keycode as usize).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_keys_translate() {
        assert_eq!(keysym_for(vk::ENTER), keysym::RETURN);
        assert_eq!(keysym_for(vk::PAGE_DOWN), keysym::PAGE_DOWN);
        assert_eq!(keysym_for(vk::META), keysym::META_L);
        assert_eq!(keysym_for(vk::F1), 0xffbe);
        assert_eq!(keysym_for(vk::F12), 0xffc9);
    }

    #[test]
    fn test_printable_passes_through() {
        assert_eq!(keysym_for('a' as u32), 0x61);
        assert_eq!(keysym_for('Z' as u32), 0x5a);
        assert_eq!(keysym_for(vk::SPACE), keysym::SPACE);
    }

    #[test]
    fn test_modifier_bits() {
        assert_eq!(modifier_for(vk::SHIFT), Some(modmask::SHIFT));
        assert_eq!(modifier_for(vk::CTRL), Some(modmask::CONTROL));
        assert_eq!(modifier_for(vk::ALT), Some(modmask::MOD1));
        assert_eq!(modifier_for(vk::META), Some(modmask::MOD4));
        assert_eq!(modifier_for('a' as u32), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(virtual_code_from_name("Return"), Some(vk::ENTER));
        assert_eq!(virtual_code_from_name("ctrl"), Some(vk::CTRL));
        assert_eq!(virtual_code_from_name("F5"), Some(vk::F1 + 4));
        assert_eq!(virtual_code_from_name("f13"), None);
        assert_eq!(virtual_code_from_name("x"), Some('x' as u32));
        assert_eq!(virtual_code_from_name("Q"), Some('Q' as u32));
        assert_eq!(virtual_code_from_name("nonsense"), None);
    }

    #[test]
    fn test_keyboard_mapping_lookup() {
        // keycode 8: a A, keycode 9: Return NoSymbol, keycode 10: b B
        let mapping = KeyboardMapping::new(8, 2, vec![0x61, 0x41, 0xff0d, 0, 0x62, 0x42]);
        assert_eq!(mapping.keycode_for(0x61), Some(8));
        assert_eq!(mapping.keycode_for(0x41), Some(8));
        assert_eq!(mapping.keycode_for(keysym::RETURN), Some(9));
        assert_eq!(mapping.keycode_for(0x42), Some(10));
        assert_eq!(mapping.keycode_for(0x63), None);
        assert_eq!(mapping.keycode_for(0), None);
    }
}
