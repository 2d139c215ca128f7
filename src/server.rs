//! MCP bridge for the compositor
//!
//! Exposes the mirrored windows of the headless session as MCP tools so a host
//! (or an assistant) can list, inspect, screenshot and drive them over stdio.
//! Frames are pumped by a separate task; tools only read the cached state.

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, serde,
    service::RequestContext,
    tool, tool_handler, tool_router, ErrorData as McpError, RoleServer, ServerHandler,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::capture;
use crate::compositor::Compositor;
use crate::core::registry::WindowId;
use crate::input::keymap;

/// Parameters for window_list tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WindowListParams {
    /// Filter windows by title (case-insensitive substring match)
    #[serde(default)]
    pub title_filter: Option<String>,
    /// Filter windows by class/app name
    #[serde(default)]
    pub class_filter: Option<String>,
}

/// Parameters for tools addressing a single window
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WindowParams {
    /// Window id from window_list
    pub id: WindowId,
}

/// Parameters for window_click tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WindowClickParams {
    /// Window id from window_list
    pub id: WindowId,
    /// X coordinate within the window
    pub x: i32,
    /// Y coordinate within the window
    pub y: i32,
    /// Mouse button: "left" (default), "right", "middle", "wheel_up", "wheel_down"
    #[serde(default = "default_button")]
    pub button: String,
}

fn default_button() -> String {
    "left".to_string()
}

/// Parameters for window_pointer_move tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WindowPointerMoveParams {
    /// Window id from window_list
    pub id: WindowId,
    pub x: i32,
    pub y: i32,
}

/// Parameters for window_key tool
#[derive(Debug, serde::Deserialize, schemars::JsonSchema)]
pub struct WindowKeyParams {
    /// Window id from window_list
    pub id: WindowId,
    /// Key to send (e.g., "Return", "Escape", "Tab", "a", "F1")
    pub key: String,
    /// "tap" (default), "press" or "release"
    #[serde(default = "default_key_action")]
    pub action: String,
    /// Modifier keys held around a tap: "ctrl", "alt", "shift", "super"
    #[serde(default)]
    pub modifiers: Vec<String>,
}

fn default_key_action() -> String {
    "tap".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Tap,
    Press,
    Release,
}

fn parse_key_action(action: &str) -> Option<KeyAction> {
    match action.to_lowercase().as_str() {
        "tap" => Some(KeyAction::Tap),
        "press" | "down" => Some(KeyAction::Press),
        "release" | "up" => Some(KeyAction::Release),
        _ => None,
    }
}

/// Host button number for a button name
fn button_from_name(name: &str) -> Option<u8> {
    match name.to_lowercase().as_str() {
        "left" => Some(1),
        "right" => Some(2),
        "middle" => Some(3),
        "wheel_up" => Some(4),
        "wheel_down" => Some(5),
        "wheel_left" => Some(6),
        "wheel_right" => Some(7),
        _ => None,
    }
}

fn pretty(value: serde_json::Value) -> CallToolResult {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    CallToolResult::success(vec![Content::text(text)])
}

fn failure(value: serde_json::Value) -> CallToolResult {
    CallToolResult::error(vec![Content::text(value.to_string())])
}

fn window_not_found(id: WindowId) -> CallToolResult {
    failure(json!({
        "error": "Window not found",
        "id": id,
        "suggestion": "Run window_list to get current window ids"
    }))
}

fn window_json(compositor: &Compositor, id: WindowId) -> serde_json::Value {
    let (x, y) = compositor.window_position(id);
    let (width, height) = compositor.window_size(id);
    json!({
        "id": id,
        "title": compositor.window_title(id),
        "class": compositor.window_class(id),
        "pid": compositor.window_pid(id),
        "parent": compositor.parent_window_id(id),
        "geometry": {
            "x": x,
            "y": y,
            "width": width,
            "height": height
        },
        "mapped": compositor.is_window_mapped(id),
        "has_buffer": compositor.window_buffer(id).is_some()
    })
}

/// xmirror MCP Server
///
/// Serves the windows of one headless display session.
#[derive(Clone)]
pub struct XmirrorServer {
    /// Compositor shared with the frame pump task
    compositor: Arc<Mutex<Compositor>>,
    /// MCP tool router
    tool_router: ToolRouter<XmirrorServer>,
}

#[tool_router]
impl XmirrorServer {
    pub fn new(compositor: Arc<Mutex<Compositor>>) -> Self {
        Self {
            compositor,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "List all mirrored windows with their ids and metadata")]
    async fn window_list(
        &self,
        params: Parameters<WindowListParams>,
    ) -> Result<CallToolResult, McpError> {
        let compositor = self.compositor.lock().await;

        let window_list: Vec<serde_json::Value> = compositor
            .window_ids()
            .into_iter()
            .filter(|&id| {
                let title_match = params.0.title_filter.as_ref().is_none_or(|f| {
                    compositor
                        .window_title(id)
                        .to_lowercase()
                        .contains(&f.to_lowercase())
                });
                let class_match = params.0.class_filter.as_ref().is_none_or(|f| {
                    compositor
                        .window_class(id)
                        .to_lowercase()
                        .contains(&f.to_lowercase())
                });
                title_match && class_match
            })
            .map(|id| window_json(&compositor, id))
            .collect();

        Ok(pretty(json!({
            "windows": window_list,
            "count": window_list.len(),
            "display": compositor.display_name()
        })))
    }

    #[tool(description = "Get detailed snapshot of a specific window's current state")]
    async fn window_snapshot(
        &self,
        params: Parameters<WindowParams>,
    ) -> Result<CallToolResult, McpError> {
        let compositor = self.compositor.lock().await;
        let id = params.0.id;

        if !compositor.has_window(id) {
            return Ok(window_not_found(id));
        }
        Ok(pretty(window_json(&compositor, id)))
    }

    #[tool(description = "Return the latest captured buffer of a window as a PNG image")]
    async fn window_screenshot(
        &self,
        params: Parameters<WindowParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = params.0.id;
        let frame = {
            let compositor = self.compositor.lock().await;
            if !compositor.has_window(id) {
                return Ok(window_not_found(id));
            }
            compositor.window_buffer(id)
        };

        let Some(frame) = frame else {
            return Ok(failure(json!({
                "error": "No captured buffer yet",
                "id": id,
                "suggestion": "The window may be unmapped or its pixel format unsupported"
            })));
        };

        match capture::encode_png(&frame) {
            Ok(png) => {
                let base64_data =
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &png);
                Ok(CallToolResult::success(vec![Content::image(
                    base64_data,
                    "image/png",
                )]))
            }
            Err(e) => Ok(failure(json!({
                "error": "Failed to encode screenshot",
                "id": id,
                "details": e.to_string()
            }))),
        }
    }

    #[tool(description = "Click at coordinates within a window (press then release)")]
    async fn window_click(
        &self,
        params: Parameters<WindowClickParams>,
    ) -> Result<CallToolResult, McpError> {
        let compositor = self.compositor.lock().await;
        let WindowClickParams { id, x, y, button } = params.0;

        if !compositor.has_window(id) {
            return Ok(window_not_found(id));
        }
        let Some(host_button) = button_from_name(&button) else {
            return Ok(failure(json!({
                "error": "Unknown button",
                "button": button
            })));
        };

        compositor.send_mouse_motion(id, x, y);
        compositor.send_mouse_button(id, host_button, true, x, y);
        compositor.send_mouse_button(id, host_button, false, x, y);

        Ok(pretty(json!({
            "success": true,
            "id": id,
            "window_coords": { "x": x, "y": y },
            "button": button
        })))
    }

    #[tool(description = "Move the pointer to coordinates within a window")]
    async fn window_pointer_move(
        &self,
        params: Parameters<WindowPointerMoveParams>,
    ) -> Result<CallToolResult, McpError> {
        let compositor = self.compositor.lock().await;
        let WindowPointerMoveParams { id, x, y } = params.0;

        if !compositor.has_window(id) {
            return Ok(window_not_found(id));
        }
        compositor.send_mouse_motion(id, x, y);

        Ok(pretty(json!({
            "success": true,
            "id": id,
            "window_coords": { "x": x, "y": y }
        })))
    }

    #[tool(description = "Send a key press, release or tap to a window, with optional modifiers")]
    async fn window_key(
        &self,
        params: Parameters<WindowKeyParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut compositor = self.compositor.lock().await;
        let params = params.0;
        let id = params.id;

        if !compositor.has_window(id) {
            return Ok(window_not_found(id));
        }
        let Some(code) = keymap::virtual_code_from_name(&params.key) else {
            return Ok(failure(json!({
                "error": "Unknown key",
                "key": params.key
            })));
        };
        let Some(action) = parse_key_action(&params.action) else {
            return Ok(failure(json!({
                "error": "Unknown key action",
                "action": params.action,
                "suggestion": "Use tap, press or release"
            })));
        };

        let mut modifiers = Vec::with_capacity(params.modifiers.len());
        for name in &params.modifiers {
            let code =
                keymap::virtual_code_from_name(name).filter(|c| keymap::modifier_for(*c).is_some());
            match code {
                Some(code) => modifiers.push(code),
                None => {
                    return Ok(failure(json!({
                        "error": "Unknown modifier",
                        "modifier": name
                    })));
                }
            }
        }

        for &modifier in &modifiers {
            compositor.send_key_event(id, modifier, true);
        }
        match action {
            KeyAction::Tap => {
                compositor.send_key_event(id, code, true);
                compositor.send_key_event(id, code, false);
            }
            KeyAction::Press => compositor.send_key_event(id, code, true),
            KeyAction::Release => compositor.send_key_event(id, code, false),
        }
        for &modifier in modifiers.iter().rev() {
            compositor.send_key_event(id, modifier, false);
        }

        Ok(pretty(json!({
            "success": true,
            "id": id,
            "key": params.key,
            "action": params.action,
            "modifiers": params.modifiers,
            "modifier_state": compositor.modifier_state()
        })))
    }

    #[tool(description = "Give a window input focus and raise it")]
    async fn window_focus(
        &self,
        params: Parameters<WindowParams>,
    ) -> Result<CallToolResult, McpError> {
        let compositor = self.compositor.lock().await;
        let id = params.0.id;

        if !compositor.has_window(id) {
            return Ok(window_not_found(id));
        }
        compositor.set_window_focus(id);

        Ok(pretty(json!({
            "success": true,
            "id": id,
            "title": compositor.window_title(id)
        })))
    }

    #[tool(description = "Release every key still held down and clear the modifier state")]
    async fn release_keys(&self) -> Result<CallToolResult, McpError> {
        let mut compositor = self.compositor.lock().await;
        compositor.release_all_keys();

        Ok(pretty(json!({
            "success": true,
            "modifier_state": compositor.modifier_state()
        })))
    }

    #[tool(description = "Describe the headless display session and its capabilities")]
    async fn display_info(&self) -> Result<CallToolResult, McpError> {
        let compositor = self.compositor.lock().await;
        let capabilities = compositor.capabilities();
        let version = |ext: Option<crate::backend::Extension>| {
            ext.map(|e| format!("{}.{}", e.major, e.minor))
        };

        Ok(pretty(json!({
            "initialized": compositor.is_initialized(),
            "display": compositor.display_name(),
            "root_window": compositor.root_window(),
            "server_pid": compositor.server_pid(),
            "composite": version(capabilities.composite),
            "damage": version(capabilities.damage),
            "window_count": compositor.window_ids().len(),
            "modifier_state": compositor.modifier_state()
        })))
    }
}

#[tool_handler]
impl ServerHandler for XmirrorServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "xmirror runs applications on a private headless X display and mirrors \
                 their windows. Use window_list to discover window ids, then \
                 window_screenshot to see a window and window_click / window_key to \
                 drive it.".to_string()
            ),
        }
    }

    async fn initialize(
        &self,
        _request: InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        Ok(self.get_info())
    }
}
