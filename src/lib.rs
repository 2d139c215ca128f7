//! xmirror - headless X11 window mirroring
//!
//! Runs applications on a private headless X server and mirrors each of their
//! top-level windows into an RGBA buffer a host can draw, forwarding host
//! pointer and keyboard input back to the windows.
//!
//! ## Features
//!
//! - Display bootstrap (free display search, Xvfb launch, readiness polling)
//! - Window tracking driven by structure notifications
//! - Off-screen capture through Composite, gated by Damage when available
//! - Synthetic pointer and keyboard input with modifier tracking
//! - MCP bridge serving the mirrored windows as tools
//!
//! [`compositor::Compositor`] is the entry point for embedding hosts.

pub mod backend;
pub mod capture;
pub mod compositor;
pub mod config;
pub mod core;
pub mod error;
pub mod input;
pub mod server;
pub mod session;
