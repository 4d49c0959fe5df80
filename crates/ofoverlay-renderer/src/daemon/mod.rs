//! Renderer daemon: dirty tracking and the reconciliation loop.

mod renderer_daemon;

pub use renderer_daemon::{DirtyTracker, RendererDaemon, RendererDaemonConfig};
