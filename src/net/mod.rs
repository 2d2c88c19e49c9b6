//! Network task: the event loop and the link watcher feeding it

pub mod event_loop;
pub mod link;

pub use event_loop::{EventLoop, LoopStats};
pub use link::{LinkProbe, LinkState, LinkWatcher, NetworkLinkMonitor, RouteProbe};
