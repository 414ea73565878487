//! Desktop notification adapter.
//!
//! Cliphop runs headless as often as not, so notifications are written to
//! the log at `info` level.  A tray front end can supply its own
//! [`Notifier`] instead.

use tracing::info;

use crate::application::sync_controller::Notifier;

/// [`Notifier`] that writes every notification to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str) {
        info!(target: "cliphop::notify", "[{title}] {message}");
    }
}
