//! System clipboard adapter.
//!
//! # Why a dedicated thread? (for beginners)
//!
//! Desktop clipboards are owned by a window-system connection.  On X11 the
//! connection also has to stay alive to *serve* the text we copied to other
//! applications, and on some platforms the handle must not move between
//! threads.  [`SystemClipboard`] therefore parks one `arboard::Clipboard` on
//! a named thread and talks to it through a command channel:
//!
//! ```text
//! SyncController ──Command::Get/Set──► "cliphop-clipboard" thread ──► arboard
//!               ◄──────── reply ──────
//! ```
//!
//! The thread exits when the last [`SystemClipboard`] handle is dropped.

pub mod mock;

use std::sync::mpsc;
use std::thread;

use tracing::{debug, info};

use crate::application::sync_controller::{Clipboard, ClipboardError};

enum Command {
    Get(mpsc::Sender<Result<String, ClipboardError>>),
    Set(String, mpsc::Sender<Result<(), ClipboardError>>),
}

/// Clipboard backed by the desktop session via `arboard`.
pub struct SystemClipboard {
    commands: mpsc::Sender<Command>,
}

impl SystemClipboard {
    /// Connects to the system clipboard.
    ///
    /// # Errors
    ///
    /// Returns [`ClipboardError::Unavailable`] when there is no desktop
    /// session (for example a headless server) or the worker thread cannot
    /// be spawned.
    pub fn open() -> Result<Self, ClipboardError> {
        let (commands, rx) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), ClipboardError>>();

        thread::Builder::new()
            .name("cliphop-clipboard".to_string())
            .spawn(move || {
                let mut clipboard = match arboard::Clipboard::new() {
                    Ok(c) => {
                        let _ = ready_tx.send(Ok(()));
                        c
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(ClipboardError::Unavailable(e.to_string())));
                        return;
                    }
                };

                for command in rx {
                    match command {
                        Command::Get(reply) => {
                            let _ = reply.send(read_text(&mut clipboard));
                        }
                        Command::Set(text, reply) => {
                            let result = clipboard
                                .set_text(text)
                                .map_err(|e| ClipboardError::Access(e.to_string()));
                            let _ = reply.send(result);
                        }
                    }
                }
                debug!("clipboard thread exiting");
            })
            .map_err(|e| ClipboardError::Unavailable(format!("spawn clipboard thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| ClipboardError::Unavailable("clipboard thread exited".to_string()))??;

        info!("system clipboard connected");
        Ok(Self { commands })
    }

    fn request<T>(
        &self,
        make: impl FnOnce(mpsc::Sender<Result<T, ClipboardError>>) -> Command,
    ) -> Result<T, ClipboardError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| ClipboardError::Unavailable("clipboard thread stopped".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| ClipboardError::Unavailable("clipboard thread stopped".to_string()))?
    }
}

fn read_text(clipboard: &mut arboard::Clipboard) -> Result<String, ClipboardError> {
    match clipboard.get_text() {
        Ok(text) => Ok(text),
        // Empty clipboard, or non-text content such as an image.
        Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
        Err(e) => Err(ClipboardError::Access(e.to_string())),
    }
}

impl Clipboard for SystemClipboard {
    fn get(&self) -> Result<String, ClipboardError> {
        self.request(Command::Get)
    }

    fn set(&self, text: &str) -> Result<(), ClipboardError> {
        let text = text.to_owned();
        self.request(move |reply| Command::Set(text, reply))
    }
}
