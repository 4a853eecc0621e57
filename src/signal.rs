//! Ctrl+C handling for cooperative shutdown.
//!
//! The first Ctrl+C raises a shared flag. The ingestion engine checks it
//! between items and, once raised, stops taking new items but still sweeps the
//! staging area, saves the cache and completes the run folder. A second Ctrl+C
//! abandons the run immediately, leaving the folder marked `_IN_PROGRESS`.
//!
//! ```rust,no_run
//! use bidstage::signal::install_handler;
//!
//! let handler = install_handler().expect("signal handler");
//! let stop = handler.get_flag();
//! // hand `stop` to IngestionEngine::with_shutdown_flag
//! # let _ = stop;
//! ```

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Cloneable view of the process stop request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandler {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Ask the current run to close, as a first Ctrl+C would.
    pub fn request_shutdown(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Shared flag for [`IngestionEngine::with_shutdown_flag`](crate::engine::IngestionEngine::with_shutdown_flag).
    #[must_use]
    pub fn get_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }

    pub fn reset(&self) {
        self.requested.store(false, Ordering::Release);
    }

    /// Raise the flag; returns `true` if it was already raised.
    fn press(&self) -> bool {
        self.requested.swap(true, Ordering::AcqRel)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("cannot install Ctrl+C handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static INSTALLED: OnceLock<ShutdownHandler> = OnceLock::new();

/// Hook Ctrl+C (and SIGTERM/SIGHUP) for this process.
///
/// The hook is installed once; later calls hand back the same handler with
/// its flag lowered, so `run_app` can run several times in one process. If
/// some other code already owns the signal, the returned handler is not
/// hooked but still honours [`ShutdownHandler::request_shutdown`].
///
/// # Errors
///
/// Never fails today; callers treat an error as fatal so the signature keeps
/// room for platforms where hooking must succeed.
pub fn install_handler() -> Result<ShutdownHandler, SignalError> {
    if let Some(existing) = INSTALLED.get() {
        existing.reset();
        return Ok(existing.clone());
    }

    let handler = ShutdownHandler::new();
    let hooked = handler.clone();
    let result = ctrlc::set_handler(move || {
        let mut stderr = std::io::stderr();
        if hooked.press() {
            let _ = writeln!(stderr, "\nSecond interrupt, abandoning the run (folder stays _IN_PROGRESS)");
            std::process::exit(130);
        }
        log::info!("Interrupt received, closing the run after the current item");
        let _ = writeln!(stderr, "\nInterrupted. Finishing the current item, then closing the run...");
        let _ = stderr.flush();
    });

    let handler = match result {
        Ok(()) => INSTALLED.get_or_init(|| handler),
        Err(err) => {
            log::debug!("Ctrl+C not hooked ({err}); shutdown only on request");
            INSTALLED.get_or_init(ShutdownHandler::new)
        }
    };
    handler.reset();
    Ok(handler.clone())
}
