//! Watchdog: fails a test that hangs instead of letting it stall the whole run.

use super::TestResult;
use color_eyre::eyre::bail;
use std::{
    panic,
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::Duration,
};

const TIMEOUT: Duration = Duration::from_secs(30);

pub fn run_under_wachdog(f: impl (FnOnce() -> TestResult) + Send + 'static) -> TestResult {
    let (tx, rx) = mpsc::channel();
    let body = thread::Builder::new()
        .name("test body".to_owned())
        .spawn(move || {
            let _ = tx.send(f());
        })?;
    match rx.recv_timeout(TIMEOUT) {
        Ok(result) => {
            let _ = body.join();
            result
        }
        // The body is left running; the process exits once the harness is done with it.
        Err(RecvTimeoutError::Timeout) => bail!("test timed out after {TIMEOUT:?}"),
        Err(RecvTimeoutError::Disconnected) => match body.join() {
            Err(payload) => panic::resume_unwind(payload),
            Ok(()) => bail!("test body exited without reporting a result"),
        },
    }
}
