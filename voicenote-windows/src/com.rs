//! Per-thread COM apartment setup.

use std::cell::Cell;

use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};

thread_local! {
    static MTA_READY: Cell<bool> = const { Cell::new(false) };
}

/// Join the multithreaded apartment on the calling thread, once.
///
/// The apartment is left joined for the rest of the thread's life: capture
/// and encoder objects created here are later used from the session worker,
/// which joins the same apartment before its first call.
pub(crate) fn ensure_mta() -> windows::core::Result<()> {
    if MTA_READY.with(Cell::get) {
        return Ok(());
    }
    unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }.ok()?;
    MTA_READY.with(|ready| ready.set(true));
    Ok(())
}

/// RAII guard to call CoUninitialize when dropped.
pub(crate) struct CoUninitializeGuard;

impl Drop for CoUninitializeGuard {
    fn drop(&mut self) {
        unsafe {
            windows::Win32::System::Com::CoUninitialize();
        }
    }
}
