use windows::Win32::System::Com::*;

/// RAII guard that balances a successful `CoInitializeEx`.
pub(crate) struct ComGuard;

impl ComGuard {
    /// Join the multithreaded apartment on the current thread.
    ///
    /// Returns `None` when the thread already lives in another apartment;
    /// COM is still usable there, but this guard must not uninitialize it.
    pub(crate) fn enter() -> Option<Self> {
        let result = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        match result.ok() {
            Ok(()) => Some(Self),
            Err(e) => {
                log::debug!("CoInitializeEx skipped: {}", e);
                None
            }
        }
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}
