use std::io;

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(windows)]
use winapi::shared::minwindef::FALSE;
#[cfg(windows)]
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
#[cfg(windows)]
use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
#[cfg(windows)]
use winapi::um::winnt::PROCESS_TERMINATE;

pub struct ProcessHelper;

#[cfg(unix)]
impl ProcessHelper {
    /// SIGTERM; lets the process run its shutdown hooks.
    pub fn stop(pid: u32) -> io::Result<()> {
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    pub fn kill(pid: u32) -> io::Result<()> {
        kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

#[cfg(windows)]
impl ProcessHelper {
    /// Windows has no SIGTERM equivalent for console children; both
    /// paths go through TerminateProcess.
    pub fn stop(pid: u32) -> io::Result<()> {
        Self::kill(pid)
    }

    pub fn kill(pid: u32) -> io::Result<()> {
        let handle = unsafe { OpenProcess(PROCESS_TERMINATE, FALSE, pid) };
        if handle == INVALID_HANDLE_VALUE || handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let result = unsafe { TerminateProcess(handle, 1) };
        unsafe { CloseHandle(handle) };
        if result == 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn stop_missing_pid_errors() {
        // pid 0 would signal our own process group; use an unlikely pid
        assert!(ProcessHelper::stop(u32::MAX / 2).is_err());
    }
}
