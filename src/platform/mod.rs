//! Platform-specific process signalling

use anyhow::Result;

/// Ask a process (and its process group on Unix) to terminate gracefully
pub fn terminate_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGTERM)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        anyhow::bail!("Graceful termination is not supported on this platform")
    }
}

/// Force kill a process group (Unix only; elsewhere the child handle is killed)
pub fn kill_process(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        signal_group(pid, libc::SIGKILL)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        anyhow::bail!("Process group kill is not supported on this platform")
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> Result<()> {
    // Children are spawned as process group leaders, so pgid == pid
    let result = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if result == 0 {
        return Ok(());
    }

    // Fall back to the process itself if it left its group
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to signal process {}: {}",
            pid,
            std::io::Error::last_os_error()
        )
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::CommandExt;

    #[test]
    fn signals_reach_a_spawned_group() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .process_group(0)
            .spawn()
            .unwrap();

        terminate_process(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn signalling_a_missing_process_fails() {
        // pid_max on Linux never reaches this value
        assert!(terminate_process(0x3fff_fff0).is_err());
    }
}
