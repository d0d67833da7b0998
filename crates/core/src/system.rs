use std::path::Path;

/// Kill a process by PID (cross-platform).
pub fn kill_pid(pid: u32) {
    log::info!("Killing process PID: {}", pid);
    #[cfg(unix)]
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
    #[cfg(windows)]
    {
        let mut cmd = std::process::Command::new("taskkill");
        cmd.args(["/F", "/PID", &pid.to_string()]);
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(0x08000000);
        let _ = cmd.output();
    }
}

/// Write a PID file, creating its directory.
pub fn write_pid_file(path: &Path, pid: u32) -> Result<(), String> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("Failed to create PID file directory: {}", e))?;
    }
    std::fs::write(path, pid.to_string()).map_err(|e| format!("Failed to write PID file: {}", e))
}

pub fn read_pid_file(path: &Path) -> Result<u32, String> {
    let pid_str =
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read PID file: {}", e))?;
    pid_str
        .trim()
        .parse()
        .map_err(|e| format!("Invalid PID: {}", e))
}

/// Mask a credential for log output: `abcd****wxyz`.
pub fn mask_credential(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.is_empty() {
        return "<empty>".to_string();
    }
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}
