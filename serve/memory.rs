use log::{debug, info};
use sysinfo::{ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Resident set size of this process, in bytes.
pub fn resident_memory_bytes() -> Option<u64> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|process| process.memory())
}

/// Logs the current resident memory at info level.
pub fn log_memory_usage(context: &str) {
    match resident_memory_bytes() {
        Some(bytes) => info!(
            "Current memory usage {context}: {:.2} MB",
            bytes as f64 / BYTES_PER_MB
        ),
        None => debug!("Memory usage unavailable {context}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_reports_nonzero_memory() {
        if let Some(bytes) = resident_memory_bytes() {
            assert!(bytes > 0);
        }
    }
}
