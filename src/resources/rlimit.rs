//! setrlimit-based process ceilings
//!
//! The ceilings are process-wide and irreversible: once applied they hold for
//! the rest of the process lifetime, so they are applied at most once.

use crate::errors::{Result, SandboxError};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};

/// Default CPU time ceiling in seconds (RLIMIT_CPU)
pub const DEFAULT_MAX_CPU_SECONDS: u64 = 10;

/// Default address space ceiling in bytes (RLIMIT_AS)
pub const DEFAULT_MAX_ADDRESS_SPACE: u64 = 500 * 1024 * 1024;

/// Extra CPU seconds granted so the wall-clock deadline always expires first
pub const CPU_GRACE_SECONDS: u64 = 1;

static LIMITS_APPLIED: AtomicBool = AtomicBool::new(false);

/// CPU time and address space ceilings for the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Maximum CPU time in seconds (RLIMIT_CPU)
    pub max_cpu_seconds: u64,
    /// Maximum virtual address space in bytes (RLIMIT_AS)
    pub max_address_space_bytes: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_cpu_seconds: DEFAULT_MAX_CPU_SECONDS,
            max_address_space_bytes: DEFAULT_MAX_ADDRESS_SPACE,
        }
    }
}

/// What [`ResourceLimits::apply_once`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStatus {
    /// Ceilings were set by this call
    Applied,
    /// Ceilings were already set earlier in this process
    AlreadyApplied,
}

impl ResourceLimits {
    /// Apply both ceilings (soft = hard) unless this process already did.
    ///
    /// The CPU ceiling grants `max_cpu_seconds` plus [`CPU_GRACE_SECONDS`] on
    /// top of the CPU time the process has already used. A ceiling that is already lower than the
    /// requested value is kept, so this never raises an existing limit.
    pub fn apply_once(&self) -> Result<LimitStatus> {
        if LIMITS_APPLIED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("resource limits already applied, skipping");
            return Ok(LimitStatus::AlreadyApplied);
        }

        if let Err(e) = self.apply() {
            // Nothing was made permanent; allow a later attempt.
            LIMITS_APPLIED.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(LimitStatus::Applied)
    }

    /// Whether `apply_once` has succeeded in this process
    pub fn applied() -> bool {
        LIMITS_APPLIED.load(Ordering::SeqCst)
    }

    fn apply(&self) -> Result<()> {
        // RLIMIT_CPU counts the whole process; budget the time from here on.
        let cpu_budget = consumed_cpu_seconds()?
            .saturating_add(self.max_cpu_seconds)
            .saturating_add(CPU_GRACE_SECONDS);
        let cpu = lower_rlimit(libc::RLIMIT_CPU, cpu_budget)?;
        let mem = lower_rlimit(libc::RLIMIT_AS, self.max_address_space_bytes)?;
        debug!("resource limits applied: cpu={}s address_space={}B", cpu, mem);
        Ok(())
    }
}

fn resource_name(resource: libc::__rlimit_resource_t) -> &'static str {
    match resource {
        libc::RLIMIT_AS => "RLIMIT_AS",
        libc::RLIMIT_CPU => "RLIMIT_CPU",
        _ => "UNKNOWN",
    }
}

/// CPU time used by this process so far, rounded up to whole seconds
pub fn consumed_cpu_seconds() -> Result<u64> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if ret != 0 {
        return Err(SandboxError::Syscall(format!(
            "getrusage failed: {}",
            std::io::Error::last_os_error()
        )));
    }

    let micros = |tv: libc::timeval| tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64;
    let used = micros(usage.ru_utime) + micros(usage.ru_stime);
    Ok(used.div_ceil(1_000_000))
}

/// Current hard limit for `resource`
pub fn current_hard_limit(resource: libc::__rlimit_resource_t) -> Result<u64> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    let ret = unsafe { libc::getrlimit(resource, &mut rlim) };
    if ret != 0 {
        return Err(SandboxError::Syscall(format!(
            "getrlimit({}) failed: {}",
            resource_name(resource),
            std::io::Error::last_os_error()
        )));
    }
    Ok(rlim.rlim_max)
}

fn lower_rlimit(resource: libc::__rlimit_resource_t, limit: u64) -> Result<u64> {
    let effective = limit.min(current_hard_limit(resource)?);
    let rlim = libc::rlimit {
        rlim_cur: effective,
        rlim_max: effective,
    };

    let ret = unsafe { libc::setrlimit(resource, &rlim) };
    if ret != 0 {
        return Err(SandboxError::Syscall(format!(
            "setrlimit({}) failed: {}",
            resource_name(resource),
            std::io::Error::last_os_error()
        )));
    }
    Ok(effective)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_match_reference_configuration() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.max_cpu_seconds, 10);
        assert_eq!(limits.max_address_space_bytes, 524_288_000);
    }

    #[test]
    fn test_current_hard_limit_is_readable() {
        assert!(current_hard_limit(libc::RLIMIT_CPU).is_ok());
        assert!(current_hard_limit(libc::RLIMIT_AS).is_ok());
    }

    #[test]
    fn test_consumed_cpu_is_small_for_tests() {
        let used = consumed_cpu_seconds().unwrap();
        assert!(used < 3600);
    }

    #[test]
    fn test_resource_names() {
        assert_eq!(resource_name(libc::RLIMIT_AS), "RLIMIT_AS");
        assert_eq!(resource_name(libc::RLIMIT_CPU), "RLIMIT_CPU");
    }
}
