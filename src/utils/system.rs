// src/utils/system.rs: System functions

use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;
use rand::Rng;
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::time::sleep;

use crate::config::defs::MemorySize;


/// Determines how many physical cores are present and how busy they are.
///
/// # Arguments
///
/// * `max_cpus` - CPU ceiling requested on the command line.
///
/// # Returns
///
/// Result<(usize, usize, f32)> physical cores, usable cores (capped by max_cpus), current cpu usage
pub async fn detect_cores_and_load(max_cpus: usize) -> Result<(usize, usize, f32)> {
    let refresh_kind = RefreshKind::nothing().with_cpu(Default::default());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_all();
    let physical_cores = System::physical_core_count().unwrap_or(1);
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    sleep(Duration::from_millis(100)).await;
    system.refresh_cpu_specifics(CpuRefreshKind::nothing().with_cpu_usage());
    let cpu_load = system.global_cpu_usage();
    let usable = physical_cores.min(max_cpus).max(1);
    Ok((physical_cores, usable, cpu_load))
}


/// Finds the amount of total and available RAM, keyed to OS
///
/// # Returns
///
/// Result<(u64, u64)> total ram, available ram (bytes)
pub fn detect_ram() -> Result<(u64, u64)> {
    let (total_ram, available_ram) = if cfg!(target_os = "macos") {
        let refresh_kind = RefreshKind::nothing().with_memory(Default::default());
        let mut system = System::new_with_specifics(refresh_kind);
        system.refresh_memory_specifics(MemoryRefreshKind::everything());
        let total = system.total_memory();
        let used = system.used_memory();
        (total, total.saturating_sub(used))
    } else {
        let mut system = System::new_with_specifics(RefreshKind::nothing().with_memory(Default::default()));
        system.refresh_memory();
        (system.total_memory(), system.available_memory())
    };

    if total_ram == 0 || available_ram == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }

    Ok((total_ram, available_ram))
}


/// Warns when the requested ceilings exceed what the machine has. Never fails: the
/// ceilings are passed through to BEAST unchanged.
///
/// # Arguments
///
/// * `max_cpus` - Requested CPU ceiling.
/// * `max_memory` - Requested memory ceiling.
/// * `physical_cores` - Detected physical cores.
/// * `total_ram` - Detected RAM in bytes.
///
/// # Returns
/// The warnings issued, in order.
pub fn check_ceilings(max_cpus: usize, max_memory: MemorySize, physical_cores: usize, total_ram: u64) -> Vec<String> {
    let mut warnings = Vec::new();
    if max_cpus > physical_cores {
        warnings.push(format!(
            "--max-cpus {} exceeds the {} physical cores on this machine",
            max_cpus, physical_cores
        ));
    }
    if max_memory.bytes() > total_ram {
        warnings.push(format!(
            "--max-memory {} exceeds the {} of RAM on this machine",
            max_memory,
            MemorySize::from_bytes(total_ram)
        ));
    }
    for w in &warnings {
        warn!("{}", w);
    }
    warnings
}


/// Returns the user's seed, or a fresh one from the thread RNG. BEAST takes a
/// positive seed, so 0 is never generated.
pub fn resolve_seed(seed: Option<u64>) -> u64 {
    seed.unwrap_or_else(|| rand::rng().random_range(1..=i64::MAX as u64))
}


/// Number of tasks allowed to run at once when --max-forks is not given.
pub fn default_max_forks(max_forks: Option<usize>, usable_cores: usize) -> usize {
    max_forks.unwrap_or(usable_cores).max(1)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_seed() {
        assert_eq!(resolve_seed(Some(42)), 42);
        let seed = resolve_seed(None);
        assert!(seed >= 1 && seed <= i64::MAX as u64);
    }

    #[test]
    fn test_default_max_forks() {
        assert_eq!(default_max_forks(None, 4), 4);
        assert_eq!(default_max_forks(Some(2), 4), 2);
        assert_eq!(default_max_forks(None, 0), 1);
    }

    #[test]
    fn test_check_ceilings() {
        let gb = 1024 * 1024 * 1024;
        let mem: MemorySize = "8 GB".parse().unwrap();
        assert!(check_ceilings(4, mem, 8, 16 * gb).is_empty());
        let warnings = check_ceilings(16, mem, 8, 4 * gb);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("--max-cpus 16"));
        assert!(warnings[1].contains("--max-memory 8 GB"));
    }

    #[tokio::test]
    async fn test_detect_cores_caps_at_request() -> Result<()> {
        let (physical, usable, _) = detect_cores_and_load(1).await?;
        assert!(physical >= 1);
        assert_eq!(usable, 1);
        Ok(())
    }
}
