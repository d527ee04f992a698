//! Database health inspection command.

use crate::error::Result;
use crate::storage::{HealthStatus, Storage};

/// Gather aggregate health: integrity, stats, fragmentation, and
/// maintenance recommendations.
pub fn execute(storage: &dyn Storage) -> Result<HealthStatus> {
    storage.get_health_status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HealthLevel, MemoryStorage, MonitoringRun};

    #[test]
    fn test_healthy_database() {
        let storage = MemoryStorage::new();
        let health = execute(&storage).unwrap();
        assert!(health.healthy);
        assert_eq!(health.level, HealthLevel::Excellent);
    }

    #[test]
    fn test_orphans_degrade_health() {
        let storage = MemoryStorage::new();
        storage.set_enforce_references(false).unwrap();
        let mut run = MonitoringRun::new("ghost");
        storage.save_monitoring_run(&mut run).unwrap();
        storage.set_enforce_references(true).unwrap();

        let health = execute(&storage).unwrap();
        assert!(!health.healthy);
        assert_eq!(health.level, HealthLevel::Warning);
        assert!(health.recommendations.iter().any(|r| r.action == "repair"));
    }
}
