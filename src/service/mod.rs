// src/service/mod.rs

//! User-level service manager integration
//!
//! In experimental systemd mode, `eden start` registers edenfs as an
//! instance of the `fb-edenfs@.service` user unit template. The instance
//! name is the systemd path escape of the eden state directory, so each
//! state directory gets its own unit.
//!
//! The [`ServiceManager`] trait is the seam between the launcher and the
//! service manager; [`SystemctlUserManager`] drives `systemctl --user`.

mod systemctl;
pub mod unit;

use crate::Result;
use std::path::Path;

pub use systemctl::SystemctlUserManager;
pub use unit::{
    escape_path, unescape_path, EdenFsUnit, UnitEnvironment, ENVIRONMENT_FILE_NAME,
    TEMPLATE_UNIT_NAME,
};

/// Active state of a unit that is up
pub const ACTIVE_STATE_ACTIVE: &str = "active";

/// Sub-state of a service whose main process is running
pub const SUB_STATE_RUNNING: &str = "running";

/// Operations the launcher needs from a user service manager
pub trait ServiceManager {
    /// Re-read unit files
    fn daemon_reload(&self) -> Result<()>;

    /// Start a unit, returning once the start job finished
    fn start_unit(&self, unit: &str) -> Result<()>;

    /// Stop a unit
    fn stop_unit(&self, unit: &str) -> Result<()>;

    /// Query a unit's `ActiveState` (e.g. "active", "inactive", "failed")
    fn query_active_state(&self, unit: &str) -> Result<String>;

    /// Query a unit's `SubState` (e.g. "running", "dead")
    fn query_sub_state(&self, unit: &str) -> Result<String>;

    /// Whether the service manager can be reached at all
    fn is_available(&self) -> bool {
        true
    }
}

/// The edenfs service for one eden state directory
pub struct EdenFsSystemdService<'a, M: ServiceManager + ?Sized> {
    manager: &'a M,
    unit: EdenFsUnit,
}

impl<'a, M: ServiceManager + ?Sized> EdenFsSystemdService<'a, M> {
    /// Service handle for `eden_dir` (must be absolute)
    pub fn for_eden_dir(manager: &'a M, eden_dir: &Path) -> Result<Self> {
        Ok(Self {
            manager,
            unit: EdenFsUnit::for_eden_dir(eden_dir)?,
        })
    }

    /// Unit description
    pub fn unit(&self) -> &EdenFsUnit {
        &self.unit
    }

    /// Start the unit
    pub fn start(&self) -> Result<()> {
        self.manager.start_unit(&self.unit.unit_name())
    }

    /// Stop the unit
    pub fn stop(&self) -> Result<()> {
        self.manager.stop_unit(&self.unit.unit_name())
    }

    /// Current `ActiveState`
    pub fn query_active_state(&self) -> Result<String> {
        self.manager.query_active_state(&self.unit.unit_name())
    }

    /// Current `SubState`
    pub fn query_sub_state(&self) -> Result<String> {
        self.manager.query_sub_state(&self.unit.unit_name())
    }

    /// Whether the unit is `active` and `running`
    pub fn is_running(&self) -> Result<bool> {
        Ok(self.query_active_state()? == ACTIVE_STATE_ACTIVE
            && self.query_sub_state()? == SUB_STATE_RUNNING)
    }
}

impl<M: ServiceManager + ?Sized> std::fmt::Display for EdenFsSystemdService<'_, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.unit.unit_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    /// In-memory service manager recording started units
    #[derive(Default)]
    struct RecordingManager {
        running: RefCell<BTreeSet<String>>,
        reloads: RefCell<usize>,
    }

    impl ServiceManager for RecordingManager {
        fn daemon_reload(&self) -> Result<()> {
            *self.reloads.borrow_mut() += 1;
            Ok(())
        }

        fn start_unit(&self, unit: &str) -> Result<()> {
            self.running.borrow_mut().insert(unit.to_string());
            Ok(())
        }

        fn stop_unit(&self, unit: &str) -> Result<()> {
            self.running.borrow_mut().remove(unit);
            Ok(())
        }

        fn query_active_state(&self, unit: &str) -> Result<String> {
            Ok(if self.running.borrow().contains(unit) { "active" } else { "inactive" }.to_string())
        }

        fn query_sub_state(&self, unit: &str) -> Result<String> {
            Ok(if self.running.borrow().contains(unit) { "running" } else { "dead" }.to_string())
        }
    }

    #[test]
    fn test_service_lifecycle() {
        let manager = RecordingManager::default();
        let service = EdenFsSystemdService::for_eden_dir(&manager, Path::new("/home/user/.eden")).unwrap();

        assert_eq!(service.to_string(), "fb-edenfs@home-user-.eden.service");
        assert!(!service.is_running().unwrap());

        service.start().unwrap();
        assert_eq!(
            (service.query_active_state().unwrap(), service.query_sub_state().unwrap()),
            ("active".to_string(), "running".to_string())
        );

        service.stop().unwrap();
        assert_eq!(service.query_sub_state().unwrap(), "dead");
    }

    #[test]
    fn test_service_requires_absolute_dir() {
        let manager = RecordingManager::default();
        assert!(EdenFsSystemdService::for_eden_dir(&manager, Path::new("relative/eden")).is_err());
    }
}
