//! The uniform control surface the manager drives.

use evochora_engine::SimulationController;
use evochora_indexer::IndexerController;
use evochora_persistence::PersistenceController;

/// What the manager needs from every service controller.
///
/// Each method blocks until the service acknowledges at its atomic-work
/// boundary; `false` means the worker has already exited.
pub trait ServiceControl: Send {
    fn pause(&self) -> bool;
    fn resume(&self) -> bool;
    fn stop(&self) -> bool;
}

impl ServiceControl for SimulationController {
    fn pause(&self) -> bool {
        SimulationController::pause(self)
    }

    fn resume(&self) -> bool {
        SimulationController::resume(self)
    }

    fn stop(&self) -> bool {
        SimulationController::stop(self)
    }
}

impl ServiceControl for PersistenceController {
    fn pause(&self) -> bool {
        PersistenceController::pause(self)
    }

    fn resume(&self) -> bool {
        PersistenceController::resume(self)
    }

    fn stop(&self) -> bool {
        PersistenceController::stop(self)
    }
}

impl ServiceControl for IndexerController {
    fn pause(&self) -> bool {
        IndexerController::pause(self)
    }

    fn resume(&self) -> bool {
        IndexerController::resume(self)
    }

    fn stop(&self) -> bool {
        IndexerController::stop(self)
    }
}
