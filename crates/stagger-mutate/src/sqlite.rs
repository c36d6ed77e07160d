//! `MutationBackend` for the SQLite capacity catalog.

use stagger_core::Result;
use stagger_store::SqliteCatalog;
use tracing::debug;

use crate::backend::MutationBackend;
use crate::command::MutationCommand;

impl MutationBackend for SqliteCatalog {
    fn apply(&self, command: &MutationCommand) -> Result<()> {
        self.set_max_capacity(
            command.resource_id(),
            command.target(),
            command.priority().lock_wait(),
        )
    }

    fn cancel(&self, command: &MutationCommand) -> Result<()> {
        if self.interrupt(command.resource_id()) {
            debug!("Interrupted in-flight update: {}", command);
        } else {
            debug!("No in-flight update to interrupt: {}", command);
        }
        Ok(())
    }

    fn current_capacity(&self, resource_id: &str) -> Result<u64> {
        SqliteCatalog::current_capacity(self, resource_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Priority;
    use stagger_store::StoreRecord;

    #[test]
    fn test_apply_through_trait() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = SqliteCatalog::open(dir.path()).unwrap();
        catalog.upsert_store(&StoreRecord::eligible("sales", 2000)).unwrap();

        let backend: &dyn MutationBackend = &catalog;
        let cmd = MutationCommand::build("sales", 1000, Priority::Low).unwrap();
        backend.apply(&cmd).unwrap();
        assert_eq!(backend.current_capacity("sales").unwrap(), 1000);

        // Nothing in flight: cancel is a quiet no-op.
        backend.cancel(&cmd).unwrap();
    }
}
