//! Migrations applied at every startup, in order.

use keel_state::{MigrationOutcome, MigrationRunner};
use tracing::info;

use crate::agent::Agent;

/// A named one-shot data migration.
pub struct Migration {
    pub name: &'static str,
    pub run: fn(&Agent) -> anyhow::Result<()>,
}

/// Registered migrations. Names are permanent: renaming one reruns it.
pub const MIGRATIONS: &[Migration] = &[Migration {
    name: "drop-stage-entries-without-job",
    run: drop_stage_entries_without_job,
}];

/// Apply every registered migration, stopping at the first failure.
///
/// Returns how many ran in this call.
pub fn run_all(runner: &MigrationRunner, agent: &Agent) -> anyhow::Result<usize> {
    let mut applied = 0;
    for migration in MIGRATIONS {
        let outcome = runner.apply(migration.name, || (migration.run)(agent))?;
        if outcome == MigrationOutcome::Applied {
            applied += 1;
        }
    }
    info!(applied, registered = MIGRATIONS.len(), "migrations complete");
    Ok(applied)
}

/// Remove stage entries left behind by deleted jobs.
fn drop_stage_entries_without_job(agent: &Agent) -> anyhow::Result<()> {
    let removed = agent.builds().purge_orphaned_stage_entries()?;
    info!(removed, "stage entries without a job removed");
    Ok(())
}
