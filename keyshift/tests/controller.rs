use async_trait::async_trait;
use keyshift::{
    Controller, Migration, MigrateError, MigrationState, Result, RunMode, RunStats, Stat,
};
use tracing_test::traced_test;

#[derive(Default)]
struct Scripted {
    needed: bool,
    succeeds: bool,
    fail_prepare: bool,
    record_error: bool,
    calls: Vec<String>,
}

#[async_trait]
impl Migration for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn prepare(&mut self) -> Result<()> {
        self.calls.push("prepare".to_owned());

        if self.fail_prepare {
            return Err(MigrateError::Config("no target".to_owned()));
        }

        Ok(())
    }

    async fn migration_needed(&mut self, _stats: &mut RunStats) -> Result<bool> {
        self.calls.push("migration_needed".to_owned());

        Ok(self.needed)
    }

    async fn migrate(&mut self, dry_run: bool, stats: &mut RunStats) -> Result<bool> {
        self.calls.push(format!("migrate(dry_run={dry_run})"));
        stats.incr(Stat::Processed);

        if self.record_error {
            let err = MigrateError::General {
                key: "customer:x:object".to_owned(),
                message: "boom".to_owned(),
            };
            stats.record_error("customer", "customer:x:object", &err);
        }

        Ok(self.succeeds)
    }
}

fn needed() -> Scripted {
    Scripted {
        needed: true,
        succeeds: true,
        ..Default::default()
    }
}

async fn execute(migration: Scripted, mode: RunMode) -> (keyshift::Outcome, Vec<String>) {
    let mut controller = Controller::new(migration);
    let outcome = controller.execute(mode).await;

    (outcome, controller.into_inner().calls)
}

#[tokio_shared_rt::test]
async fn nothing_to_do() {
    for mode in [RunMode::Check, RunMode::DryRun, RunMode::Run] {
        let (outcome, calls) = execute(Scripted::default(), mode).await;

        assert_eq!(outcome.state, MigrationState::NotNeeded);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(calls, vec!["prepare", "migration_needed"]);
    }
}

#[tokio_shared_rt::test]
async fn check_never_migrates() {
    let (outcome, calls) = execute(needed(), RunMode::Check).await;

    assert_eq!(outcome.state, MigrationState::NeedsMigration);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(calls, vec!["prepare", "migration_needed"]);
}

#[tokio_shared_rt::test]
async fn dry_run_previews() {
    let (outcome, calls) = execute(needed(), RunMode::DryRun).await;

    assert_eq!(outcome.state, MigrationState::DryRunPreview);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(outcome.stats.processed, 1);
    assert_eq!(calls.last().map(String::as_str), Some("migrate(dry_run=true)"));
}

#[tokio_shared_rt::test]
async fn run_applies() {
    let (outcome, calls) = execute(needed(), RunMode::Run).await;

    assert_eq!(outcome.state, MigrationState::Applied);
    assert_eq!(outcome.exit_code(), 0);
    assert_eq!(calls.last().map(String::as_str), Some("migrate(dry_run=false)"));
}

#[tokio_shared_rt::test]
async fn unsuccessful_migrate_fails() {
    let migration = Scripted {
        succeeds: false,
        ..needed()
    };
    let (outcome, _) = execute(migration, RunMode::Run).await;

    assert_eq!(outcome.state, MigrationState::Failed);
    assert_eq!(outcome.error, None);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio_shared_rt::test]
#[traced_test]
async fn prepare_error_fails_the_run() {
    let migration = Scripted {
        fail_prepare: true,
        ..needed()
    };
    let (outcome, calls) = execute(migration, RunMode::Run).await;

    assert_eq!(outcome.state, MigrationState::Failed);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(calls, vec!["prepare"]);
    assert!(outcome.error.unwrap().contains("no target"));
    assert!(logs_contain("no target"));
}

#[tokio_shared_rt::test]
async fn record_errors_fail_the_exit_code() {
    let migration = Scripted {
        record_error: true,
        ..needed()
    };
    let (outcome, _) = execute(migration, RunMode::Run).await;

    assert_eq!(outcome.state, MigrationState::Applied);
    assert_eq!(outcome.exit_code(), 1);

    let summary = outcome.summary(5);
    assert!(summary.contains("scripted [run] applied"));
    assert!(summary.contains("customer:x:object"));
}
