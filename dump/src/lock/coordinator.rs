use config::shared::LockConfig;
use tracing::{error, info, warn};

use crate::bail;
use crate::client::{DumpConnection, ServerError};
use crate::concurrency::shutdown::ShutdownRx;
use crate::context::ErrorCounter;
use crate::discovery::Discovery;
use crate::error::{DumpResult, ErrorKind};
use crate::lock::{LongQueryGuard, lock_tables_statement};
use crate::server::{ServerInfo, ServerKind};
use crate::types::QualifiedTableName;

/// Attempts made by `LOCK TABLE` over every table before giving up.
const LOCK_ALL_TABLES_ATTEMPTS: usize = 4;

/// Lock actually held by the main connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockMode {
    /// `LOCK TABLES FOR BACKUP` and `LOCK BINLOG FOR BACKUP`.
    BackupLocks,
    /// One `LOCK TABLE ... READ` statement over these tables.
    LockAllTables(Vec<QualifiedTableName>),
    /// `FLUSH TABLES WITH READ LOCK`.
    FlushWithReadLock,
    /// Nothing is held: locks are disabled, unsupported, or could not be taken.
    None,
}

/// Proof that a lock was acquired. Consumed by [`LockCoordinator::release`].
#[derive(Debug)]
#[must_use = "locks are held until the handle is released"]
pub struct LockHandle {
    mode: LockMode,
}

impl LockHandle {
    pub fn mode(&self) -> &LockMode {
        &self.mode
    }

    /// Whether releasing the handle issues any statement.
    pub fn holds_lock(&self) -> bool {
        self.mode != LockMode::None
    }

    /// Whether the main connection holds per-table locks, which a transaction would drop.
    pub fn holds_table_locks(&self) -> bool {
        matches!(self.mode, LockMode::LockAllTables(_))
    }
}

/// Acquires the lightest lock that still guarantees a consistent dump.
///
/// Preference order is backup locks, then per-table locks when configured, then the global read
/// lock. Distributed servers are never locked; their consistency comes from the snapshot token.
#[derive(Debug)]
pub struct LockCoordinator<'a> {
    config: &'a LockConfig,
    errors: &'a ErrorCounter,
}

impl<'a> LockCoordinator<'a> {
    pub fn new(config: &'a LockConfig, errors: &'a ErrorCounter) -> Self {
        Self { config, errors }
    }

    /// Runs the long query guard and takes the lock on `connection`.
    ///
    /// Fatal conditions are a blocked guard and a per-table lock that keeps failing. Backup and
    /// global lock failures are counted and degrade consistency.
    pub async fn acquire<C, D>(
        &self,
        connection: &mut C,
        server: &ServerInfo,
        discovery: &D,
        shutdown_rx: &mut ShutdownRx,
    ) -> DumpResult<LockHandle>
    where
        C: DumpConnection,
        D: Discovery<C>,
    {
        if self.config.no_locks {
            warn!("executing without locks, the dump will not be consistent");
            return Ok(LockHandle {
                mode: LockMode::None,
            });
        }

        LongQueryGuard::new(&self.config.long_query)
            .check(connection, shutdown_rx)
            .await?;

        if server.kind == ServerKind::TiDb {
            info!("skipping locks on a distributed server");
            return Ok(LockHandle {
                mode: LockMode::None,
            });
        }

        if self.backup_locks_available(connection, server).await {
            info!("using backup locks");
            if self.take_backup_locks(connection).await {
                return Ok(LockHandle {
                    mode: LockMode::BackupLocks,
                });
            }

            warn!("falling back to the global read lock");
        } else if self.config.lock_all_tables {
            let tables = match discovery.lockable_tables(connection).await {
                Ok(tables) => tables,
                Err(err) => {
                    error!(error = %err, "could not list the tables to lock");
                    self.errors.increment();
                    Vec::new()
                }
            };

            let locked = lock_all_tables(connection, tables).await?;
            let mode = if locked.is_empty() {
                LockMode::None
            } else {
                LockMode::LockAllTables(locked)
            };

            return Ok(LockHandle { mode });
        }

        if let Err(err) = connection.execute("FLUSH TABLES WITH READ LOCK").await {
            error!(error = %err, "could not acquire the global read lock, the dump will not be consistent");
            self.errors.increment();

            return Ok(LockHandle {
                mode: LockMode::None,
            });
        }

        info!("global read lock acquired");

        Ok(LockHandle {
            mode: LockMode::FlushWithReadLock,
        })
    }

    /// Releases the lock held by `handle`. Failures are counted.
    pub async fn release<C>(&self, connection: &mut C, handle: LockHandle)
    where
        C: DumpConnection,
    {
        let statements: &[&str] = match handle.mode {
            LockMode::None => return,
            LockMode::BackupLocks => &["UNLOCK TABLES", "UNLOCK BINLOG"],
            LockMode::LockAllTables(_) | LockMode::FlushWithReadLock => &["UNLOCK TABLES"],
        };

        for statement in statements {
            if let Err(err) = connection.execute(statement).await {
                error!(statement, error = %err, "could not release lock");
                self.errors.increment();
            }
        }

        info!("locks released");
    }

    async fn backup_locks_available<C>(&self, connection: &mut C, server: &ServerInfo) -> bool
    where
        C: DumpConnection,
    {
        if self.config.no_backup_locks {
            return false;
        }

        // Percona Server 8 removed `LOCK BINLOG FOR BACKUP`.
        if server.is_percona_8() {
            info!("disabling backup locks on Percona Server 8");
            return false;
        }

        matches!(
            connection.query("SELECT @@have_backup_locks").await,
            Ok(result) if !result.is_empty()
        )
    }

    /// Returns whether both backup locks are held.
    async fn take_backup_locks<C>(&self, connection: &mut C) -> bool
    where
        C: DumpConnection,
    {
        if let Err(err) = connection.execute("LOCK TABLES FOR BACKUP").await {
            error!(error = %err, "could not acquire LOCK TABLES FOR BACKUP");
            self.errors.increment();
            return false;
        }

        if let Err(err) = connection.execute("LOCK BINLOG FOR BACKUP").await {
            error!(error = %err, "could not acquire LOCK BINLOG FOR BACKUP");
            self.errors.increment();

            if let Err(err) = connection.execute("UNLOCK TABLES").await {
                warn!(error = %err, "could not release LOCK TABLES FOR BACKUP");
            }

            return false;
        }

        true
    }
}

/// Locks every table with one statement, dropping the table named by each failure.
///
/// Returns the tables finally locked. Tables disappearing between discovery and locking are the
/// expected cause of failures.
async fn lock_all_tables<C>(
    connection: &mut C,
    mut tables: Vec<QualifiedTableName>,
) -> DumpResult<Vec<QualifiedTableName>>
where
    C: DumpConnection,
{
    if tables.is_empty() {
        warn!("no table to lock, continuing without locks");
        return Ok(tables);
    }

    let mut last_error: Option<ServerError> = None;

    for attempt in 1..=LOCK_ALL_TABLES_ATTEMPTS {
        let statement = lock_tables_statement(&tables);

        let err = match connection.execute(&statement).await {
            Ok(()) => {
                info!(tables = tables.len(), attempt, "all tables locked");
                return Ok(tables);
            }
            Err(err) => err,
        };

        match &err.table {
            Some(failed) => {
                warn!(table = %failed, attempt, error = %err, "could not lock table, retrying without it");
                tables.retain(|table| table != failed);
            }
            None => {
                warn!(attempt, error = %err, "could not lock tables, retrying");
            }
        }

        last_error = Some(err);

        if tables.is_empty() {
            break;
        }
    }

    let detail = last_error
        .map(|err| err.to_string())
        .unwrap_or_else(|| "no table left to lock".to_owned());

    bail!(
        ErrorKind::LockAllTablesFailed,
        "Could not lock all tables",
        detail
    );
}
