use std::fmt;
use std::sync::Mutex;

/// Database and table name pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedTableName {
    pub database: String,
    pub table: String,
}

impl QualifiedTableName {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }

    /// Returns the name with both parts backtick-quoted, for use in statements.
    pub fn quoted(&self) -> String {
        format!(
            "`{}`.`{}`",
            quote_identifier(&self.database),
            quote_identifier(&self.table)
        )
    }
}

impl fmt::Display for QualifiedTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

fn quote_identifier(identifier: &str) -> String {
    identifier.replace('`', "``")
}

/// Table selected for the dump.
///
/// Descriptors are shared between discovery, the scheduler and the workers through an `Arc`.
#[derive(Debug)]
pub struct TableDescriptor {
    name: QualifiedTableName,
    transactional: bool,
    estimated_size: u64,
    dumped: Mutex<bool>,
}

impl TableDescriptor {
    pub fn new(name: QualifiedTableName, transactional: bool, estimated_size: u64) -> Self {
        Self {
            name,
            transactional,
            estimated_size,
            dumped: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &QualifiedTableName {
        &self.name
    }

    /// Whether the table's engine supports consistent snapshot reads without external locks.
    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    /// Estimated size in bytes, used to balance the reduced-locking pre-pass.
    pub fn estimated_size(&self) -> u64 {
        self.estimated_size
    }

    /// Marks the table as dumped.
    ///
    /// Returns `true` only for the first caller.
    pub fn mark_dumped(&self) -> bool {
        mark_once(&self.dumped)
    }

    pub fn is_dumped(&self) -> bool {
        read_flag(&self.dumped)
    }
}

/// Database selected for the dump.
#[derive(Debug)]
pub struct DatabaseDescriptor {
    name: String,
    dumped: Mutex<bool>,
}

impl DatabaseDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dumped: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks the database schema as scheduled.
    ///
    /// Returns `true` only for the first caller, which is the one that must create the schema job.
    pub fn mark_dumped(&self) -> bool {
        mark_once(&self.dumped)
    }

    pub fn is_dumped(&self) -> bool {
        read_flag(&self.dumped)
    }
}

fn mark_once(flag: &Mutex<bool>) -> bool {
    // A poisoned flag still holds a valid bool.
    let mut dumped = flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if *dumped {
        return false;
    }

    *dumped = true;

    true
}

fn read_flag(flag: &Mutex<bool>) -> bool {
    *flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
