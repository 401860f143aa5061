use std::sync::Arc;

use crate::client::DumpConnection;
use crate::discovery::Discovery;
use crate::error::{DumpResult, ErrorKind};
use crate::scheduler::JobScheduler;
use crate::types::{DatabaseDescriptor, QualifiedTableName, TableDescriptor};
use crate::{bail, dump_error};

#[derive(Debug, Clone)]
enum Object {
    Table {
        name: QualifiedTableName,
        transactional: bool,
        estimated_size: u64,
    },
    View(QualifiedTableName),
    PostSchema(String),
}

impl Object {
    fn database(&self) -> &str {
        match self {
            Object::Table { name, .. } | Object::View(name) => &name.database,
            Object::PostSchema(database) => database,
        }
    }
}

/// Discovery over a fixed list of objects.
///
/// Databases are walked in the order they first appear. Discovery issues `SHOW DATABASES` on the
/// main connection so tests can order it against other statements.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    objects: Vec<Object>,
    fail_with: Option<String>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(
        mut self,
        database: &str,
        table: &str,
        transactional: bool,
        size: u64,
    ) -> Self {
        self.objects.push(Object::Table {
            name: QualifiedTableName::new(database, table),
            transactional,
            estimated_size: size,
        });
        self
    }

    pub fn with_view(mut self, database: &str, view: &str) -> Self {
        self.objects
            .push(Object::View(QualifiedTableName::new(database, view)));
        self
    }

    pub fn with_post_schema(mut self, database: &str) -> Self {
        self.objects.push(Object::PostSchema(database.to_owned()));
        self
    }

    /// Fails discovery after every object was handed to the scheduler.
    pub fn failing(mut self, message: &str) -> Self {
        self.fail_with = Some(message.to_owned());
        self
    }

    fn databases(&self) -> Vec<String> {
        let mut databases: Vec<String> = Vec::new();
        for object in &self.objects {
            if !databases.iter().any(|database| database == object.database()) {
                databases.push(object.database().to_owned());
            }
        }

        databases
    }
}

impl<C> Discovery<C> for StaticDiscovery
where
    C: DumpConnection,
{
    async fn lockable_tables(&self, _connection: &mut C) -> DumpResult<Vec<QualifiedTableName>> {
        Ok(self
            .objects
            .iter()
            .filter_map(|object| match object {
                Object::Table { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect())
    }

    async fn discover(&self, connection: &mut C, scheduler: &JobScheduler) -> DumpResult<()> {
        connection.query("SHOW DATABASES").await.map_err(|err| {
            dump_error!(
                ErrorKind::DiscoveryFailed,
                "Could not list databases",
                err.to_string(),
                source: err
            )
        })?;

        for database in self.databases() {
            let descriptor = Arc::new(DatabaseDescriptor::new(database.as_str()));
            scheduler.create_schema_job(&descriptor)?;

            for object in self.objects.iter().filter(|object| object.database() == database) {
                match object {
                    Object::Table {
                        name,
                        transactional,
                        estimated_size,
                    } => scheduler.create_table_job(Arc::new(TableDescriptor::new(
                        name.clone(),
                        *transactional,
                        *estimated_size,
                    )))?,
                    Object::View(name) => scheduler
                        .create_view_job(Arc::new(TableDescriptor::new(name.clone(), true, 0)))?,
                    Object::PostSchema(_) => scheduler.create_post_schema_job(descriptor.clone())?,
                }
            }
        }

        if let Some(message) = &self.fail_with {
            bail!(
                ErrorKind::DiscoveryFailed,
                "Discovery failed",
                message.clone()
            );
        }

        Ok(())
    }
}
