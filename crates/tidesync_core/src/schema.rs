//! Collection schema and schema migrations.
//!
//! The schema names the collections a store holds and the field columns
//! each one accepts. Migrations record how the schema grew so the sync layer
//! can tell the server which collections and columns appeared since the last
//! synced version.

use crate::error::{CoreError, CoreResult};
use std::collections::BTreeMap;

/// Columns that every record carries and that are not declared per collection.
pub const RESERVED_COLUMNS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Schema of a single collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSchema {
    /// Collection name (for example `posts`).
    pub name: String,
    /// Declared field columns.
    pub columns: Vec<String>,
}

impl CollectionSchema {
    /// Creates a collection schema.
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `field` is a declared column.
    pub fn has_column(&self, field: &str) -> bool {
        self.columns.iter().any(|c| c == field)
    }
}

/// One step of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStep {
    /// A new collection was introduced.
    CreateCollection(CollectionSchema),
    /// Columns were added to an existing collection.
    AddColumns {
        /// Target collection.
        collection: String,
        /// New columns.
        columns: Vec<String>,
    },
}

/// Migration to a schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version reached after applying `steps`.
    pub to_version: u32,
    /// Steps in order.
    pub steps: Vec<MigrationStep>,
}

/// Collections and columns added since some earlier schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaChanges {
    /// The earlier version.
    pub from: u32,
    /// Collections created since `from`.
    pub tables: Vec<String>,
    /// Columns added to collections that already existed at `from`.
    pub columns: Vec<(String, Vec<String>)>,
}

/// The store schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    version: u32,
    collections: BTreeMap<String, CollectionSchema>,
    migrations: Vec<Migration>,
}

impl Schema {
    /// Creates a schema at `version` with the given collections.
    ///
    /// # Errors
    ///
    /// Returns an error if the version is zero, a collection is declared
    /// twice, or a column uses a reserved name.
    pub fn new(version: u32, collections: Vec<CollectionSchema>) -> CoreResult<Self> {
        if version == 0 {
            return Err(CoreError::invalid_schema("schema version must be >= 1"));
        }

        let mut map = BTreeMap::new();
        for collection in collections {
            if let Some(reserved) = collection
                .columns
                .iter()
                .find(|c| RESERVED_COLUMNS.contains(&c.as_str()))
            {
                return Err(CoreError::invalid_schema(format!(
                    "column {reserved} in {} is reserved",
                    collection.name
                )));
            }
            let name = collection.name.clone();
            if map.insert(name.clone(), collection).is_some() {
                return Err(CoreError::invalid_schema(format!(
                    "collection {name} declared twice"
                )));
            }
        }

        Ok(Self {
            version,
            collections: map,
            migrations: Vec::new(),
        })
    }

    /// Attaches migrations.
    ///
    /// Migrations must be sorted by `to_version`, must not exceed the schema
    /// version, and may only reference collections the schema declares.
    ///
    /// # Errors
    ///
    /// Returns an error if the migrations are out of order or inconsistent.
    pub fn with_migrations(mut self, migrations: Vec<Migration>) -> CoreResult<Self> {
        let mut last = 0;
        for migration in &migrations {
            if migration.to_version <= last || migration.to_version > self.version {
                return Err(CoreError::invalid_schema(format!(
                    "migration to version {} is out of order",
                    migration.to_version
                )));
            }
            last = migration.to_version;

            for step in &migration.steps {
                let name = match step {
                    MigrationStep::CreateCollection(c) => &c.name,
                    MigrationStep::AddColumns { collection, .. } => collection,
                };
                if !self.collections.contains_key(name) {
                    return Err(CoreError::invalid_schema(format!(
                        "migration references unknown collection {name}"
                    )));
                }
            }
        }
        self.migrations = migrations;
        Ok(self)
    }

    /// The default application schema: users, posts and comments.
    #[must_use]
    pub fn app_default() -> Self {
        Self {
            version: 1,
            collections: [
                CollectionSchema::new("users", ["name", "email", "avatar_url"]),
                CollectionSchema::new("posts", ["title", "body", "user_id"]),
                CollectionSchema::new("comments", ["body", "post_id", "user_id"]),
            ]
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect(),
            migrations: Vec::new(),
        }
    }

    /// Returns the schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns a collection schema by name.
    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Returns a collection schema or an unknown-collection error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownCollection`] if the name is not declared.
    pub fn require(&self, name: &str) -> CoreResult<&CollectionSchema> {
        self.collection(name)
            .ok_or_else(|| CoreError::unknown_collection(name))
    }

    /// Iterates collection names in sorted order.
    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    /// Computes what changed between `from` and the current version.
    ///
    /// # Errors
    ///
    /// Returns an error if `from` is newer than the schema, or if the
    /// migrations do not cover the range `from..version`.
    pub fn changes_since(&self, from: u32) -> CoreResult<SchemaChanges> {
        if from > self.version {
            return Err(CoreError::invalid_schema(format!(
                "cannot migrate down from {from} to {}",
                self.version
            )));
        }

        let mut changes = SchemaChanges {
            from,
            ..SchemaChanges::default()
        };
        if from == self.version {
            return Ok(changes);
        }

        let covered = self
            .migrations
            .first()
            .map_or(false, |m| m.to_version <= from + 1);
        if !covered {
            return Err(CoreError::invalid_schema(format!(
                "no migrations cover version {from} to {}",
                self.version
            )));
        }

        for migration in self.migrations.iter().filter(|m| m.to_version > from) {
            for step in &migration.steps {
                match step {
                    MigrationStep::CreateCollection(c) => {
                        if !changes.tables.contains(&c.name) {
                            changes.tables.push(c.name.clone());
                        }
                    }
                    MigrationStep::AddColumns {
                        collection,
                        columns,
                    } => {
                        // Columns of a table created in the same range ship with the table.
                        if changes.tables.contains(collection) {
                            continue;
                        }
                        match changes.columns.iter_mut().find(|(t, _)| t == collection) {
                            Some((_, existing)) => existing.extend(columns.iter().cloned()),
                            None => changes.columns.push((collection.clone(), columns.clone())),
                        }
                    }
                }
            }
        }

        Ok(changes)
    }
}
