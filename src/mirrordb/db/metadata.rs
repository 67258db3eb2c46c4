use crate::mirrordb::db::Row;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetaData {
    pub name: String,
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// constraint name
    pub name: String,
    /// referencing table
    pub table: String,
    pub columns: Vec<String>,
    /// referenced table
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetaData {
    /// qualified table name
    pub name: String,
    pub columns: Vec<ColumnMetaData>,
    /// indexes into columns of the primary key columns, in key order
    pub primary_key: Vec<usize>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl TableMetaData {
    pub fn new<S: ToString>(name: S, columns: &[(&str, &str)], primary_key: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.iter().map(|(name, type_name)| ColumnMetaData {
                name: name.to_string(),
                type_name: type_name.to_string(),
            }).collect(),
            primary_key: primary_key.to_vec(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Returns the primary key values of row, in key order.
    pub fn key(&self, row: &Row) -> Row {
        self.primary_key.iter().map(|&i| row[i].clone()).collect()
    }
}

/// The table metadata of one backend database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseMetaData {
    pub tables: Vec<TableMetaData>,
}

impl DatabaseMetaData {
    pub fn table(&self, name: &str) -> Option<&TableMetaData> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item=&ForeignKey> {
        self.tables.iter().flat_map(|t| t.foreign_keys.iter())
    }
}
