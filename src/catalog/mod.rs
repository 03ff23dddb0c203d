/// Persistent metadata: tables, columns, indexes, schema version.
///
/// The whole catalog serializes as one length-prefixed binary structure and
/// lives in a CATALOG page chain whose root page number is stored in the
/// database header. Every change writes a fresh chain and frees the old
/// one inside the current transaction, so a crash mid-DDL recovers to
/// either the old catalog or the new one, never a mix.
use std::collections::BTreeMap;

use crate::error::{Result, TinyError};
use crate::record::{decode_value, encode_value};
use crate::storage::chain;
use crate::storage::page::{PageKind, PageNo};
use crate::storage::page_store::PageStore;
use crate::types::{DataType, Value};

fn type_tag(data_type: DataType) -> u8 {
    match data_type {
        DataType::Integer => 1,
        DataType::Text => 2,
        DataType::Real => 3,
        DataType::Boolean => 4,
        DataType::Timestamp => 5,
        DataType::Blob => 6,
        DataType::Decimal => 7,
    }
}

fn type_from_tag(tag: u8) -> Option<DataType> {
    match tag {
        1 => Some(DataType::Integer),
        2 => Some(DataType::Text),
        3 => Some(DataType::Real),
        4 => Some(DataType::Boolean),
        5 => Some(DataType::Timestamp),
        6 => Some(DataType::Blob),
        7 => Some(DataType::Decimal),
        _ => None,
    }
}

fn put_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn take_str(data: &[u8], offset: &mut usize) -> Option<String> {
    let len_bytes = data.get(*offset..*offset + 2)?;
    let len = u16::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
    *offset += 2;
    let bytes = data.get(*offset..*offset + len)?;
    *offset += len;
    String::from_utf8(bytes.to_vec()).ok()
}

/// Foreign-key reference: the target column must be the referenced table's
/// single-column primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub default_value: Option<Value>,
    pub references: Option<ForeignKey>,
    /// Physical position of this column's value in the encoded row.
    /// Assigned by the catalog; a slot vacated by DROP COLUMN is never
    /// handed out again, so stale bytes in old rows cannot resurface as a
    /// later column's value.
    pub slot: u16,
}

impl ColumnDef {
    pub fn new(name: &str, data_type: DataType) -> Self {
        ColumnDef {
            name: name.to_string(),
            data_type,
            nullable: true,
            primary_key: false,
            autoincrement: false,
            default_value: None,
            references: None,
            slot: 0,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default_value = Some(default);
        self
    }

    pub fn references(mut self, table: &str, column: &str) -> Self {
        self.references = Some(ForeignKey {
            table: table.to_string(),
            column: column.to_string(),
        });
        self
    }

    /// Value an old row reads for this column when it predates it.
    pub fn backfill_value(&self) -> Value {
        self.default_value.clone().unwrap_or(Value::Null)
    }

    /// Format: [name][type_tag u8][flags u8][slot u16][default][fk]
    /// flags: 0x01 primary key, 0x02 nullable, 0x04 autoincrement.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_str(&mut buf, &self.name);
        buf.push(type_tag(self.data_type));

        let mut flags: u8 = 0;
        if self.primary_key {
            flags |= 0x01;
        }
        if self.nullable {
            flags |= 0x02;
        }
        if self.autoincrement {
            flags |= 0x04;
        }
        buf.push(flags);
        buf.extend_from_slice(&self.slot.to_le_bytes());

        match &self.default_value {
            None => buf.push(0),
            Some(value) => {
                buf.push(1);
                encode_value(&mut buf, value);
            }
        }

        match &self.references {
            None => buf.push(0),
            Some(fk) => {
                buf.push(1);
                put_str(&mut buf, &fk.table);
                put_str(&mut buf, &fk.column);
            }
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<(Self, usize)> {
        let mut offset = 0;
        let name = take_str(data, &mut offset)?;
        let data_type = type_from_tag(*data.get(offset)?)?;
        offset += 1;
        let flags = *data.get(offset)?;
        offset += 1;
        let slot = u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap());
        offset += 2;

        let default_value = match *data.get(offset)? {
            0 => {
                offset += 1;
                None
            }
            1 => {
                offset += 1;
                let (value, consumed) = decode_value(&data[offset..]).ok()?;
                offset += consumed;
                Some(value)
            }
            _ => return None,
        };

        let references = match *data.get(offset)? {
            0 => {
                offset += 1;
                None
            }
            1 => {
                offset += 1;
                let table = take_str(data, &mut offset)?;
                let column = take_str(data, &mut offset)?;
                Some(ForeignKey { table, column })
            }
            _ => return None,
        };

        Some((
            ColumnDef {
                name,
                data_type,
                nullable: flags & 0x02 != 0,
                primary_key: flags & 0x01 != 0,
                autoincrement: flags & 0x04 != 0,
                default_value,
                references,
                slot,
            },
            offset,
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    /// Primary-key column names; composites compare in this order.
    pub primary_key: Vec<String>,
    /// Root page of the table's B-tree.
    pub root_page: PageNo,
    /// Highest value handed out so far; never decreases.
    pub autoincrement: i64,
    /// Physical row slots ever consumed by this table's columns. Never
    /// decreases: DROP COLUMN leaves its slot vacated so rows written
    /// before the drop keep decoding correctly.
    pub row_slots: u16,
}

impl TableDef {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Indices of the PK columns, in key order.
    pub fn pk_indices(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|name| self.column_index(name))
            .collect()
    }

    /// The autoincrement column index, when the table has one.
    pub fn autoincrement_column(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.autoincrement)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_str(&mut buf, &self.name);
        buf.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        for col in &self.columns {
            let bytes = col.serialize();
            buf.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            buf.extend_from_slice(&bytes);
        }
        buf.extend_from_slice(&(self.primary_key.len() as u16).to_le_bytes());
        for pk in &self.primary_key {
            put_str(&mut buf, pk);
        }
        buf.extend_from_slice(&self.root_page.to_le_bytes());
        buf.extend_from_slice(&self.autoincrement.to_le_bytes());
        buf.extend_from_slice(&self.row_slots.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<(Self, usize)> {
        let mut offset = 0;
        let name = take_str(data, &mut offset)?;

        let col_count =
            u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap()) as usize;
        offset += 2;
        let mut columns = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            let len = u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap()) as usize;
            offset += 2;
            let (col, consumed) = ColumnDef::deserialize(data.get(offset..offset + len)?)?;
            if consumed != len {
                return None;
            }
            columns.push(col);
            offset += len;
        }

        let pk_count =
            u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap()) as usize;
        offset += 2;
        let mut primary_key = Vec::with_capacity(pk_count);
        for _ in 0..pk_count {
            primary_key.push(take_str(data, &mut offset)?);
        }

        let root_page = u32::from_le_bytes(data.get(offset..offset + 4)?.try_into().unwrap());
        offset += 4;
        let autoincrement = i64::from_le_bytes(data.get(offset..offset + 8)?.try_into().unwrap());
        offset += 8;
        let row_slots = u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap());
        offset += 2;

        Some((
            TableDef {
                name,
                columns,
                primary_key,
                root_page,
                autoincrement,
                row_slots,
            },
            offset,
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub root_page: PageNo,
}

impl IndexDef {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_str(&mut buf, &self.name);
        put_str(&mut buf, &self.table);
        buf.extend_from_slice(&(self.columns.len() as u16).to_le_bytes());
        for col in &self.columns {
            put_str(&mut buf, col);
        }
        buf.push(u8::from(self.unique));
        buf.extend_from_slice(&self.root_page.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Option<(Self, usize)> {
        let mut offset = 0;
        let name = take_str(data, &mut offset)?;
        let table = take_str(data, &mut offset)?;
        let col_count =
            u16::from_le_bytes(data.get(offset..offset + 2)?.try_into().unwrap()) as usize;
        offset += 2;
        let mut columns = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            columns.push(take_str(data, &mut offset)?);
        }
        let unique = *data.get(offset)? != 0;
        offset += 1;
        let root_page = u32::from_le_bytes(data.get(offset..offset + 4)?.try_into().unwrap());
        offset += 4;

        Some((
            IndexDef {
                name,
                table,
                columns,
                unique,
                root_page,
            },
            offset,
        ))
    }
}

/// The in-memory catalog. Mutations go through the DDL methods below,
/// which validate and bump the schema version; persistence is `save`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    tables: BTreeMap<String, TableDef>,
    indexes: BTreeMap<String, IndexDef>,
    schema_version: u32,
}

impl Catalog {
    pub fn new() -> Self {
        Catalog::default()
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    pub fn get_table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| TinyError::NotFound(format!("table '{}'", name)))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut TableDef> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| TinyError::NotFound(format!("table '{}'", name)))
    }

    pub fn get_index(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .get(name)
            .ok_or_else(|| TinyError::NotFound(format!("index '{}'", name)))
    }

    pub fn indexes_for_table(&self, table: &str) -> Vec<&IndexDef> {
        self.indexes.values().filter(|i| i.table == table).collect()
    }

    /// Tables holding a foreign key into `table`.
    pub fn referencing_columns(&self, table: &str) -> Vec<(String, String)> {
        let mut refs = Vec::new();
        for t in self.tables.values() {
            for col in &t.columns {
                if let Some(fk) = &col.references {
                    if fk.table == table {
                        refs.push((t.name.clone(), col.name.clone()));
                    }
                }
            }
        }
        refs
    }

    fn validate_foreign_key(&self, owner: &TableDef, col: &ColumnDef) -> Result<()> {
        let Some(fk) = &col.references else {
            return Ok(());
        };
        let target = if fk.table == owner.name {
            owner
        } else {
            self.tables.get(&fk.table).ok_or_else(|| {
                TinyError::Schema(format!(
                    "column '{}' references unknown table '{}'",
                    col.name, fk.table
                ))
            })?
        };
        if target.primary_key.len() != 1 || target.primary_key[0] != fk.column {
            return Err(TinyError::Schema(format!(
                "column '{}' must reference the single-column primary key of '{}'",
                col.name, fk.table
            )));
        }
        let target_col = target.column(&fk.column).ok_or_else(|| {
            TinyError::Schema(format!(
                "referenced column '{}.{}' does not exist",
                fk.table, fk.column
            ))
        })?;
        if target_col.data_type != col.data_type {
            return Err(TinyError::Schema(format!(
                "column '{}' ({}) references '{}.{}' ({})",
                col.name, col.data_type, fk.table, fk.column, target_col.data_type
            )));
        }
        Ok(())
    }

    fn validate_default(col: &ColumnDef) -> Result<()> {
        if let Some(default) = &col.default_value {
            if !default.conforms_to(col.data_type) {
                return Err(TinyError::Schema(format!(
                    "default for column '{}' does not match type {}",
                    col.name, col.data_type
                )));
            }
        }
        Ok(())
    }

    /// Register a table. `def.root_page` must already point at an empty
    /// B-tree. An empty `primary_key` list is derived from the flagged
    /// columns in declared order.
    pub fn create_table(&mut self, mut def: TableDef) -> Result<()> {
        if def.name.is_empty() {
            return Err(TinyError::Schema("table name is empty".into()));
        }
        if self.tables.contains_key(&def.name) {
            return Err(TinyError::DuplicateName(format!("table '{}'", def.name)));
        }
        if def.columns.is_empty() {
            return Err(TinyError::Schema(format!(
                "table '{}' has no columns",
                def.name
            )));
        }
        for (i, col) in def.columns.iter().enumerate() {
            if def.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(TinyError::DuplicateName(format!(
                    "column '{}' in table '{}'",
                    col.name, def.name
                )));
            }
            Self::validate_default(col)?;
        }

        if def.primary_key.is_empty() {
            def.primary_key = def
                .columns
                .iter()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect();
        }
        if def.primary_key.is_empty() {
            return Err(TinyError::Schema(format!(
                "table '{}' has no primary key",
                def.name
            )));
        }
        for pk in &def.primary_key {
            let idx = def.column_index(pk).ok_or_else(|| {
                TinyError::Schema(format!("primary-key column '{}' does not exist", pk))
            })?;
            def.columns[idx].primary_key = true;
            def.columns[idx].nullable = false;
        }

        for col in &def.columns {
            if col.autoincrement {
                let single_int_pk = def.primary_key.len() == 1
                    && def.primary_key[0] == col.name
                    && col.data_type == DataType::Integer;
                if !single_int_pk {
                    return Err(TinyError::Schema(format!(
                        "autoincrement column '{}' must be a single-column INTEGER primary key",
                        col.name
                    )));
                }
            }
            self.validate_foreign_key(&def, col)?;
        }

        if def.columns.len() > u16::MAX as usize {
            return Err(TinyError::Schema(format!(
                "table '{}' has too many columns",
                def.name
            )));
        }
        for (i, col) in def.columns.iter_mut().enumerate() {
            col.slot = i as u16;
        }
        def.row_slots = def.columns.len() as u16;

        self.tables.insert(def.name.clone(), def);
        self.schema_version += 1;
        Ok(())
    }

    /// Remove a table and its indexes. The caller frees their pages.
    pub fn drop_table(&mut self, name: &str) -> Result<(TableDef, Vec<IndexDef>)> {
        let def = self
            .tables
            .remove(name)
            .ok_or_else(|| TinyError::NotFound(format!("table '{}'", name)))?;

        let doomed: Vec<String> = self
            .indexes
            .values()
            .filter(|i| i.table == name)
            .map(|i| i.name.clone())
            .collect();
        let mut dropped = Vec::with_capacity(doomed.len());
        for index_name in doomed {
            if let Some(index) = self.indexes.remove(&index_name) {
                dropped.push(index);
            }
        }

        self.schema_version += 1;
        Ok((def, dropped))
    }

    pub fn rename_table(&mut self, old: &str, new: &str) -> Result<()> {
        if new.is_empty() {
            return Err(TinyError::Schema("table name is empty".into()));
        }
        if self.tables.contains_key(new) {
            return Err(TinyError::DuplicateName(format!("table '{}'", new)));
        }
        let mut def = self
            .tables
            .remove(old)
            .ok_or_else(|| TinyError::NotFound(format!("table '{}'", old)))?;
        def.name = new.to_string();
        self.tables.insert(new.to_string(), def);

        // Fix foreign keys and indexes pointing at the old name.
        for table in self.tables.values_mut() {
            for col in &mut table.columns {
                if let Some(fk) = &mut col.references {
                    if fk.table == old {
                        fk.table = new.to_string();
                    }
                }
            }
        }
        for index in self.indexes.values_mut() {
            if index.table == old {
                index.table = new.to_string();
            }
        }

        self.schema_version += 1;
        Ok(())
    }

    /// Append a column. Only nullable non-key columns can be added; rows
    /// written before the change read the default at decode time. The new
    /// column always gets a fresh row slot, never one a drop vacated.
    pub fn add_column(&mut self, table: &str, mut col: ColumnDef) -> Result<()> {
        Self::validate_default(&col)?;
        if col.primary_key || col.autoincrement {
            return Err(TinyError::Schema(format!(
                "cannot add primary-key column '{}'",
                col.name
            )));
        }
        if !col.nullable {
            return Err(TinyError::Schema(format!(
                "added column '{}' must be nullable",
                col.name
            )));
        }
        {
            let def = self.get_table(table)?;
            if def.column(&col.name).is_some() {
                return Err(TinyError::DuplicateName(format!(
                    "column '{}' in table '{}'",
                    col.name, table
                )));
            }
            self.validate_foreign_key(def, &col)?;
        }
        let def = self.get_table_mut(table)?;
        if def.row_slots == u16::MAX {
            return Err(TinyError::Schema(format!(
                "table '{}' has exhausted its column slots",
                table
            )));
        }
        col.slot = def.row_slots;
        def.row_slots += 1;
        def.columns.push(col);
        self.schema_version += 1;
        Ok(())
    }

    /// Drop a column. Restricted to the last declared, non-key column so no
    /// stored row needs rewriting.
    pub fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        {
            let def = self.get_table(table)?;
            let idx = def.column_index(column).ok_or_else(|| {
                TinyError::NotFound(format!("column '{}' in table '{}'", column, table))
            })?;
            if idx != def.columns.len() - 1 {
                return Err(TinyError::Schema(format!(
                    "only the last column of '{}' can be dropped",
                    table
                )));
            }
            if def.columns[idx].primary_key {
                return Err(TinyError::Schema(format!(
                    "cannot drop primary-key column '{}'",
                    column
                )));
            }
            for index in self.indexes_for_table(table) {
                if index.columns.iter().any(|c| c == column) {
                    return Err(TinyError::Schema(format!(
                        "column '{}' is used by index '{}'",
                        column, index.name
                    )));
                }
            }
        }
        self.get_table_mut(table)?.columns.pop();
        self.schema_version += 1;
        Ok(())
    }

    /// Register an index. `def.root_page` must already point at an empty
    /// B-tree; the caller backfills it.
    pub fn create_index(&mut self, def: IndexDef) -> Result<()> {
        if self.indexes.contains_key(&def.name) {
            return Err(TinyError::DuplicateName(format!("index '{}'", def.name)));
        }
        let table = self.get_table(&def.table)?;
        if def.columns.is_empty() {
            return Err(TinyError::Schema(format!(
                "index '{}' has no columns",
                def.name
            )));
        }
        for col in &def.columns {
            if table.column(col).is_none() {
                return Err(TinyError::Schema(format!(
                    "index '{}' references unknown column '{}'",
                    def.name, col
                )));
            }
        }
        self.indexes.insert(def.name.clone(), def);
        self.schema_version += 1;
        Ok(())
    }

    /// Record a new root after an index B-tree split or collapse. Not a
    /// schema change, so the version is untouched.
    pub fn set_index_root(&mut self, name: &str, root: PageNo) -> Result<()> {
        let index = self
            .indexes
            .get_mut(name)
            .ok_or_else(|| TinyError::NotFound(format!("index '{}'", name)))?;
        index.root_page = root;
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<IndexDef> {
        let def = self
            .indexes
            .remove(name)
            .ok_or_else(|| TinyError::NotFound(format!("index '{}'", name)))?;
        self.schema_version += 1;
        Ok(def)
    }

    // --- Persistence ---

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.schema_version.to_le_bytes());

        buf.extend_from_slice(&(self.tables.len() as u32).to_le_bytes());
        for table in self.tables.values() {
            let bytes = table.serialize();
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(&bytes);
        }

        buf.extend_from_slice(&(self.indexes.len() as u32).to_le_bytes());
        for index in self.indexes.values() {
            let bytes = index.serialize();
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(&bytes);
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let corrupt = || TinyError::Corruption("malformed catalog serialization".into());
        let mut offset = 0;

        let schema_version = u32::from_le_bytes(
            data.get(offset..offset + 4)
                .ok_or_else(corrupt)?
                .try_into()
                .unwrap(),
        );
        offset += 4;

        let table_count = u32::from_le_bytes(
            data.get(offset..offset + 4)
                .ok_or_else(corrupt)?
                .try_into()
                .unwrap(),
        ) as usize;
        offset += 4;

        let mut tables = BTreeMap::new();
        for _ in 0..table_count {
            let len = u32::from_le_bytes(
                data.get(offset..offset + 4)
                    .ok_or_else(corrupt)?
                    .try_into()
                    .unwrap(),
            ) as usize;
            offset += 4;
            let bytes = data.get(offset..offset + len).ok_or_else(corrupt)?;
            let (table, consumed) = TableDef::deserialize(bytes).ok_or_else(corrupt)?;
            if consumed != len {
                return Err(corrupt());
            }
            tables.insert(table.name.clone(), table);
            offset += len;
        }

        let index_count = u32::from_le_bytes(
            data.get(offset..offset + 4)
                .ok_or_else(corrupt)?
                .try_into()
                .unwrap(),
        ) as usize;
        offset += 4;

        let mut indexes = BTreeMap::new();
        for _ in 0..index_count {
            let len = u32::from_le_bytes(
                data.get(offset..offset + 4)
                    .ok_or_else(corrupt)?
                    .try_into()
                    .unwrap(),
            ) as usize;
            offset += 4;
            let bytes = data.get(offset..offset + len).ok_or_else(corrupt)?;
            let (index, consumed) = IndexDef::deserialize(bytes).ok_or_else(corrupt)?;
            if consumed != len {
                return Err(corrupt());
            }
            indexes.insert(index.name.clone(), index);
            offset += len;
        }

        if offset != data.len() {
            return Err(corrupt());
        }

        Ok(Catalog {
            tables,
            indexes,
            schema_version,
        })
    }

    /// Load the catalog from its page chain. Root 0 means an empty catalog.
    pub fn load(store: &mut impl PageStore, root: PageNo) -> Result<Self> {
        if root == 0 {
            return Ok(Catalog::new());
        }
        let bytes = chain::read_chain(store, root, PageKind::Catalog)?;
        Catalog::deserialize(&bytes)
    }

    /// Persist into a fresh page chain, freeing the old one. Returns the
    /// new chain root for the header.
    pub fn save(&self, store: &mut impl PageStore, old_root: PageNo) -> Result<PageNo> {
        if old_root != 0 {
            chain::free_chain(store, old_root, PageKind::Catalog)?;
        }
        chain::write_chain(store, PageKind::Catalog, &self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pager::Pager;
    use tempfile::TempDir;

    fn users_table() -> TableDef {
        TableDef {
            name: "users".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("name", DataType::Text).not_null(),
                ColumnDef::new("bio", DataType::Text),
            ],
            primary_key: vec![],
            root_page: 3,
            autoincrement: 0,
            row_slots: 0,
        }
    }

    #[test]
    fn test_column_roundtrip() {
        let col = ColumnDef::new("id", DataType::Integer)
            .primary_key()
            .with_autoincrement();
        let bytes = col.serialize();
        let (col2, consumed) = ColumnDef::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(col2, col);
    }

    #[test]
    fn test_column_roundtrip_default_and_fk() {
        let col = ColumnDef::new("owner", DataType::Integer)
            .with_default(Value::Integer(0))
            .references("users", "id");
        let bytes = col.serialize();
        let (col2, _) = ColumnDef::deserialize(&bytes).unwrap();
        assert_eq!(col2.default_value, Some(Value::Integer(0)));
        assert_eq!(
            col2.references,
            Some(ForeignKey {
                table: "users".into(),
                column: "id".into()
            })
        );
    }

    #[test]
    fn test_table_roundtrip() {
        let mut table = users_table();
        table.primary_key = vec!["id".into()];
        table.autoincrement = 17;
        for (i, col) in table.columns.iter_mut().enumerate() {
            col.slot = i as u16;
        }
        table.row_slots = 3;
        let bytes = table.serialize();
        let (table2, consumed) = TableDef::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(table2, table);
    }

    #[test]
    fn test_index_roundtrip() {
        let index = IndexDef {
            name: "idx_users_name".into(),
            table: "users".into(),
            columns: vec!["name".into()],
            unique: true,
            root_page: 9,
        };
        let bytes = index.serialize();
        let (index2, consumed) = IndexDef::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(index2, index);
    }

    #[test]
    fn test_create_table_derives_pk() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();
        let def = catalog.get_table("users").unwrap();
        assert_eq!(def.primary_key, vec!["id".to_string()]);
        assert!(!def.columns[0].nullable);
    }

    #[test]
    fn test_create_table_requires_pk() {
        let mut catalog = Catalog::new();
        let def = TableDef {
            name: "nopk".into(),
            columns: vec![ColumnDef::new("x", DataType::Integer)],
            primary_key: vec![],
            root_page: 3,
            autoincrement: 0,
            row_slots: 0,
        };
        assert!(matches!(
            catalog.create_table(def),
            Err(TinyError::Schema(_))
        ));
    }

    #[test]
    fn test_duplicate_table_name() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();
        assert!(matches!(
            catalog.create_table(users_table()),
            Err(TinyError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_autoincrement_requires_integer_single_pk() {
        let mut catalog = Catalog::new();
        let def = TableDef {
            name: "bad".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Text)
                    .primary_key()
                    .with_autoincrement(),
            ],
            primary_key: vec![],
            root_page: 3,
            autoincrement: 0,
            row_slots: 0,
        };
        assert!(matches!(
            catalog.create_table(def),
            Err(TinyError::Schema(_))
        ));
    }

    #[test]
    fn test_fk_must_target_pk() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();
        let def = TableDef {
            name: "posts".into(),
            columns: vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("author", DataType::Text).references("users", "name"),
            ],
            primary_key: vec![],
            root_page: 4,
            autoincrement: 0,
            row_slots: 0,
        };
        assert!(matches!(
            catalog.create_table(def),
            Err(TinyError::Schema(_))
        ));
    }

    #[test]
    fn test_add_column_restrictions() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();

        assert!(matches!(
            catalog.add_column("users", ColumnDef::new("age", DataType::Integer).not_null()),
            Err(TinyError::Schema(_))
        ));
        assert!(matches!(
            catalog.add_column("users", ColumnDef::new("name", DataType::Text)),
            Err(TinyError::DuplicateName(_))
        ));

        catalog
            .add_column("users", ColumnDef::new("age", DataType::Integer))
            .unwrap();
        assert_eq!(catalog.get_table("users").unwrap().columns.len(), 4);
    }

    #[test]
    fn test_drop_column_only_last() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();

        assert!(matches!(
            catalog.drop_column("users", "name"),
            Err(TinyError::Schema(_))
        ));
        assert!(matches!(
            catalog.drop_column("users", "id"),
            Err(TinyError::Schema(_))
        ));
        catalog.drop_column("users", "bio").unwrap();
        assert_eq!(catalog.get_table("users").unwrap().columns.len(), 2);
    }

    #[test]
    fn test_row_slots_never_reused() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();
        {
            let def = catalog.get_table("users").unwrap();
            assert_eq!(def.row_slots, 3);
            let slots: Vec<u16> = def.columns.iter().map(|c| c.slot).collect();
            assert_eq!(slots, vec![0, 1, 2]);
        }

        // Dropping the last column vacates slot 2 for good; the next add
        // gets slot 3.
        catalog.drop_column("users", "bio").unwrap();
        assert_eq!(catalog.get_table("users").unwrap().row_slots, 3);

        catalog
            .add_column("users", ColumnDef::new("age", DataType::Integer))
            .unwrap();
        let def = catalog.get_table("users").unwrap();
        assert_eq!(def.row_slots, 4);
        assert_eq!(def.columns.last().unwrap().slot, 3);
    }

    #[test]
    fn test_rename_table_fixes_references() {
        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();
        catalog
            .create_table(TableDef {
                name: "posts".into(),
                columns: vec![
                    ColumnDef::new("id", DataType::Integer).primary_key(),
                    ColumnDef::new("author", DataType::Integer).references("users", "id"),
                ],
                primary_key: vec![],
                root_page: 4,
                autoincrement: 0,
                row_slots: 0,
            })
            .unwrap();
        catalog
            .create_index(IndexDef {
                name: "idx_users_name".into(),
                table: "users".into(),
                columns: vec!["name".into()],
                unique: false,
                root_page: 5,
            })
            .unwrap();

        catalog.rename_table("users", "people").unwrap();
        assert!(catalog.get_table("users").is_err());
        let posts = catalog.get_table("posts").unwrap();
        assert_eq!(
            posts.column("author").unwrap().references.as_ref().unwrap().table,
            "people"
        );
        assert_eq!(catalog.get_index("idx_users_name").unwrap().table, "people");
    }

    #[test]
    fn test_schema_version_bumps_on_ddl() {
        let mut catalog = Catalog::new();
        assert_eq!(catalog.schema_version(), 0);
        catalog.create_table(users_table()).unwrap();
        assert_eq!(catalog.schema_version(), 1);
        catalog
            .add_column("users", ColumnDef::new("age", DataType::Integer))
            .unwrap();
        assert_eq!(catalog.schema_version(), 2);
        catalog.drop_table("users").unwrap();
        assert_eq!(catalog.schema_version(), 3);
    }

    #[test]
    fn test_catalog_persistence_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut pager = Pager::create(&dir.path().join("test.db")).unwrap();

        let mut catalog = Catalog::new();
        catalog.create_table(users_table()).unwrap();
        catalog
            .create_index(IndexDef {
                name: "idx_users_name".into(),
                table: "users".into(),
                columns: vec!["name".into()],
                unique: true,
                root_page: 8,
            })
            .unwrap();

        let root = catalog.save(&mut pager, 0).unwrap();
        let loaded = Catalog::load(&mut pager, root).unwrap();
        assert_eq!(loaded.schema_version(), catalog.schema_version());
        assert_eq!(loaded.get_table("users").unwrap().columns.len(), 3);
        assert!(loaded.get_index("idx_users_name").unwrap().unique);

        // Saving again frees the old chain and allocates a new one.
        let root2 = catalog.save(&mut pager, root).unwrap();
        let loaded2 = Catalog::load(&mut pager, root2).unwrap();
        assert_eq!(loaded2.table_names(), vec!["users".to_string()]);
    }

    #[test]
    fn test_empty_catalog_load() {
        let dir = TempDir::new().unwrap();
        let mut pager = Pager::create(&dir.path().join("test.db")).unwrap();
        let catalog = Catalog::load(&mut pager, 0).unwrap();
        assert!(catalog.table_names().is_empty());
    }
}
