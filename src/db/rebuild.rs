//! SQLite table rebuild planning.
//!
//! SQLite cannot retype or re-key a column in place. The adapters snapshot the
//! table from the catalog, then run the plan produced here inside one
//! transaction:
//!
//! 1. rename the table to a uniquely suffixed temp name
//! 2. create the table again with the new column set
//! 3. copy rows, mapping old column names to new ones
//! 4. drop the temp table, then restore indexes and triggers
//!
//! Column order and the old→new name mapping come only from the snapshot
//! taken before the first statement runs. The new `CREATE TABLE` is the
//! stored statement with only the changed column replaced (see
//! [`table_sql`](crate::db::table_sql)); the catalog is the fallback when
//! that text cannot be taken apart.

use crate::db::Dialect;
use crate::db::ddl::{self, ColumnSpec, TableSpec};
use crate::db::literal::{quote_ident, quote_string};
use crate::db::table_sql::{self, ConstraintKind, CreateTable, Element};
use crate::error::{AdapterError, AdapterResult};
use crate::models::{ColumnDefinition, ColumnInfo, FieldInfo, Row, SqlValue};
use tracing::{debug, info, warn};

pub mod queries {
    pub const COLUMNS: &str = r#"
        SELECT name, type, "notnull" AS not_null, dflt_value, pk, hidden
        FROM pragma_table_xinfo(?)
        ORDER BY cid
        "#;

    pub const TABLE_SQL: &str =
        "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?";

    pub const INDEXES: &str = r#"
        SELECT il.name AS index_name, il."unique" AS is_unique, il.origin AS origin,
               m.sql AS sql, ii.name AS column_name
        FROM pragma_index_list(?) AS il
        JOIN pragma_index_info(il.name) AS ii
        LEFT JOIN sqlite_master AS m ON m.type = 'index' AND m.name = il.name
        ORDER BY il.seq, ii.seqno
        "#;

    pub const FOREIGN_KEYS: &str = r#"
        SELECT id, "table" AS ref_table, "from" AS from_col, "to" AS to_col,
               on_update, on_delete
        FROM pragma_foreign_key_list(?)
        ORDER BY id, seq
        "#;

    pub const TRIGGERS: &str =
        "SELECT sql FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ? AND sql IS NOT NULL";
}

/// Pragmas set around the rebuild transaction.
///
/// Foreign keys are not enforced while the table is briefly missing, and
/// `legacy_alter_table` keeps views and triggers from being rewritten to the
/// temp name during the rename.
pub const PROLOGUE: &[&str] = &["PRAGMA foreign_keys = OFF", "PRAGMA legacy_alter_table = ON"];

/// Read a text cell, accepting numbers rendered as text.
fn text(row: &Row, column: &str) -> Option<String> {
    match row.get(column)? {
        SqlValue::Null => None,
        SqlValue::Text(s) | SqlValue::Decimal(s) => Some(s.clone()),
        SqlValue::Int(v) => Some(v.to_string()),
        SqlValue::UInt(v) => Some(v.to_string()),
        SqlValue::Float(v) => Some(v.to_string()),
        SqlValue::Bool(v) => Some(v.to_string()),
        other => Some(other.to_json().to_string()),
    }
}

/// Read an integer cell, accepting numeric text.
fn int(row: &Row, column: &str) -> i64 {
    match row.get(column) {
        Some(SqlValue::Text(s)) => s.trim().parse().unwrap_or(0),
        Some(v) => v.as_i64().unwrap_or(0),
        None => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotColumn {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub default_sql: Option<String>,
    /// 1-based position in the primary key, 0 when not part of it.
    pub pk_position: i64,
    /// `GENERATED ALWAYS AS` column; never written by the row copy.
    pub generated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotIndex {
    pub name: String,
    pub unique: bool,
    /// `c` for CREATE INDEX, `u` for UNIQUE constraints, `pk` for the primary key.
    pub origin: String,
    pub sql: Option<String>,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotForeignKey {
    pub ref_table: String,
    pub from: Vec<String>,
    pub to: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

impl SnapshotForeignKey {
    fn render(&self) -> String {
        let list = |cols: &[String]| {
            cols.iter()
                .map(|c| quote_ident(Dialect::Sqlite, c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut clause = format!(
            "FOREIGN KEY ({}) REFERENCES {}",
            list(&self.from),
            quote_ident(Dialect::Sqlite, &self.ref_table)
        );
        // Empty "to" means the parent's primary key.
        if self.to.iter().any(|c| !c.is_empty()) {
            clause.push_str(&format!(" ({})", list(&self.to)));
        }
        for (action, kind) in [(&self.on_update, "UPDATE"), (&self.on_delete, "DELETE")] {
            if !action.is_empty() && !action.eq_ignore_ascii_case("NO ACTION") {
                clause.push_str(&format!(" ON {kind} {action}"));
            }
        }
        clause
    }
}

/// Catalog image of one table, taken before a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSnapshot {
    pub table: String,
    /// `sqlite_master.sql` of the table.
    pub create_sql: Option<String>,
    pub columns: Vec<SnapshotColumn>,
    pub autoincrement: bool,
    pub indexes: Vec<SnapshotIndex>,
    pub foreign_keys: Vec<SnapshotForeignKey>,
    pub triggers: Vec<String>,
}

impl TableSnapshot {
    /// Assemble a snapshot from the result rows of the [`queries`].
    pub fn from_rows(
        table: &str,
        column_rows: &[Row],
        table_sql: Option<&str>,
        index_rows: &[Row],
        fk_rows: &[Row],
        trigger_rows: &[Row],
    ) -> AdapterResult<Self> {
        if column_rows.is_empty() {
            return Err(AdapterError::query(format!("no such table: {}", table), None));
        }

        let columns = column_rows
            .iter()
            .map(|row| SnapshotColumn {
                name: text(row, "name").unwrap_or_default(),
                sql_type: text(row, "type").unwrap_or_default(),
                not_null: int(row, "not_null") != 0,
                default_sql: text(row, "dflt_value"),
                pk_position: int(row, "pk"),
                // 2 = virtual, 3 = stored
                generated: matches!(int(row, "hidden"), 2 | 3),
            })
            .collect();

        let mut indexes: Vec<SnapshotIndex> = Vec::new();
        for row in index_rows {
            let name = text(row, "index_name").unwrap_or_default();
            let column = text(row, "column_name");
            match indexes.last_mut() {
                Some(last) if last.name == name => last.columns.extend(column),
                _ => indexes.push(SnapshotIndex {
                    name,
                    unique: int(row, "is_unique") != 0,
                    origin: text(row, "origin").unwrap_or_default(),
                    sql: text(row, "sql"),
                    columns: column.into_iter().collect(),
                }),
            }
        }

        let mut foreign_keys: Vec<(i64, SnapshotForeignKey)> = Vec::new();
        for row in fk_rows {
            let id = int(row, "id");
            let from = text(row, "from_col").unwrap_or_default();
            let to = text(row, "to_col").unwrap_or_default();
            match foreign_keys.last_mut() {
                Some((last_id, fk)) if *last_id == id => {
                    fk.from.push(from);
                    fk.to.push(to);
                }
                _ => foreign_keys.push((
                    id,
                    SnapshotForeignKey {
                        ref_table: text(row, "ref_table").unwrap_or_default(),
                        from: vec![from],
                        to: vec![to],
                        on_update: text(row, "on_update").unwrap_or_default(),
                        on_delete: text(row, "on_delete").unwrap_or_default(),
                    },
                )),
            }
        }

        Ok(Self {
            table: table.to_string(),
            create_sql: table_sql.map(str::to_string),
            columns,
            autoincrement: table_sql
                .is_some_and(|sql| sql.to_ascii_uppercase().contains("AUTOINCREMENT")),
            indexes,
            foreign_keys: foreign_keys.into_iter().map(|(_, fk)| fk).collect(),
            triggers: trigger_rows.iter().filter_map(|r| text(r, "sql")).collect(),
        })
    }

    /// Columns as reported by `get_columns`.
    ///
    /// SQLite does not enforce NOT NULL on primary keys, but callers treat
    /// key columns as non-nullable on every engine.
    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        self.columns
            .iter()
            .map(|c| {
                let (max_length, precision, scale) = type_modifiers(&c.sql_type);
                ColumnInfo::new(&c.name, &c.sql_type, !c.not_null && c.pk_position == 0)
                    .with_default(c.default_sql.clone())
                    .with_max_length(max_length)
                    .with_numeric(precision, scale)
            })
            .collect()
    }

    /// Primary-key columns in key order.
    pub fn primary_keys(&self) -> Vec<String> {
        let mut pk: Vec<&SnapshotColumn> = self.columns.iter().filter(|c| c.pk_position > 0).collect();
        pk.sort_by_key(|c| c.pk_position);
        pk.into_iter().map(|c| c.name.clone()).collect()
    }

    /// Columns covered by a single-column unique constraint or index.
    pub fn unique_keys(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for index in self
            .indexes
            .iter()
            .filter(|i| i.unique && i.origin != "pk" && i.columns.len() == 1)
        {
            if !out.contains(&index.columns[0]) {
                out.push(index.columns[0].clone());
            }
        }
        out
    }

    /// True for the rowid alias of an `AUTOINCREMENT` table.
    pub fn is_auto_increment(&self, column: &str) -> bool {
        self.autoincrement
            && self.pk_count() == 1
            && self.columns.iter().any(|c| {
                c.pk_position > 0
                    && c.name.eq_ignore_ascii_case(column)
                    && c.sql_type.eq_ignore_ascii_case("INTEGER")
            })
    }

    /// Result-field metadata for one column of this table.
    pub fn field_info(&self, name: &str, data_type: &str) -> FieldInfo {
        let mut field = FieldInfo::new(name, data_type);
        if let Some(pos) = self.position(name) {
            let c = &self.columns[pos];
            field.is_primary_key = c.pk_position > 0;
            field.is_nullable = !c.not_null && c.pk_position == 0;
            field.is_unique = self.unique_keys().iter().any(|u| u.eq_ignore_ascii_case(name));
            field.is_auto_increment = self.is_auto_increment(name);
        }
        field
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn pk_count(&self) -> usize {
        self.columns.iter().filter(|c| c.pk_position > 0).count()
    }

    /// Rebuild the table shape as a [`TableSpec`].
    fn table_spec(&self) -> TableSpec {
        let single_pk = self.pk_count() == 1;
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut def = ColumnDefinition::new(&c.name, &c.sql_type);
                if c.not_null {
                    def = def.not_null();
                }
                if c.pk_position > 0 {
                    def = def.primary_key();
                    if self.autoincrement && single_pk && c.sql_type.eq_ignore_ascii_case("INTEGER")
                    {
                        def = def.auto_increment();
                    }
                }
                ColumnSpec::with_raw_default(def, c.default_sql.clone())
            })
            .collect();

        let mut pk: Vec<&SnapshotColumn> = self.columns.iter().filter(|c| c.pk_position > 0).collect();
        pk.sort_by_key(|c| c.pk_position);

        TableSpec {
            columns,
            primary_key_order: pk.iter().map(|c| c.name.clone()).collect(),
            unique_groups: self
                .indexes
                .iter()
                .filter(|i| i.unique && i.origin == "u")
                .map(|i| i.columns.clone())
                .collect(),
            extra_clauses: Vec::new(),
        }
    }
}

/// `(max_length, precision, scale)` from a declared type such as
/// `VARCHAR(40)` or `DECIMAL(10,2)`.
fn type_modifiers(sql_type: &str) -> (Option<u64>, Option<u64>, Option<u64>) {
    let Some((base, rest)) = sql_type.split_once('(') else {
        return (None, None, None);
    };
    let args: Vec<Option<u64>> = rest
        .trim_end_matches(')')
        .split(',')
        .map(|a| a.trim().parse().ok())
        .collect();
    let base = base.trim().to_ascii_uppercase();
    if base.contains("CHAR") || base.contains("TEXT") || base.contains("CLOB") {
        (args.first().copied().flatten(), None, None)
    } else if base.contains("DEC") || base.contains("NUMERIC") {
        (
            None,
            args.first().copied().flatten(),
            args.get(1).copied().flatten(),
        )
    } else {
        (None, None, None)
    }
}

/// The column-level change a rebuild applies.
#[derive(Debug, Clone)]
pub enum ColumnChange {
    /// Replace `old_name` with a new definition (rename and/or retype).
    Modify { old_name: String, spec: ColumnSpec },
    /// Append a column SQLite cannot add in place.
    Add { spec: ColumnSpec },
}

/// Ordered statements that perform one rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    pub table: String,
    pub temp_table: String,
    pub statements: Vec<String>,
}

impl RebuildPlan {
    /// The plan as one script wrapped in a transaction, preceded by [`PROLOGUE`].
    pub fn script(&self) -> String {
        let mut out = String::new();
        for p in PROLOGUE {
            out.push_str(p);
            out.push_str(";\n");
        }
        out.push_str("BEGIN TRANSACTION;\n");
        for s in &self.statements {
            out.push_str(s);
            out.push_str(";\n");
        }
        out.push_str("COMMIT;\n");
        out
    }
}

/// Temp name used while the original table is being replaced.
pub fn temp_table_name(table: &str, suffix: i64) -> String {
    format!("{table}_tmp_{suffix}")
}

fn rename_in(names: &mut [String], old: &str, new: &str) {
    for n in names.iter_mut() {
        if n.eq_ignore_ascii_case(old) {
            *n = new.to_string();
        }
    }
}

/// Primary-key order after `old` is replaced by `new`.
fn new_primary_key(snapshot: &TableSnapshot, old: &str, new: &ColumnSpec) -> Vec<String> {
    let mut order = snapshot.primary_keys();
    order.retain(|n| !n.eq_ignore_ascii_case(old) || new.def.is_primary_key());
    rename_in(&mut order, old, &new.def.name);
    if new.def.is_primary_key() && !order.iter().any(|n| n == &new.def.name) {
        order.push(new.def.name.clone());
    }
    order
}

fn key_clause(columns: &[String]) -> String {
    let list = columns
        .iter()
        .map(|c| quote_ident(Dialect::Sqlite, c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("PRIMARY KEY ({list})")
}

/// The stored `CREATE TABLE` with one column replaced (or appended).
///
/// Every other column, constraint and table option keeps its text; only
/// references to a renamed column change. `None` when the column cannot be
/// found in the text.
fn edit_create(
    mut parsed: CreateTable,
    table: &str,
    modified: Option<&str>,
    new: &ColumnSpec,
    pk_order: &[String],
    inline_unique: bool,
) -> Option<String> {
    let Some(old) = modified else {
        let mut lines: Vec<String> = parsed
            .elements
            .iter()
            .map(|e| table_sql::render(e.tokens()))
            .collect();
        lines.insert(
            parsed.column_end(),
            ddl::column_sql(Dialect::Sqlite, new, false, inline_unique),
        );
        return Some(parsed.render_with(table, &lines));
    };

    let target = parsed.column_position(old)?;
    let new_name = new.def.name.as_str();
    let renamed = new_name != old;
    let table_pk = parsed.table_primary_key();
    let new_is_pk = new.def.is_primary_key();

    // Composite keys, or any key already declared at table level, stay there
    let table_level_pk = table_pk.is_some() || (new_is_pk && pk_order.len() > 1);
    let inline_pk = new_is_pk && !table_level_pk;
    let mut regenerate_pk = table_level_pk && table_pk.is_none();

    let mut lines = Vec::with_capacity(parsed.elements.len() + 1);
    for (i, element) in parsed.elements.iter_mut().enumerate() {
        if i == target {
            lines.push(ddl::column_sql(Dialect::Sqlite, new, inline_pk, inline_unique));
            continue;
        }
        if renamed {
            element.rename_refs(old, new_name);
        }
        match element {
            Element::Column { .. } if table_level_pk => element.strip_inline_primary_key(),
            Element::Constraint {
                kind: ConstraintKind::PrimaryKey,
                ..
            } => {
                let keys = element.key_columns();
                if new_is_pk || keys.iter().any(|k| k.eq_ignore_ascii_case(new_name)) {
                    regenerate_pk = true;
                    continue;
                }
            }
            Element::Constraint {
                kind: ConstraintKind::Unique,
                ..
            } => {
                // the new definition decides single-column uniqueness
                let keys = element.key_columns();
                if keys.len() == 1 && keys[0].eq_ignore_ascii_case(new_name) {
                    continue;
                }
            }
            _ => {}
        }
        lines.push(table_sql::render(element.tokens()));
    }
    if regenerate_pk && !pk_order.is_empty() {
        lines.push(key_clause(pk_order));
    }
    Some(parsed.render_with(table, &lines))
}

/// `CREATE TABLE` rebuilt from the catalog alone.
///
/// Loses clauses the pragmas do not report; used only when the stored text
/// cannot be parsed.
fn catalog_create(
    snapshot: &TableSnapshot,
    modified: Option<(usize, &str)>,
    new: &ColumnSpec,
    pk_order: Vec<String>,
) -> AdapterResult<String> {
    let table = snapshot.table.as_str();
    let mut spec = snapshot.table_spec();
    let mut foreign_keys = snapshot.foreign_keys.clone();
    match modified {
        Some((pos, old)) => {
            let new_name = new.def.name.as_str();
            spec.unique_groups
                .retain(|g| !(g.len() == 1 && g[0].eq_ignore_ascii_case(old)));
            for g in spec.unique_groups.iter_mut() {
                rename_in(g, old, new_name);
            }
            spec.primary_key_order = pk_order;
            for fk in foreign_keys.iter_mut() {
                rename_in(&mut fk.from, old, new_name);
            }
            spec.columns[pos] = new.clone();
        }
        None => spec.columns.push(new.clone()),
    }
    spec.extra_clauses = foreign_keys.iter().map(SnapshotForeignKey::render).collect();
    ddl::create_table(Dialect::Sqlite, table, &spec)
}

/// Plan a rebuild of `snapshot.table` applying `change`.
pub fn plan_rebuild(snapshot: &TableSnapshot, change: ColumnChange, suffix: i64) -> AdapterResult<RebuildPlan> {
    let table = snapshot.table.as_str();
    let temp = temp_table_name(table, suffix);

    let (modified, new) = match change {
        ColumnChange::Modify { old_name, spec } => {
            let pos = snapshot.position(&old_name).ok_or_else(|| {
                AdapterError::invalid_input(format!(
                    "Column '{}' not found in table '{}'",
                    old_name, table
                ))
            })?;
            (Some((pos, snapshot.columns[pos].name.clone())), spec)
        }
        ColumnChange::Add { spec } => (None, spec),
    };
    let old = modified.as_ref().map(|(_, name)| name.as_str());
    let new_name = new.def.name.as_str();
    let renamed = old.is_some_and(|o| o != new_name);
    let pk_order = match old {
        Some(o) => new_primary_key(snapshot, o, &new),
        None => snapshot.primary_keys(),
    };

    // Explicit indexes come back after the copy. A single-column unique index
    // on the changed column follows the new definition's UNIQUE.
    let mut index_sql = Vec::new();
    let mut unique_index_kept = false;
    for index in snapshot.indexes.iter().filter(|i| i.origin == "c") {
        let Some(sql) = &index.sql else { continue };
        let Some(old) = old else {
            index_sql.push(sql.clone());
            continue;
        };
        let on_target = index.columns.iter().any(|c| c.eq_ignore_ascii_case(old));
        if on_target && index.unique && index.columns.len() == 1 {
            if !new.def.is_unique() {
                info!(table = %table, index = %index.name, "Dropping unique index the new column definition removes");
                continue;
            }
            unique_index_kept = true;
        }
        let sql = if renamed {
            table_sql::rename_in_index(sql, old, new_name).unwrap_or_else(|| sql.clone())
        } else {
            sql.clone()
        };
        index_sql.push(sql);
    }
    let inline_unique = new.def.is_unique() && !unique_index_kept;

    let edited = snapshot
        .create_sql
        .as_deref()
        .and_then(CreateTable::parse)
        .and_then(|parsed| edit_create(parsed, table, old, &new, &pk_order, inline_unique));
    let verbatim = edited.is_some();
    let create = match edited {
        Some(sql) => sql,
        None => {
            warn!(table = %table, "Could not edit stored CREATE TABLE; rebuilding from the catalog");
            let position = modified.as_ref().map(|(pos, name)| (*pos, name.as_str()));
            catalog_create(snapshot, position, &new, pk_order)?
        }
    };

    let mut statements = vec![ddl::rename_table(Dialect::Sqlite, table, &temp), create];

    // (target in the new table, source in the temp table)
    let mut copy: Vec<(String, String)> = Vec::new();
    for (i, c) in snapshot.columns.iter().enumerate() {
        match &modified {
            Some((pos, _)) if *pos == i => copy.push((new_name.to_string(), c.name.clone())),
            _ if c.generated && verbatim => {}
            _ => copy.push((c.name.clone(), c.name.clone())),
        }
    }
    let (targets, sources): (Vec<String>, Vec<String>) = copy
        .iter()
        .map(|(target, source)| {
            (
                quote_ident(Dialect::Sqlite, target),
                quote_ident(Dialect::Sqlite, source),
            )
        })
        .unzip();
    statements.push(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}",
        quote_ident(Dialect::Sqlite, table),
        targets.join(", "),
        sources.join(", "),
        quote_ident(Dialect::Sqlite, &temp)
    ));

    if snapshot.autoincrement {
        statements.push(format!(
            "UPDATE sqlite_sequence SET seq = (SELECT seq FROM sqlite_sequence WHERE name = {temp_lit}) \
             WHERE name = {table_lit} AND EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = {temp_lit})",
            temp_lit = quote_string(Dialect::Sqlite, &temp),
            table_lit = quote_string(Dialect::Sqlite, table),
        ));
    }

    statements.push(format!("DROP TABLE {}", quote_ident(Dialect::Sqlite, &temp)));
    statements.extend(index_sql);

    for trigger in &snapshot.triggers {
        let sql = match old {
            Some(old) if renamed => {
                table_sql::rename_in_trigger(trigger, table, old, new_name).unwrap_or_else(|| trigger.clone())
            }
            _ => trigger.clone(),
        };
        statements.push(sql);
    }

    debug!(table = %table, temp = %temp, verbatim, statements = statements.len(), "Planned table rebuild");
    Ok(RebuildPlan {
        table: table.to_string(),
        temp_table: temp,
        statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[(&str, SqlValue)]) -> Row {
        cells
            .iter()
            .map(|(n, v)| (n.to_string(), v.clone()))
            .collect()
    }

    fn col(name: &str, ty: &str, not_null: i64, default: Option<&str>, pk: i64) -> Row {
        row(&[
            ("name", SqlValue::Text(name.into())),
            ("type", SqlValue::Text(ty.into())),
            ("not_null", SqlValue::Int(not_null)),
            (
                "dflt_value",
                default.map_or(SqlValue::Null, |d| SqlValue::Text(d.into())),
            ),
            ("pk", SqlValue::Int(pk)),
        ])
    }

    fn users_snapshot() -> TableSnapshot {
        let columns = vec![
            col("id", "INTEGER", 0, None, 1),
            col("name", "TEXT", 1, None, 0),
            col("age", "TEXT", 0, Some("'0'"), 0),
        ];
        let indexes = vec![
            row(&[
                ("index_name", SqlValue::Text("idx_users_name".into())),
                ("is_unique", SqlValue::Int(0)),
                ("origin", SqlValue::Text("c".into())),
                (
                    "sql",
                    SqlValue::Text("CREATE INDEX idx_users_name ON users(name)".into()),
                ),
                ("column_name", SqlValue::Text("name".into())),
            ]),
            row(&[
                ("index_name", SqlValue::Text("idx_users_age".into())),
                ("is_unique", SqlValue::Int(0)),
                ("origin", SqlValue::Text("c".into())),
                (
                    "sql",
                    SqlValue::Text("CREATE INDEX idx_users_age ON users(age)".into()),
                ),
                ("column_name", SqlValue::Text("age".into())),
            ]),
        ];
        TableSnapshot::from_rows(
            "users",
            &columns,
            Some("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, age TEXT DEFAULT '0')"),
            &indexes,
            &[],
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_snapshot_reads_catalog_rows() {
        let snap = users_snapshot();
        assert!(snap.autoincrement);
        assert_eq!(snap.columns.len(), 3);
        assert_eq!(snap.columns[2].default_sql.as_deref(), Some("'0'"));
        assert_eq!(snap.indexes.len(), 2);
    }

    #[test]
    fn test_missing_table_is_query_error() {
        let err = TableSnapshot::from_rows("nope", &[], None, &[], &[], &[]);
        assert!(matches!(err, Err(AdapterError::Query { .. })));
    }

    #[test]
    fn test_modify_plan_maps_old_to_new_names() {
        let snap = users_snapshot();
        let change = ColumnChange::Modify {
            old_name: "age".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("years", "INTEGER").not_null()),
        };
        let plan = plan_rebuild(&snap, change, 1700000000000).unwrap();
        assert_eq!(plan.temp_table, "users_tmp_1700000000000");
        assert_eq!(
            plan.statements[0],
            "ALTER TABLE \"users\" RENAME TO \"users_tmp_1700000000000\""
        );
        assert_eq!(
            plan.statements[1],
            "CREATE TABLE \"users\" (\n  id INTEGER PRIMARY KEY AUTOINCREMENT,\n  name TEXT NOT NULL,\n  \"years\" INTEGER NOT NULL\n)"
        );
        assert_eq!(
            plan.statements[2],
            "INSERT INTO \"users\" (\"id\", \"name\", \"years\") SELECT \"id\", \"name\", \"age\" FROM \"users_tmp_1700000000000\""
        );
        assert!(plan.statements[3].starts_with("UPDATE sqlite_sequence"));
        assert_eq!(plan.statements[4], "DROP TABLE \"users_tmp_1700000000000\"");
        // both indexes come back, the one on "age" pointing at "years"
        assert_eq!(plan.statements.len(), 7);
        assert_eq!(plan.statements[5], "CREATE INDEX idx_users_name ON users(name)");
        assert_eq!(plan.statements[6], "CREATE INDEX idx_users_age ON users(\"years\")");
    }

    fn people_snapshot(create_sql: Option<&str>) -> TableSnapshot {
        let mut full = col("full", "TEXT", 0, None, 0);
        full.push("hidden", SqlValue::Int(2));
        let columns = vec![
            col("id", "INTEGER", 0, None, 1),
            col("first", "TEXT", 0, None, 0),
            col("last", "TEXT", 0, None, 0),
            col("age", "INTEGER", 0, None, 0),
            full,
        ];
        let indexes = vec![
            row(&[
                ("index_name", SqlValue::Text("people_last_unique".into())),
                ("is_unique", SqlValue::Int(1)),
                ("origin", SqlValue::Text("c".into())),
                (
                    "sql",
                    SqlValue::Text("CREATE UNIQUE INDEX people_last_unique ON people (last)".into()),
                ),
                ("column_name", SqlValue::Text("last".into())),
            ]),
        ];
        let triggers = vec![row(&[(
            "sql",
            SqlValue::Text(
                "CREATE TRIGGER people_touch AFTER UPDATE OF last ON people BEGIN \
                 UPDATE audit SET last = NEW.last; END"
                    .into(),
            ),
        )])];
        TableSnapshot::from_rows("people", &columns, create_sql, &indexes, &[], &triggers).unwrap()
    }

    const PEOPLE_SQL: &str = "CREATE TABLE people (id INTEGER PRIMARY KEY, first TEXT COLLATE NOCASE, \
        last TEXT, age INTEGER CHECK (age >= 0), \
        full TEXT GENERATED ALWAYS AS (first || ' ' || last) VIRTUAL)";

    #[test]
    fn test_modify_keeps_untouched_column_text() {
        let snap = people_snapshot(Some(PEOPLE_SQL));
        assert!(snap.columns[4].generated);
        let change = ColumnChange::Modify {
            old_name: "last".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("surname", "TEXT").not_null()),
        };
        let plan = plan_rebuild(&snap, change, 3).unwrap();
        assert_eq!(
            plan.statements[1],
            "CREATE TABLE \"people\" (\n  id INTEGER PRIMARY KEY,\n  first TEXT COLLATE NOCASE,\n  \
             \"surname\" TEXT NOT NULL,\n  age INTEGER CHECK (age >= 0),\n  \
             full TEXT GENERATED ALWAYS AS (first || ' ' || \"surname\") VIRTUAL\n)"
        );
        // generated columns are computed, not copied
        assert_eq!(
            plan.statements[2],
            "INSERT INTO \"people\" (\"id\", \"first\", \"surname\", \"age\") \
             SELECT \"id\", \"first\", \"last\", \"age\" FROM \"people_tmp_3\""
        );
        // the unique index follows the new definition, which dropped UNIQUE
        assert!(!plan.statements.iter().any(|s| s.contains("people_last_unique")));
        assert_eq!(
            plan.statements.last().unwrap(),
            "CREATE TRIGGER people_touch AFTER UPDATE OF \"surname\" ON people BEGIN \
             UPDATE audit SET last = NEW.\"surname\"; END"
        );
    }

    #[test]
    fn test_modify_keeps_unique_index_when_still_unique() {
        let snap = people_snapshot(Some(PEOPLE_SQL));
        let change = ColumnChange::Modify {
            old_name: "last".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("surname", "TEXT").unique()),
        };
        let plan = plan_rebuild(&snap, change, 3).unwrap();
        assert!(plan.statements[1].contains("\"surname\" TEXT,"));
        assert!(plan.statements.contains(&"CREATE UNIQUE INDEX people_last_unique ON people (\"surname\")".to_string()));
    }

    #[test]
    fn test_modify_into_composite_key() {
        let columns = vec![col("a", "INTEGER", 0, None, 1), col("b", "TEXT", 0, None, 0)];
        let snap = TableSnapshot::from_rows(
            "pairs",
            &columns,
            Some("CREATE TABLE pairs (a INTEGER PRIMARY KEY, b TEXT COLLATE NOCASE)"),
            &[],
            &[],
            &[],
        )
        .unwrap();
        let change = ColumnChange::Modify {
            old_name: "b".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("b", "TEXT").primary_key()),
        };
        let plan = plan_rebuild(&snap, change, 1).unwrap();
        assert_eq!(
            plan.statements[1],
            "CREATE TABLE \"pairs\" (\n  a INTEGER,\n  \"b\" TEXT,\n  PRIMARY KEY (\"a\", \"b\")\n)"
        );
    }

    #[test]
    fn test_catalog_fallback_without_table_text() {
        let snap = people_snapshot(None);
        let change = ColumnChange::Modify {
            old_name: "age".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("age", "INTEGER")),
        };
        let plan = plan_rebuild(&snap, change, 2).unwrap();
        assert!(plan.statements[1].starts_with("CREATE TABLE IF NOT EXISTS \"people\""));
        assert!(plan.statements[2].contains("\"full\""));
    }

    #[test]
    fn test_modify_unknown_column_rejected() {
        let snap = users_snapshot();
        let change = ColumnChange::Modify {
            old_name: "missing".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("x", "TEXT")),
        };
        assert!(matches!(
            plan_rebuild(&snap, change, 1),
            Err(AdapterError::InvalidInput { .. })
        ));
    }

    #[test]
    fn test_add_plan_leaves_new_column_out_of_copy() {
        let snap = users_snapshot();
        let change = ColumnChange::Add {
            spec: ColumnSpec::with_raw_default(
                ColumnDefinition::new("created_at", "TEXT"),
                Some("CURRENT_TIMESTAMP".into()),
            ),
        };
        let plan = plan_rebuild(&snap, change, 5).unwrap();
        assert!(plan.statements[1].ends_with(
            "age TEXT DEFAULT '0',\n  \"created_at\" TEXT DEFAULT CURRENT_TIMESTAMP\n)"
        ));
        assert!(!plan.statements[2].contains("created_at"));
        assert_eq!(plan.statements.len(), 7);
    }

    #[test]
    fn test_script_wraps_transaction() {
        let snap = users_snapshot();
        let change = ColumnChange::Modify {
            old_name: "name".into(),
            spec: ColumnSpec::from(ColumnDefinition::new("name", "TEXT")),
        };
        let script = plan_rebuild(&snap, change, 9).unwrap().script();
        assert!(script.starts_with("PRAGMA foreign_keys = OFF;\nPRAGMA legacy_alter_table = ON;\nBEGIN TRANSACTION;\n"));
        assert!(script.ends_with("COMMIT;\n"));
    }

    #[test]
    fn test_foreign_keys_render() {
        let fk = SnapshotForeignKey {
            ref_table: "users".into(),
            from: vec!["user_id".into()],
            to: vec!["id".into()],
            on_update: "NO ACTION".into(),
            on_delete: "CASCADE".into(),
        };
        assert_eq!(
            fk.render(),
            "FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE"
        );
    }

    #[test]
    fn test_catalog_accessors() {
        let mut snap = users_snapshot();
        snap.indexes.push(SnapshotIndex {
            name: "sqlite_autoindex_users_1".into(),
            unique: true,
            origin: "u".into(),
            sql: None,
            columns: vec!["name".into()],
        });
        assert_eq!(snap.primary_keys(), vec!["id"]);
        assert_eq!(snap.unique_keys(), vec!["name"]);
        assert!(snap.is_auto_increment("id"));
        assert!(!snap.is_auto_increment("name"));

        let columns = snap.column_infos();
        assert!(!columns[0].nullable);
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);

        let field = snap.field_info("name", "TEXT");
        assert!(field.is_unique && !field.is_nullable && !field.is_primary_key);
        let unknown = snap.field_info("computed", "");
        assert!(unknown.is_nullable && !unknown.is_unique);
    }

    #[test]
    fn test_type_modifiers() {
        assert_eq!(type_modifiers("VARCHAR(40)"), (Some(40), None, None));
        assert_eq!(type_modifiers("DECIMAL(10, 2)"), (None, Some(10), Some(2)));
        assert_eq!(type_modifiers("INTEGER"), (None, None, None));
    }
}
