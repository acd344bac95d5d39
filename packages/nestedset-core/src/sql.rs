//! SQL rendering shared by the relational adapters. Every bound parameter is an `i64`, so the
//! adapters only differ in placeholder syntax and in how they lock rows.

use crate::node::{Membership, NewNode};
use crate::statement::{Bound, Column, Filter, Order, Span, Statement};

pub const COLUMNS: &str = "id, parent_id, root, lft, rgt, lvl, sequence";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placeholder {
    /// `$1, $2, ...` (PostgreSQL).
    Dollar,
    /// `?1, ?2, ...` (SQLite).
    Question,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SqlText {
    pub sql: String,
    pub params: Vec<i64>,
}

struct Params {
    style: Placeholder,
    values: Vec<i64>,
}

impl Params {
    fn new(style: Placeholder) -> Self {
        Self {
            style,
            values: Vec::new(),
        }
    }

    fn bind(&mut self, value: i64) -> String {
        self.values.push(value);
        let n = self.values.len();
        match self.style {
            Placeholder::Dollar => format!("${n}"),
            Placeholder::Question => format!("?{n}"),
        }
    }

    fn finish(self, sql: String) -> SqlText {
        SqlText {
            sql,
            params: self.values,
        }
    }
}

/// Renders filters and statements against one table.
#[derive(Clone, Debug)]
pub struct SqlRenderer {
    table: String,
    style: Placeholder,
}

impl SqlRenderer {
    pub fn new(table: impl Into<String>, style: Placeholder) -> Self {
        Self {
            table: table.into(),
            style,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn select(&self, filter: &Filter, order: Order) -> SqlText {
        let mut params = Params::new(self.style);
        let clause = where_clause(filter, &mut params);
        let order_by = match order {
            Order::Left => "lft, id",
            Order::Sequence => "sequence, id",
            Order::Lock => "root, lft, id",
        };
        params.finish(format!(
            "SELECT {COLUMNS} FROM {}{clause} ORDER BY {order_by}",
            self.table
        ))
    }

    pub fn max(&self, column: Column, filter: &Filter) -> SqlText {
        let mut params = Params::new(self.style);
        let clause = where_clause(filter, &mut params);
        params.finish(format!(
            "SELECT MAX({}) FROM {}{clause}",
            column.sql_name(),
            self.table
        ))
    }

    /// `INSERT` without a `RETURNING` clause; adapters append their own id retrieval.
    pub fn insert(&self, row: &NewNode) -> SqlText {
        let mut params = Params::new(self.style);
        let parent = match row.parent {
            Some(parent) => params.bind(parent.0),
            None => "NULL".to_string(),
        };
        let root = membership_value(row.root, &mut params);
        let left = params.bind(row.left);
        let right = params.bind(row.right);
        let level = params.bind(row.level);
        let sequence = params.bind(row.sequence);
        params.finish(format!(
            "INSERT INTO {} (parent_id, root, lft, rgt, lvl, sequence) \
             VALUES ({parent}, {root}, {left}, {right}, {level}, {sequence})",
            self.table
        ))
    }

    pub fn statement(&self, stmt: &Statement) -> SqlText {
        let mut params = Params::new(self.style);
        let sql = match stmt {
            Statement::Shift {
                column,
                delta,
                filter,
            } => {
                let name = column.sql_name();
                let delta = params.bind(*delta);
                let clause = where_clause(filter, &mut params);
                format!("UPDATE {} SET {name} = {name} + {delta}{clause}", self.table)
            }
            Statement::Rebase {
                filter,
                tree,
                offset,
                depth,
            } => {
                let root = membership_value(*tree, &mut params);
                let offset = params.bind(*offset);
                let depth = params.bind(*depth);
                let clause = where_clause(filter, &mut params);
                format!(
                    "UPDATE {} SET root = {root}, lft = lft + {offset}, rgt = rgt + {offset}, \
                     lvl = lvl + {depth}{clause}",
                    self.table
                )
            }
            Statement::Link {
                id,
                parent,
                sequence,
            } => {
                let parent = match parent {
                    Some(parent) => params.bind(parent.0),
                    None => "NULL".to_string(),
                };
                let sequence = params.bind(*sequence);
                let id = params.bind(id.0);
                format!(
                    "UPDATE {} SET parent_id = {parent}, sequence = {sequence} WHERE id = {id}",
                    self.table
                )
            }
            Statement::Delete { ids } => {
                let clause = where_clause(&Filter::ids(ids.clone()), &mut params);
                format!("DELETE FROM {}{clause}", self.table)
            }
        };
        params.finish(sql)
    }
}

fn membership_value(membership: Membership, params: &mut Params) -> String {
    match membership {
        Membership::Tree(root) => params.bind(root.0),
        Membership::Detached => "NULL".to_string(),
    }
}

fn where_clause(filter: &Filter, params: &mut Params) -> String {
    let mut terms = Vec::new();
    if let Some(ids) = &filter.ids {
        if ids.is_empty() {
            terms.push("1 = 0".to_string());
        } else {
            let list: Vec<String> = ids.iter().map(|id| params.bind(id.0)).collect();
            terms.push(format!("id IN ({})", list.join(", ")));
        }
    }
    match filter.membership {
        Some(Membership::Tree(root)) => terms.push(format!("root = {}", params.bind(root.0))),
        Some(Membership::Detached) => terms.push("root IS NULL".to_string()),
        None => {}
    }
    if filter.roots_only {
        terms.push("lft = 1".to_string());
    }
    for column in Column::ALL {
        span_terms(column.sql_name(), filter.span(column), params, &mut terms);
    }
    if terms.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", terms.join(" AND "))
    }
}

fn span_terms(name: &str, span: &Span, params: &mut Params, terms: &mut Vec<String>) {
    match span.lower {
        Some(Bound::Inclusive(v)) => terms.push(format!("{name} >= {}", params.bind(v))),
        Some(Bound::Exclusive(v)) => terms.push(format!("{name} > {}", params.bind(v))),
        None => {}
    }
    match span.upper {
        Some(Bound::Inclusive(v)) => terms.push(format!("{name} <= {}", params.bind(v))),
        Some(Bound::Exclusive(v)) => terms.push(format!("{name} < {}", params.bind(v))),
        None => {}
    }
}

/// Table names are interpolated into SQL and must be plain identifiers.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
