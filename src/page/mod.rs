//! Cursor pagination over an attribute-to-column map.
//!
//! [`ConnectionManager::plan`] turns a [`PageRequest`] into SQL fragments
//! (conditions, ordering, limit) that a caller splices into its own base
//! query. [`PagePlan::assemble`] turns the fetched rows back into a
//! [`Connection`] with edges and page info.

/// Cursor encoding.
pub mod cursor;

use std::collections::BTreeMap;

use rusqlite::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::VersionRecord;

pub use cursor::Cursor;

#[derive(Debug, Error, PartialEq)]
pub enum ConnectionError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),
    #[error("attribute cannot be used for ordering: {0}")]
    UnsortableAttribute(String),
    #[error("`first` and `last` cannot be combined")]
    ConflictingPageArgs,
    #[error("invalid filter on {attribute}: {reason}")]
    InvalidFilter { attribute: String, reason: String },
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    #[default]
    Desc,
}

impl SortDir {
    fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

/// One filter clause. Clauses in a request are combined with `AND`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub attribute: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(attribute: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, FilterOp::Eq, value)
    }
}

/// Relay-style page request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PageRequest {
    pub first: Option<usize>,
    pub last: Option<usize>,
    pub before: Option<String>,
    pub after: Option<String>,
    pub order_by: Option<String>,
    pub order_dir: Option<SortDir>,
    pub filter: Vec<Filter>,
    pub search: Option<String>,
}

impl PageRequest {
    pub fn first(n: usize) -> Self {
        Self {
            first: Some(n),
            ..Self::default()
        }
    }

    pub fn last(n: usize) -> Self {
        Self {
            last: Some(n),
            ..Self::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn ordered(mut self, attribute: impl Into<String>, dir: SortDir) -> Self {
        self.order_by = Some(attribute.into());
        self.order_dir = Some(dir);
        self
    }

    pub fn filtered(mut self, filter: Filter) -> Self {
        self.filter.push(filter);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge<T> {
    pub cursor: String,
    pub node: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection<T> {
    pub page_info: PageInfo,
    pub edges: Vec<Edge<T>>,
}

/// Physical column backing a pageable attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified, quoted column expression.
    pub column: String,
    /// Included in `search`.
    pub searchable: bool,
    /// Usable as `orderBy`. Only non-nullable columns qualify.
    pub sortable: bool,
}

/// Attribute name to column map that defines the pageable column space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMap {
    attributes: BTreeMap<String, Attribute>,
    id_attribute: String,
    default_order: String,
}

impl AttributeMap {
    /// `id_attribute` breaks ordering ties; `default_order` applies when a
    /// request names no `orderBy`.
    pub fn new(id_attribute: impl Into<String>, default_order: impl Into<String>) -> Self {
        Self {
            attributes: BTreeMap::new(),
            id_attribute: id_attribute.into(),
            default_order: default_order.into(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, attribute: Attribute) -> &mut Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn get(&self, name: &str) -> Result<&Attribute, ConnectionError> {
        self.attributes
            .get(name)
            .ok_or_else(|| ConnectionError::UnknownAttribute(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Rows that can be placed on a page.
pub trait Pageable {
    fn cursor_id(&self) -> i64;
    fn cursor_value(&self, attribute: &str) -> Option<Value>;
}

impl Pageable for VersionRecord {
    fn cursor_id(&self) -> i64 {
        self.id
    }

    fn cursor_value(&self, attribute: &str) -> Option<Value> {
        self.attribute(attribute)
    }
}

/// Turns page requests into SQL fragments for one attribute map.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionManager<'a> {
    attributes: &'a AttributeMap,
}

/// SQL fragments and bookkeeping for one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    /// Conditions to `AND` into the base query, using `?` placeholders.
    pub conditions: Vec<String>,
    /// Parameters for `conditions`, in placeholder order.
    pub params: Vec<SqlValue>,
    /// Ordering terms in fetch order.
    pub order: Vec<(String, SortDir)>,
    /// Row limit, one past the page size so the next page can be detected.
    pub limit: Option<usize>,
    order_attribute: String,
    page_size: Option<usize>,
    backwards: bool,
    has_after: bool,
    has_before: bool,
}

impl<'a> ConnectionManager<'a> {
    pub fn new(attributes: &'a AttributeMap) -> Self {
        Self { attributes }
    }

    pub fn plan(&self, request: &PageRequest) -> Result<PagePlan, ConnectionError> {
        if request.first.is_some() && request.last.is_some() {
            return Err(ConnectionError::ConflictingPageArgs);
        }

        let order_attribute = request
            .order_by
            .clone()
            .unwrap_or_else(|| self.attributes.default_order.clone());
        let order_column = self.attributes.get(&order_attribute)?;
        if !order_column.sortable {
            return Err(ConnectionError::UnsortableAttribute(order_attribute));
        }
        let order_column = order_column.column.clone();
        let id_column = self.attributes.get(&self.attributes.id_attribute)?.column.clone();
        let dir = request.order_dir.unwrap_or_default();

        let mut conditions = Vec::new();
        let mut params = Vec::new();

        for filter in &request.filter {
            let column = &self.attributes.get(&filter.attribute)?.column;
            let (sql, values) = filter_sql(column, filter)?;
            conditions.push(sql);
            params.extend(values);
        }

        if let Some(term) = request.search.as_deref().filter(|s| !s.is_empty()) {
            let pattern = SqlValue::Text(format!("%{term}%"));
            let searchable: Vec<&Attribute> = self
                .attributes
                .attributes
                .values()
                .filter(|a| a.searchable)
                .collect();
            if !searchable.is_empty() {
                let clauses: Vec<String> = searchable
                    .iter()
                    .map(|a| format!("{} LIKE ?", a.column))
                    .collect();
                conditions.push(format!("({})", clauses.join(" OR ")));
                params.extend(std::iter::repeat_n(pattern, searchable.len()));
            }
        }

        // `after` continues in iteration order, `before` goes against it.
        for (encoded, forward) in [(&request.after, true), (&request.before, false)] {
            let Some(encoded) = encoded else { continue };
            let cursor = Cursor::decode(encoded)?;
            let past = matches!((dir, forward), (SortDir::Asc, true) | (SortDir::Desc, false));
            let op = if past { ">" } else { "<" };
            conditions.push(format!(
                "({order_column} {op} ? OR ({order_column} = ? AND {id_column} {op} ?))"
            ));
            let value = sql_value(&cursor.value);
            params.push(value.clone());
            params.push(value);
            params.push(SqlValue::Integer(cursor.id));
        }

        let backwards = request.last.is_some();
        let fetch_dir = if backwards { dir.reversed() } else { dir };
        let page_size = request.first.or(request.last);
        let mut order = vec![(order_column.clone(), fetch_dir)];
        if order_column != id_column {
            order.push((id_column, fetch_dir));
        }

        Ok(PagePlan {
            conditions,
            params,
            order,
            limit: page_size.map(|n| n + 1),
            order_attribute,
            page_size,
            backwards,
            has_after: request.after.is_some(),
            has_before: request.before.is_some(),
        })
    }
}

impl PagePlan {
    /// `ORDER BY` body, without the keyword.
    pub fn order_sql(&self) -> String {
        self.order
            .iter()
            .map(|(column, dir)| format!("{column} {}", dir.sql()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Builds the connection from rows fetched with this plan, in fetch order.
    pub fn assemble<T: Pageable>(&self, mut rows: Vec<T>) -> Result<Connection<T>, ConnectionError> {
        let mut has_more = false;
        if let Some(size) = self.page_size {
            if rows.len() > size {
                has_more = true;
                rows.truncate(size);
            }
        }
        if self.backwards {
            rows.reverse();
        }

        let edges = rows
            .into_iter()
            .map(|row| {
                let value = row
                    .cursor_value(&self.order_attribute)
                    .ok_or_else(|| ConnectionError::UnknownAttribute(self.order_attribute.clone()))?;
                let cursor = Cursor::new(value, row.cursor_id()).encode();
                Ok(Edge { cursor, node: row })
            })
            .collect::<Result<Vec<_>, ConnectionError>>()?;

        let (has_next_page, has_previous_page) = if self.backwards {
            (self.has_before, has_more)
        } else {
            (has_more, self.has_after)
        };

        Ok(Connection {
            page_info: PageInfo {
                has_next_page,
                has_previous_page,
                start_cursor: edges.first().map(|e| e.cursor.clone()),
                end_cursor: edges.last().map(|e| e.cursor.clone()),
            },
            edges,
        })
    }
}

fn filter_sql(column: &str, filter: &Filter) -> Result<(String, Vec<SqlValue>), ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidFilter {
        attribute: filter.attribute.clone(),
        reason: reason.to_string(),
    };

    let op = match filter.op {
        FilterOp::In => {
            let Value::Array(items) = &filter.value else {
                return Err(invalid("`in` expects an array"));
            };
            if items.is_empty() {
                return Ok(("0 = 1".to_string(), Vec::new()));
            }
            let marks = vec!["?"; items.len()].join(", ");
            return Ok((
                format!("{column} IN ({marks})"),
                items.iter().map(sql_value).collect(),
            ));
        }
        FilterOp::Eq if filter.value.is_null() => return Ok((format!("{column} IS NULL"), Vec::new())),
        FilterOp::Neq if filter.value.is_null() => {
            return Ok((format!("{column} IS NOT NULL"), Vec::new()));
        }
        FilterOp::Eq => "=",
        FilterOp::Neq => "<>",
        FilterOp::Gt => ">",
        FilterOp::Gte => ">=",
        FilterOp::Lt => "<",
        FilterOp::Lte => "<=",
    };
    if filter.value.is_array() || filter.value.is_object() {
        return Err(invalid("expects a scalar"));
    }
    Ok((format!("{column} {op} ?"), vec![sql_value(&filter.value)]))
}

/// Converts a JSON scalar into a bindable SQL value.
pub fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
