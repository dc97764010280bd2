//! Typed insert/select accessors over the revision tables.
//!
//! [`Tables`] borrows a connection (or an open transaction, which derefs to
//! one) together with the physical names and dialect. It enforces row shape
//! and nothing else; policy lives in the recorder and reconstructor.

use hashbrown::HashMap;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types::Value as SqlValue};
use serde_json::Value;

use crate::{
    event::{EventFact, EventInfo, EventInfoBase, VersionFact, VersionRecord},
    names::NameConfig,
    page::{Attribute, AttributeMap, PagePlan},
    types::{EventId, EventPosition, ImplementorType, NodeRef, SchemaVersion, TimestampMs},
};

use super::{
    StoreError, StoreResult,
    dialect::{Dialect, LastInsertId},
};

const EVENT: &str = "e";
const NODE_CHANGE: &str = "nc";
const SNAPSHOT: &str = "ns";
const LINK_CHANGE: &str = "lc";
const FRAGMENT: &str = "fr";

pub struct Tables<'c> {
    conn: &'c Connection,
    names: &'c NameConfig,
    dialect: &'c dyn Dialect,
}

/// Raw joined row, decoded into a [`VersionRecord`] outside the row callback.
struct VersionRow {
    id: EventId,
    created_at: TimestampMs,
    user_id: String,
    node_name: String,
    node_id: String,
    resolver_operation: String,
    implementor_type_id: i64,
    revision_data: Option<String>,
    node_schema_version: Option<SchemaVersion>,
    snapshot: Option<String>,
    link_node_name: Option<String>,
    link_node_id: Option<String>,
    parent_node_name: Option<String>,
    parent_node_id: Option<String>,
    child_node_name: Option<String>,
    child_node_id: Option<String>,
}

impl<'c> Tables<'c> {
    pub fn new(conn: &'c Connection, names: &'c NameConfig, dialect: &'c dyn Dialect) -> Self {
        Self {
            conn,
            names,
            dialect,
        }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote(ident)
    }

    fn col(&self, alias: &str, column: &str) -> String {
        format!("{alias}.{}", self.q(column))
    }

    // --- writes -----------------------------------------------------------

    /// Inserts an event with its implementor row and role associations.
    pub fn insert_event_graph(&self, info: &EventInfo) -> StoreResult<EventId> {
        let id = self.insert_event(&info.base, info.fact.implementor_type())?;
        match &info.fact {
            EventFact::NodeChange(change) => {
                self.insert_node_change(id, &change.revision_data, change.node_schema_version)?;
                if let Some(snapshot) = &change.snapshot {
                    self.insert_node_snapshot(
                        id,
                        snapshot,
                        change.node_schema_version,
                        info.base.created_at,
                    )?;
                }
            }
            EventFact::LinkChange(link) => self.insert_link_change(id, &link.link_node)?,
            EventFact::FragmentRegister(fragment) => {
                self.insert_fragment_register(id, &fragment.parent, &fragment.child)?
            }
        }
        self.insert_user_roles(id, &info.base.user_roles)?;
        Ok(id)
    }

    pub fn insert_event(&self, base: &EventInfoBase, kind: ImplementorType) -> StoreResult<EventId> {
        let c = &self.names.event;
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.q(&self.names.tables.event),
            self.q(&c.created_at),
            self.q(&c.user_id),
            self.q(&c.node_name),
            self.q(&c.node_id),
            self.q(&c.resolver_operation),
            self.q(&c.implementor_type_id),
        );
        let values = params![
            base.created_at,
            base.user_id,
            base.node.node_name,
            base.node.node_id,
            base.resolver_operation,
            kind.id(),
        ];
        let id = match self.dialect.last_insert_id(&c.id) {
            LastInsertId::Returning(suffix) => {
                self.conn
                    .query_row(&format!("{sql}{suffix}"), values, |row| row.get(0))?
            }
            LastInsertId::FollowUpQuery(query) => {
                self.conn.execute(&sql, values)?;
                self.conn.query_row(&query, [], |row| row.get(0))?
            }
        };
        Ok(id)
    }

    pub fn insert_node_change(
        &self,
        event_id: EventId,
        revision_data: &Value,
        node_schema_version: SchemaVersion,
    ) -> StoreResult<()> {
        let c = &self.names.event_node_change;
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3)",
            self.q(&self.names.tables.event_node_change),
            self.q(&c.event_id),
            self.q(&c.revision_data),
            self.q(&c.node_schema_version),
        );
        let payload = serde_json::to_string(revision_data)?;
        self.conn
            .execute(&sql, params![event_id, payload, node_schema_version])?;
        Ok(())
    }

    pub fn insert_node_snapshot(
        &self,
        event_id: EventId,
        snapshot: &Value,
        node_schema_version: SchemaVersion,
        created_at: TimestampMs,
    ) -> StoreResult<()> {
        let c = &self.names.node_snapshot;
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4)",
            self.q(&self.names.tables.node_snapshot),
            self.q(&c.event_id),
            self.q(&c.snapshot),
            self.q(&c.node_schema_version),
            self.q(&c.created_at),
        );
        let payload = serde_json::to_string(snapshot)?;
        self.conn.execute(
            &sql,
            params![event_id, payload, node_schema_version, created_at],
        )?;
        Ok(())
    }

    pub fn insert_link_change(&self, event_id: EventId, link_node: &NodeRef) -> StoreResult<()> {
        let c = &self.names.event_link_change;
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}) VALUES (?1, ?2, ?3)",
            self.q(&self.names.tables.event_link_change),
            self.q(&c.event_id),
            self.q(&c.node_name),
            self.q(&c.node_id),
        );
        self.conn
            .execute(&sql, params![event_id, link_node.node_name, link_node.node_id])?;
        Ok(())
    }

    pub fn insert_fragment_register(
        &self,
        event_id: EventId,
        parent: &NodeRef,
        child: &NodeRef,
    ) -> StoreResult<()> {
        let c = &self.names.event_node_fragment_register;
        let sql = format!(
            "INSERT INTO {} ({}, {}, {}, {}, {}) VALUES (?1, ?2, ?3, ?4, ?5)",
            self.q(&self.names.tables.event_node_fragment_register),
            self.q(&c.event_id),
            self.q(&c.parent_node_name),
            self.q(&c.parent_node_id),
            self.q(&c.child_node_name),
            self.q(&c.child_node_id),
        );
        self.conn.execute(
            &sql,
            params![
                event_id,
                parent.node_name,
                parent.node_id,
                child.node_name,
                child.node_id
            ],
        )?;
        Ok(())
    }

    /// Looks up a role id, inserting the role first if it is new.
    pub fn ensure_role(&self, role: &str) -> StoreResult<i64> {
        let c = &self.names.role;
        let table = &self.names.tables.role;
        let insert = self.dialect.insert_ignore(table, &[c.role.as_str()], "(?1)");
        self.conn.execute(&insert, params![role])?;
        let select = format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            self.q(&c.id),
            self.q(table),
            self.q(&c.role),
        );
        Ok(self.conn.query_row(&select, params![role], |row| row.get(0))?)
    }

    pub fn insert_user_roles(&self, event_id: EventId, roles: &[String]) -> StoreResult<()> {
        let c = &self.names.user_role;
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?1, ?2)",
            self.q(&self.names.tables.user_role),
            self.q(&c.role_id),
            self.q(&c.event_id),
        );
        let mut seen: Vec<&str> = Vec::with_capacity(roles.len());
        for role in roles {
            if seen.contains(&role.as_str()) {
                continue;
            }
            seen.push(role);
            let role_id = self.ensure_role(role)?;
            self.conn.execute(&sql, params![role_id, event_id])?;
        }
        Ok(())
    }

    // --- reads ------------------------------------------------------------

    /// Snapshot presence of the newest `limit` node changes for a node and
    /// schema version, newest first.
    pub fn recent_snapshot_flags(
        &self,
        node: &NodeRef,
        node_schema_version: SchemaVersion,
        limit: usize,
    ) -> StoreResult<Vec<bool>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let e = &self.names.event;
        let nc = &self.names.event_node_change;
        let ns = &self.names.node_snapshot;
        let sql = format!(
            "SELECT {snap_id} IS NOT NULL FROM {event} {EVENT} \
             JOIN {node_change} {NODE_CHANGE} ON {nc_event} = {e_id} \
             LEFT JOIN {snapshot} {SNAPSHOT} ON {snap_id} = {e_id} \
             WHERE {e_name} = ?1 AND {e_node} = ?2 AND {nc_version} = ?3 \
             ORDER BY {e_created} DESC, {e_id} DESC LIMIT ?4",
            snap_id = self.col(SNAPSHOT, &ns.event_id),
            event = self.q(&self.names.tables.event),
            node_change = self.q(&self.names.tables.event_node_change),
            snapshot = self.q(&self.names.tables.node_snapshot),
            nc_event = self.col(NODE_CHANGE, &nc.event_id),
            nc_version = self.col(NODE_CHANGE, &nc.node_schema_version),
            e_id = self.col(EVENT, &e.id),
            e_name = self.col(EVENT, &e.node_name),
            e_node = self.col(EVENT, &e.node_id),
            e_created = self.col(EVENT, &e.created_at),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![node.node_name, node.node_id, node_schema_version, limit as i64],
            |row| row.get::<_, bool>(0),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Nodes registered as fragments of `parent`, in registration order.
    pub fn fragment_children(&self, parent: &NodeRef) -> StoreResult<Vec<NodeRef>> {
        let c = &self.names.event_node_fragment_register;
        let sql = format!(
            "SELECT {child_name}, {child_id}, MIN({event_id}) AS first_seen FROM {table} \
             WHERE {parent_name} = ?1 AND {parent_id} = ?2 \
             GROUP BY {child_name}, {child_id} ORDER BY first_seen ASC",
            child_name = self.q(&c.child_node_name),
            child_id = self.q(&c.child_node_id),
            event_id = self.q(&c.event_id),
            table = self.q(&self.names.tables.event_node_fragment_register),
            parent_name = self.q(&c.parent_node_name),
            parent_id = self.q(&c.parent_node_id),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![parent.node_name, parent.node_id], |row| {
            Ok(NodeRef {
                node_name: row.get(0)?,
                node_id: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn version_select(&self) -> String {
        let n = self.names;
        let (e, nc, ns, lc, fr) = (
            &n.event,
            &n.event_node_change,
            &n.node_snapshot,
            &n.event_link_change,
            &n.event_node_fragment_register,
        );
        let e_id = self.col(EVENT, &e.id);
        let columns = [
            e_id.clone(),
            self.col(EVENT, &e.created_at),
            self.col(EVENT, &e.user_id),
            self.col(EVENT, &e.node_name),
            self.col(EVENT, &e.node_id),
            self.col(EVENT, &e.resolver_operation),
            self.col(EVENT, &e.implementor_type_id),
            self.col(NODE_CHANGE, &nc.revision_data),
            self.col(NODE_CHANGE, &nc.node_schema_version),
            self.col(SNAPSHOT, &ns.snapshot),
            self.col(LINK_CHANGE, &lc.node_name),
            self.col(LINK_CHANGE, &lc.node_id),
            self.col(FRAGMENT, &fr.parent_node_name),
            self.col(FRAGMENT, &fr.parent_node_id),
            self.col(FRAGMENT, &fr.child_node_name),
            self.col(FRAGMENT, &fr.child_node_id),
        ]
        .join(", ");

        format!(
            "SELECT {columns} FROM {event} {EVENT} \
             LEFT JOIN {node_change} {NODE_CHANGE} ON {nc_event} = {e_id} \
             LEFT JOIN {snapshot} {SNAPSHOT} ON {ns_event} = {e_id} \
             LEFT JOIN {link} {LINK_CHANGE} ON {lc_event} = {e_id} \
             LEFT JOIN {fragment} {FRAGMENT} ON {fr_event} = {e_id}",
            event = self.q(&n.tables.event),
            node_change = self.q(&n.tables.event_node_change),
            snapshot = self.q(&n.tables.node_snapshot),
            link = self.q(&n.tables.event_link_change),
            fragment = self.q(&n.tables.event_node_fragment_register),
            nc_event = self.col(NODE_CHANGE, &nc.event_id),
            ns_event = self.col(SNAPSHOT, &ns.event_id),
            lc_event = self.col(LINK_CHANGE, &lc.event_id),
            fr_event = self.col(FRAGMENT, &fr.event_id),
        )
    }

    /// `(node_name, node_id)` membership over a set of node instances.
    fn instance_condition(&self, instances: &[NodeRef]) -> (String, Vec<SqlValue>) {
        if instances.is_empty() {
            return ("0 = 1".to_string(), Vec::new());
        }
        let name = self.col(EVENT, &self.names.event.node_name);
        let id = self.col(EVENT, &self.names.event.node_id);
        let clause = instances
            .iter()
            .map(|_| format!("({name} = ? AND {id} = ?)"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let params = instances
            .iter()
            .flat_map(|node| {
                [
                    SqlValue::Text(node.node_name.clone()),
                    SqlValue::Text(node.node_id.clone()),
                ]
            })
            .collect();
        (format!("({clause})"), params)
    }

    /// Stream-order comparison against a position, e.g. `">="`.
    fn position_condition(&self, op: &str, position: EventPosition) -> (String, Vec<SqlValue>) {
        let created = self.col(EVENT, &self.names.event.created_at);
        let id = self.col(EVENT, &self.names.event.id);
        let strict = op.trim_end_matches('=');
        (
            format!("({created} {strict} ? OR ({created} = ? AND {id} {op} ?))"),
            vec![
                SqlValue::Integer(position.created_at),
                SqlValue::Integer(position.created_at),
                SqlValue::Integer(position.id),
            ],
        )
    }

    fn query_versions(
        &self,
        conditions: &[String],
        params: Vec<SqlValue>,
        order: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<VersionRecord>> {
        let mut sql = self.version_select();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(order);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok(VersionRow {
                id: row.get(0)?,
                created_at: row.get(1)?,
                user_id: row.get(2)?,
                node_name: row.get(3)?,
                node_id: row.get(4)?,
                resolver_operation: row.get(5)?,
                implementor_type_id: row.get(6)?,
                revision_data: row.get(7)?,
                node_schema_version: row.get(8)?,
                snapshot: row.get(9)?,
                link_node_name: row.get(10)?,
                link_node_id: row.get(11)?,
                parent_node_name: row.get(12)?,
                parent_node_id: row.get(13)?,
                child_node_name: row.get(14)?,
                child_node_id: row.get(15)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(decode_version_row(row?)?);
        }
        Ok(out)
    }

    fn ascending(&self) -> String {
        format!(
            "{} ASC, {} ASC",
            self.col(EVENT, &self.names.event.created_at),
            self.col(EVENT, &self.names.event.id)
        )
    }

    /// One page of versions across `instances`, shaped by a page plan.
    pub fn page_versions(
        &self,
        instances: &[NodeRef],
        plan: &PagePlan,
    ) -> StoreResult<Vec<VersionRecord>> {
        let (scope, mut params) = self.instance_condition(instances);
        let mut conditions = vec![scope];
        conditions.extend(plan.conditions.iter().cloned());
        params.extend(plan.params.iter().cloned());
        self.query_versions(&conditions, params, &plan.order_sql(), plan.limit)
    }

    /// Every event of `instances` in `[oldest, youngest]`, oldest first.
    pub fn versions_between(
        &self,
        instances: &[NodeRef],
        oldest: EventPosition,
        youngest: EventPosition,
    ) -> StoreResult<Vec<VersionRecord>> {
        let (scope, mut params) = self.instance_condition(instances);
        let (lower, lower_params) = self.position_condition(">=", oldest);
        let (upper, upper_params) = self.position_condition("<=", youngest);
        params.extend(lower_params);
        params.extend(upper_params);
        self.query_versions(&[scope, lower, upper], params, &self.ascending(), None)
    }

    /// Full stream of one node, oldest first.
    pub fn node_history(&self, node: &NodeRef) -> StoreResult<Vec<VersionRecord>> {
        let (scope, params) = self.instance_condition(std::slice::from_ref(node));
        self.query_versions(&[scope], params, &self.ascending(), None)
    }

    pub fn version(&self, id: EventId) -> StoreResult<Option<VersionRecord>> {
        let condition = format!("{} = ?", self.col(EVENT, &self.names.event.id));
        let mut found = self.query_versions(
            &[condition],
            vec![SqlValue::Integer(id)],
            &self.ascending(),
            Some(1),
        )?;
        Ok(found.pop())
    }

    /// Newest snapshot-carrying node change of `node` at or before `at`.
    pub fn nearest_snapshot(
        &self,
        node: &NodeRef,
        at: EventPosition,
    ) -> StoreResult<Option<EventPosition>> {
        let e = &self.names.event;
        let ns = &self.names.node_snapshot;
        let (scope, mut params) = self.instance_condition(std::slice::from_ref(node));
        let (upper, upper_params) = self.position_condition("<=", at);
        params.extend(upper_params);
        let sql = format!(
            "SELECT {created}, {id} FROM {event} {EVENT} \
             JOIN {snapshot} {SNAPSHOT} ON {snap_event} = {id} \
             WHERE {scope} AND {upper} \
             ORDER BY {created} DESC, {id} DESC LIMIT 1",
            created = self.col(EVENT, &e.created_at),
            id = self.col(EVENT, &e.id),
            event = self.q(&self.names.tables.event),
            snapshot = self.q(&self.names.tables.node_snapshot),
            snap_event = self.col(SNAPSHOT, &ns.event_id),
        );
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(params), |row| {
                Ok(EventPosition {
                    created_at: row.get(0)?,
                    id: row.get(1)?,
                })
            })
            .optional()?)
    }

    /// Oldest event of any of `instances`.
    pub fn earliest_position(&self, instances: &[NodeRef]) -> StoreResult<Option<EventPosition>> {
        let e = &self.names.event;
        let (scope, params) = self.instance_condition(instances);
        let sql = format!(
            "SELECT {created}, {id} FROM {event} {EVENT} WHERE {scope} \
             ORDER BY {created} ASC, {id} ASC LIMIT 1",
            created = self.col(EVENT, &e.created_at),
            id = self.col(EVENT, &e.id),
            event = self.q(&self.names.tables.event),
        );
        Ok(self
            .conn
            .query_row(&sql, params_from_iter(params), |row| {
                Ok(EventPosition {
                    created_at: row.get(0)?,
                    id: row.get(1)?,
                })
            })
            .optional()?)
    }

    /// Role labels per event, in insertion order.
    pub fn roles_for_events(&self, ids: &[EventId]) -> StoreResult<HashMap<EventId, Vec<String>>> {
        let mut out: HashMap<EventId, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(out);
        }
        let ur = &self.names.user_role;
        let r = &self.names.role;
        let marks = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT ur.{event_id}, r.{role} FROM {user_role} ur \
             JOIN {role_table} r ON r.{role_id} = ur.{ur_role} \
             WHERE ur.{event_id} IN ({marks}) ORDER BY ur.{ur_id} ASC",
            event_id = self.q(&ur.event_id),
            role = self.q(&r.role),
            user_role = self.q(&self.names.tables.user_role),
            role_table = self.q(&self.names.tables.role),
            role_id = self.q(&r.id),
            ur_role = self.q(&ur.role_id),
            ur_id = self.q(&ur.id),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
            Ok((row.get::<_, EventId>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, role) = row?;
            out.entry(id).or_default().push(role);
        }
        Ok(out)
    }

    /// Row count of one table; used by integrity checks and tests.
    pub fn count(&self, table: &str) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.q(table));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }
}

/// Pageable column space of the joined version rows.
pub fn version_attributes(names: &NameConfig, dialect: &dyn Dialect) -> AttributeMap {
    let e = &names.event;
    let nc = &names.event_node_change;
    let lc = &names.event_link_change;
    let fr = &names.event_node_fragment_register;
    let col = |alias: &str, column: &str| format!("{alias}.{}", dialect.quote(column));
    let attr = |column: String, searchable: bool, sortable: bool| Attribute {
        column,
        searchable,
        sortable,
    };

    let mut map = AttributeMap::new("id", "createdAt");
    map.insert("id", attr(col(EVENT, &e.id), false, true))
        .insert("createdAt", attr(col(EVENT, &e.created_at), false, true))
        .insert("userId", attr(col(EVENT, &e.user_id), true, true))
        .insert("nodeName", attr(col(EVENT, &e.node_name), true, true))
        .insert("nodeId", attr(col(EVENT, &e.node_id), false, true))
        .insert(
            "resolverOperation",
            attr(col(EVENT, &e.resolver_operation), true, true),
        )
        .insert("type", attr(col(EVENT, &e.implementor_type_id), false, true))
        .insert("revisionData", attr(col(NODE_CHANGE, &nc.revision_data), true, false))
        .insert(
            "nodeSchemaVersion",
            attr(col(NODE_CHANGE, &nc.node_schema_version), false, false),
        )
        .insert("linkNodeName", attr(col(LINK_CHANGE, &lc.node_name), false, false))
        .insert("linkNodeId", attr(col(LINK_CHANGE, &lc.node_id), false, false))
        .insert("parentNodeName", attr(col(FRAGMENT, &fr.parent_node_name), false, false))
        .insert("parentNodeId", attr(col(FRAGMENT, &fr.parent_node_id), false, false))
        .insert("childNodeName", attr(col(FRAGMENT, &fr.child_node_name), false, false))
        .insert("childNodeId", attr(col(FRAGMENT, &fr.child_node_id), false, false));
    map
}

fn decode_version_row(row: VersionRow) -> StoreResult<VersionRecord> {
    let corrupt = |what: &str| StoreError::Corrupt(format!("event {}: {what}", row.id));

    let kind = ImplementorType::try_from(row.implementor_type_id)
        .map_err(|other| corrupt(&format!("unknown implementor type {other}")))?;

    let fact = match kind {
        ImplementorType::NodeChange => {
            let (Some(revision_data), Some(node_schema_version)) =
                (row.revision_data.as_deref(), row.node_schema_version)
            else {
                return Err(corrupt("missing node change row"));
            };
            VersionFact::NodeChange {
                revision_data: serde_json::from_str(revision_data)?,
                node_schema_version,
                snapshot: row
                    .snapshot
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?,
            }
        }
        ImplementorType::LinkChange => {
            let (Some(node_name), Some(node_id)) = (row.link_node_name.clone(), row.link_node_id.clone())
            else {
                return Err(corrupt("missing link change row"));
            };
            VersionFact::LinkChange {
                link_node: NodeRef { node_name, node_id },
            }
        }
        ImplementorType::NodeFragmentChange => {
            let (Some(parent_name), Some(parent_id), Some(child_name), Some(child_id)) = (
                row.parent_node_name.clone(),
                row.parent_node_id.clone(),
                row.child_node_name.clone(),
                row.child_node_id.clone(),
            ) else {
                return Err(corrupt("missing fragment register row"));
            };
            VersionFact::FragmentRegister {
                parent: NodeRef {
                    node_name: parent_name,
                    node_id: parent_id,
                },
                child: NodeRef {
                    node_name: child_name,
                    node_id: child_id,
                },
            }
        }
    };

    Ok(VersionRecord {
        id: row.id,
        created_at: row.created_at,
        user_id: row.user_id,
        user_roles: Vec::new(),
        node: NodeRef {
            node_name: row.node_name,
            node_id: row.node_id,
        },
        resolver_operation: row.resolver_operation,
        fact,
    })
}
