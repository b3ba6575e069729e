use std::collections::HashMap;

use sqlparser::ast::{
    self, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::MAX_SQL_LEN;
use crate::model::*;

/// Parsed command from SQL input. One variant per action, each carrying
/// exactly the fields that action needs.
#[derive(Debug, PartialEq)]
pub enum Command {
    CreateAppointment(NewAppointment),
    ConfirmAppointment {
        id: Ulid,
    },
    CancelAppointment {
        id: Ulid,
        reason: String,
    },
    RescheduleAppointment {
        id: Ulid,
        scheduled_at: Ms,
        doctor_id: Option<String>,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectPatientAppointments {
        patient_id: String,
    },
    SelectAllAppointments,
    SelectAvailability {
        doctor_id: String,
        at: Ms,
    },
    SelectFreeSlots {
        doctor_id: String,
        start: Ms,
        end: Ms,
    },
    SelectDoctors {
        doctor_type: Option<DoctorType>,
    },
    SelectExport {
        id: Ulid,
    },
    SelectCounts,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::Parse("query too long".into()));
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// Column order assumed when an INSERT names no columns.
const APPOINTMENT_COLUMNS: [&str; 6] = [
    "patient_id",
    "doctor_id",
    "doctor_type",
    "scheduled_at",
    "reason",
    "note",
];

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    if table != "appointments" {
        return Err(SqlError::UnknownTable(table));
    }
    let values = extract_insert_values(insert)?;

    let columns: Vec<String> = if insert.columns.is_empty() {
        APPOINTMENT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let arity_ok = if insert.columns.is_empty() {
        (4..=columns.len()).contains(&values.len())
    } else {
        values.len() == columns.len()
    };
    if !arity_ok {
        return Err(SqlError::WrongArity("appointments", columns.len(), values.len()));
    }

    let mut row: HashMap<&str, &Expr> = HashMap::new();
    for (col, value) in columns.iter().zip(values.iter()) {
        if !APPOINTMENT_COLUMNS.contains(&col.as_str()) {
            return Err(SqlError::UnknownColumn(col.clone()));
        }
        row.insert(col.as_str(), value);
    }
    let required = |col: &'static str| row.get(col).copied().ok_or(SqlError::MissingColumn(col));

    Ok(Command::CreateAppointment(NewAppointment {
        patient_id: parse_string(required("patient_id")?)?,
        doctor_id: parse_string(required("doctor_id")?)?,
        doctor_type: parse_doctor_type(required("doctor_type")?)?,
        scheduled_at: parse_i64(required("scheduled_at")?)?,
        reason: row.get("reason").map(|e| parse_string_or_null(e)).transpose()?.flatten(),
        note: row.get("note").map(|e| parse_string_or_null(e)).transpose()?.flatten(),
    }))
}

// ── UPDATE ────────────────────────────────────────────────────

/// `UPDATE appointments SET ... WHERE id = '...'`. Which columns are set
/// decides the lifecycle action.
fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    if name != "appointments" {
        return Err(SqlError::UnknownTable(name));
    }
    let id = extract_where_id(selection)?;

    let mut set: HashMap<String, &Expr> = HashMap::new();
    for assignment in assignments {
        let col = match &assignment.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.insert(col, &assignment.value);
    }

    let status = set.remove("status").map(parse_string).transpose()?;
    let reason = set.remove("cancellation_reason");
    let scheduled_at = set.remove("scheduled_at");
    let doctor_id = set.remove("doctor_id");
    if let Some(col) = set.keys().next() {
        return Err(SqlError::Unsupported(format!("cannot update column {col}")));
    }

    match (status.as_deref(), scheduled_at) {
        (Some(s), None) => match s.parse::<Status>() {
            Ok(Status::Scheduled) if reason.is_none() && doctor_id.is_none() => {
                Ok(Command::ConfirmAppointment { id })
            }
            Ok(Status::Cancelled) if doctor_id.is_none() => {
                // A missing reason reaches the engine as empty and is rejected there.
                let reason = reason
                    .map(parse_string_or_null)
                    .transpose()?
                    .flatten()
                    .unwrap_or_default();
                Ok(Command::CancelAppointment { id, reason })
            }
            Ok(Status::Pending) => Err(SqlError::Unsupported(
                "status cannot be set back to pending".into(),
            )),
            Ok(_) => Err(SqlError::Unsupported("mixed status update".into())),
            Err(e) => Err(SqlError::Parse(e)),
        },
        (None, Some(at)) if reason.is_none() => Ok(Command::RescheduleAppointment {
            id,
            scheduled_at: parse_i64(at)?,
            doctor_id: doctor_id.map(parse_string).transpose()?,
        }),
        (None, None) => Err(SqlError::MissingColumn("status or scheduled_at")),
        _ => Err(SqlError::Unsupported("mixed status update".into())),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// Conjunction of simple `column <op> literal` predicates.
#[derive(Default)]
struct Filters<'a> {
    eq: HashMap<String, &'a Expr>,
    gte: HashMap<String, &'a Expr>,
    lte: HashMap<String, &'a Expr>,
}

impl<'a> Filters<'a> {
    fn collect(expr: &'a Expr, into: &mut Self) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => Self::collect(inner, into),
            Expr::BinaryOp { left, op, right } => {
                if *op == ast::BinaryOperator::And {
                    Self::collect(left, into)?;
                    return Self::collect(right, into);
                }
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("predicate {expr}")))?;
                let target = match op {
                    ast::BinaryOperator::Eq => &mut into.eq,
                    ast::BinaryOperator::GtEq => &mut into.gte,
                    ast::BinaryOperator::LtEq => &mut into.lte,
                    _ => return Err(SqlError::Unsupported(format!("operator {op}"))),
                };
                target.insert(col, right);
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("predicate {expr}"))),
        }
    }

    fn require(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq.get(col).copied().ok_or(SqlError::MissingFilter(col))
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        Filters::collect(selection, &mut filters)?;
    }

    match table.as_str() {
        "appointments" => {
            if let Some(id) = filters.eq.get("id") {
                Ok(Command::SelectAppointment { id: parse_ulid(id)? })
            } else if let Some(patient) = filters.eq.get("patient_id") {
                Ok(Command::SelectPatientAppointments {
                    patient_id: parse_string(patient)?,
                })
            } else {
                Ok(Command::SelectAllAppointments)
            }
        }
        "availability" => Ok(Command::SelectAvailability {
            doctor_id: parse_string(filters.require("doctor_id")?)?,
            at: parse_i64(filters.require("at")?)?,
        }),
        "free_slots" => Ok(Command::SelectFreeSlots {
            doctor_id: parse_string(filters.require("doctor_id")?)?,
            start: parse_i64(
                filters
                    .gte
                    .get("start")
                    .copied()
                    .ok_or(SqlError::MissingFilter("start"))?,
            )?,
            end: parse_i64(
                filters
                    .lte
                    .get("end")
                    .copied()
                    .ok_or(SqlError::MissingFilter("end"))?,
            )?,
        }),
        "doctors" => Ok(Command::SelectDoctors {
            doctor_type: filters.eq.get("type").map(|e| parse_doctor_type(e)).transpose()?,
        }),
        "appointment_exports" => Ok(Command::SelectExport {
            id: parse_ulid(filters.require("id")?)?,
        }),
        "appointment_counts" => Ok(Command::SelectCounts),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

fn parse_doctor_type(expr: &Expr) -> Result<DoctorType, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
