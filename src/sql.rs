use chrono::{NaiveDate, NaiveTime};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::config::{parse_date, parse_time};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertOwner {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
    },
    UpdateOwner {
        id: Ulid,
        name: Option<String>,
        email: Option<String>,
        phone: Option<String>,
    },
    DeleteOwner {
        id: Ulid,
    },
    InsertAnimal {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        species: String,
        breed: String,
        birth_date: NaiveDate,
        passport: String,
    },
    /// `owner_id` is accepted in SET but never reaches the command.
    UpdateAnimal {
        id: Ulid,
        name: Option<String>,
        species: Option<String>,
        breed: Option<String>,
        birth_date: Option<NaiveDate>,
        passport: Option<String>,
    },
    DeleteAnimal {
        id: Ulid,
    },
    InsertVisit {
        id: Option<Ulid>,
        animal_id: Ulid,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
        diagnosis: Option<String>,
        treatment: Option<String>,
    },
    UpdateVisit {
        id: Ulid,
        date: Option<NaiveDate>,
        time: Option<NaiveTime>,
        animal_id: Option<Ulid>,
        diagnosis: Option<String>,
        treatment: Option<String>,
    },
    DeleteVisit {
        id: Ulid,
    },
    SelectVisits {
        filter: VisitFilter,
    },
    SelectOwners {
        id: Option<Ulid>,
    },
    SelectAnimals {
        filter: AnimalFilter,
    },
    SelectFreeSlots {
        date: NaiveDate,
    },
    SelectDayLoad {
        date: NaiveDate,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitFilter {
    All,
    Id(Ulid),
    Date(NaiveDate),
    Animal(Ulid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimalFilter {
    All,
    Id(Ulid),
    Owner(Ulid),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
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
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "owners" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("owners", 4, values.len()));
            }
            Ok(Command::InsertOwner {
                id: parse_ulid(&values[0])?,
                name: parse_text(&values[1])?,
                email: parse_text(&values[2])?,
                phone: parse_text(&values[3])?,
            })
        }
        "animals" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("animals", 7, values.len()));
            }
            Ok(Command::InsertAnimal {
                id: parse_ulid(&values[0])?,
                owner_id: parse_ulid(&values[1])?,
                name: parse_text(&values[2])?,
                species: parse_text(&values[3])?,
                breed: parse_text(&values[4])?,
                birth_date: parse_date_expr(&values[5])?
                    .ok_or(SqlError::Parse("birth_date is required".into()))?,
                passport: parse_text(&values[6])?,
            })
        }
        "visits" => {
            if values.len() < 6 {
                return Err(SqlError::WrongArity("visits", 6, values.len()));
            }
            Ok(Command::InsertVisit {
                id: parse_ulid_or_null(&values[0])?,
                animal_id: parse_ulid(&values[1])?,
                date: parse_date_expr(&values[2])?,
                time: parse_time_expr(&values[3])?,
                diagnosis: parse_text_or_null(&values[4])?,
                treatment: parse_text_or_null(&values[5])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    let mut set = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or(SqlError::Unsupported("tuple assignment".into()))?;
        set.push((column, &assignment.value));
    }
    let column = |name: &str| set.iter().find(|(c, _)| c == name).map(|(_, v)| *v);

    match table.as_str() {
        "visits" => Ok(Command::UpdateVisit {
            id,
            date: column("date").map(parse_date_expr).transpose()?.flatten(),
            time: column("time").map(parse_time_expr).transpose()?.flatten(),
            animal_id: column("animal_id").map(parse_ulid_or_null).transpose()?.flatten(),
            diagnosis: column("diagnosis").map(parse_text_or_null).transpose()?.flatten(),
            treatment: column("treatment").map(parse_text_or_null).transpose()?.flatten(),
        }),
        "owners" => Ok(Command::UpdateOwner {
            id,
            name: column("name").map(parse_text).transpose()?,
            email: column("email").map(parse_text).transpose()?,
            phone: column("phone").map(parse_text).transpose()?,
        }),
        "animals" => Ok(Command::UpdateAnimal {
            id,
            name: column("name").map(parse_text).transpose()?,
            species: column("species").map(parse_text).transpose()?,
            breed: column("breed").map(parse_text).transpose()?,
            birth_date: column("birth_date").map(parse_date_expr).transpose()?.flatten(),
            passport: column("passport").map(parse_text).transpose()?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "owners" => Ok(Command::DeleteOwner { id }),
        "animals" => Ok(Command::DeleteAnimal { id }),
        "visits" => Ok(Command::DeleteVisit { id }),
        _ => Err(SqlError::UnknownTable(table)),
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

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters);
    }
    let filter = |name: &str| filters.iter().find(|(c, _)| c == name).map(|(_, v)| *v);
    let required_date = |name: &'static str| -> Result<NaiveDate, SqlError> {
        filter(name)
            .map(parse_date_expr)
            .transpose()?
            .flatten()
            .ok_or(SqlError::MissingFilter(name))
    };

    match table.as_str() {
        "visits" => {
            let filter = if let Some(id) = filter("id") {
                VisitFilter::Id(parse_ulid(id)?)
            } else if let Some(animal) = filter("animal_id") {
                VisitFilter::Animal(parse_ulid(animal)?)
            } else if filter("date").is_some() {
                VisitFilter::Date(required_date("date")?)
            } else {
                VisitFilter::All
            };
            Ok(Command::SelectVisits { filter })
        }
        "owners" => Ok(Command::SelectOwners {
            id: filter("id").map(parse_ulid).transpose()?,
        }),
        "animals" => {
            let filter = if let Some(id) = filter("id") {
                AnimalFilter::Id(parse_ulid(id)?)
            } else if let Some(owner) = filter("owner_id") {
                AnimalFilter::Owner(parse_ulid(owner)?)
            } else {
                AnimalFilter::All
            };
            Ok(Command::SelectAnimals { filter })
        }
        "free_slots" => Ok(Command::SelectFreeSlots {
            date: required_date("date")?,
        }),
        "day_load" => Ok(Command::SelectDayLoad {
            date: required_date("date")?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col = value` pairs joined by AND. Anything else in the WHERE clause is ignored.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_eq_filters(left, out);
            collect_eq_filters(right, out);
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if let Some(col) = expr_column_name(left) {
                out.push((col, right));
            }
        }
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        _ => {}
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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
    let mut filters = Vec::new();
    collect_eq_filters(sel, &mut filters);
    let (_, value) = filters
        .into_iter()
        .find(|(col, _)| col == "id")
        .ok_or(SqlError::MissingFilter("id"))?;
    parse_ulid(value)
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

/// A quoted string, or `None` for SQL NULL.
fn string_or_null(expr: &Expr) -> Result<Option<&str>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.as_str())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_or_null(expr)?.ok_or(SqlError::Parse("expected ULID, got NULL".into()))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    string_or_null(expr)?
        .map(|s| Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}"))))
        .transpose()
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    Ok(parse_text_or_null(expr)?.unwrap_or_default())
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    Ok(string_or_null(expr)?.map(str::to_string))
}

fn parse_date_expr(expr: &Expr) -> Result<Option<NaiveDate>, SqlError> {
    string_or_null(expr)?
        .map(|s| parse_date(s.trim()).ok_or_else(|| SqlError::Parse(format!("bad date: {s}"))))
        .transpose()
}

fn parse_time_expr(expr: &Expr) -> Result<Option<NaiveTime>, SqlError> {
    string_or_null(expr)?
        .map(|s| parse_time(s.trim()).ok_or_else(|| SqlError::Parse(format!("bad time: {s}"))))
        .transpose()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
