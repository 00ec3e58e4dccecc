use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::StartupHandler;
use pgwire::api::auth::noop::NoopStartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::engine::{Engine, EngineError, RejectReason};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, AnimalFilter, Command, SqlError, VisitFilter};

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(VetSchedFactory::new(engine));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

pub struct VetSchedHandler {
    engine: Arc<Engine>,
    query_parser: Arc<VetSchedQueryParser>,
}

impl VetSchedHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(VetSchedQueryParser),
        }
    }

    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertOwner {
                id,
                name,
                email,
                phone,
            } => {
                engine
                    .register_owner(Owner {
                        id,
                        name,
                        email,
                        phone,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateOwner {
                id,
                name,
                email,
                phone,
            } => {
                let current = engine.get_owner(id).map_err(engine_err)?;
                let edited = Owner {
                    id,
                    name: name.unwrap_or(current.name),
                    email: email.unwrap_or(current.email),
                    phone: phone.unwrap_or(current.phone),
                };
                engine.update_owner(edited).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteOwner { id } => {
                engine.delete_owner(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertAnimal {
                id,
                owner_id,
                name,
                species,
                breed,
                birth_date,
                passport,
            } => {
                engine
                    .register_animal(Animal {
                        id,
                        owner_id,
                        name,
                        species,
                        breed,
                        birth_date,
                        passport,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateAnimal {
                id,
                name,
                species,
                breed,
                birth_date,
                passport,
            } => {
                let current = engine.get_animal(id).map_err(engine_err)?;
                let edited = Animal {
                    id,
                    owner_id: current.owner_id,
                    name: name.unwrap_or(current.name),
                    species: species.unwrap_or(current.species),
                    breed: breed.unwrap_or(current.breed),
                    birth_date: birth_date.unwrap_or(current.birth_date),
                    passport: passport.unwrap_or(current.passport),
                };
                engine.update_animal(edited).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteAnimal { id } => {
                engine.delete_animal(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertVisit {
                id,
                animal_id,
                date,
                time,
                diagnosis,
                treatment,
            } => {
                engine
                    .create_visit(BookingRequest {
                        id,
                        animal_id,
                        when: Proposal { date, time },
                        diagnosis: diagnosis.unwrap_or_default(),
                        treatment: treatment.unwrap_or_default(),
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateVisit {
                id,
                date,
                time,
                animal_id,
                diagnosis,
                treatment,
            } => {
                let edit = VisitEdit {
                    when: Proposal { date, time },
                    animal_id,
                    diagnosis,
                    treatment,
                };
                engine.reschedule_visit(id, edit).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteVisit { id } => {
                engine.delete_visit(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectVisits { filter } => {
                let visits = match filter {
                    VisitFilter::All => engine.list_visits().await,
                    VisitFilter::Id(id) => engine.get_visit(id).await.map(|v| vec![v]),
                    VisitFilter::Date(date) => engine.visits_on_date(date).await,
                    VisitFilter::Animal(animal) => engine.visits_for_animal(animal).await,
                }
                .map_err(engine_err)?;
                let schema = Arc::new(visits_schema());
                let rows: Vec<PgWireResult<_>> = visits
                    .iter()
                    .map(|v| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&v.id.to_string())?;
                        encoder.encode_field(&v.animal_id.to_string())?;
                        encoder.encode_field(&v.date.to_string())?;
                        encoder.encode_field(&v.time.format("%H:%M").to_string())?;
                        encoder.encode_field(&v.diagnosis)?;
                        encoder.encode_field(&v.treatment)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectOwners { id } => {
                let owners = match id {
                    Some(id) => vec![engine.get_owner(id).map_err(engine_err)?],
                    None => engine.list_owners(),
                };
                let schema = Arc::new(owners_schema());
                let rows: Vec<PgWireResult<_>> = owners
                    .iter()
                    .map(|o| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&o.id.to_string())?;
                        encoder.encode_field(&o.name)?;
                        encoder.encode_field(&o.email)?;
                        encoder.encode_field(&o.phone)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectAnimals { filter } => {
                let animals = match filter {
                    AnimalFilter::All => engine.list_animals(),
                    AnimalFilter::Id(id) => vec![engine.get_animal(id).map_err(engine_err)?],
                    AnimalFilter::Owner(owner) => engine.animals_of_owner(owner),
                };
                let schema = Arc::new(animals_schema());
                let rows: Vec<PgWireResult<_>> = animals
                    .iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.id.to_string())?;
                        encoder.encode_field(&a.owner_id.to_string())?;
                        encoder.encode_field(&a.name)?;
                        encoder.encode_field(&a.species)?;
                        encoder.encode_field(&a.breed)?;
                        encoder.encode_field(&a.birth_date.to_string())?;
                        encoder.encode_field(&a.passport)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectFreeSlots { date } => {
                let slots = engine.free_slots(date).await.map_err(engine_err)?;
                let schema = Arc::new(free_slots_schema());
                let date_str = date.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|start| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&date_str)?;
                        encoder.encode_field(&start.format("%H:%M").to_string())?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectDayLoad { date } => {
                let load = engine.day_load(date).await.map_err(engine_err)?;
                let schema = Arc::new(day_load_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&load.date.to_string())?;
                encoder.encode_field(&to_int4(load.booked))?;
                encoder.encode_field(&to_int4(load.remaining))?;
                encoder.encode_field(&to_int4(engine.config().daily_capacity))?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

fn to_int4(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT4, FieldFormat::Text)
}

fn visits_schema() -> Vec<FieldInfo> {
    ["id", "animal_id", "date", "time", "diagnosis", "treatment"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn owners_schema() -> Vec<FieldInfo> {
    ["id", "name", "email", "phone"].into_iter().map(text_field).collect()
}

fn animals_schema() -> Vec<FieldInfo> {
    ["id", "owner_id", "name", "species", "breed", "birth_date", "passport"]
        .into_iter()
        .map(text_field)
        .collect()
}

fn free_slots_schema() -> Vec<FieldInfo> {
    vec![text_field("date"), text_field("time")]
}

fn day_load_schema() -> Vec<FieldInfo> {
    vec![
        text_field("date"),
        int_field("booked"),
        int_field("remaining"),
        int_field("capacity"),
    ]
}

/// Row description for a statement, decided from the table after FROM.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    if !lower.starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|word| *word != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == ';' || c == '"'));
    match table {
        Some("visits") => visits_schema(),
        Some("owners") => owners_schema(),
        Some("animals") => animals_schema(),
        Some("free_slots") => free_slots_schema(),
        Some("day_load") => day_load_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for VetSchedHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(query).await?])
    }
}

impl NoopStartupHandler for VetSchedHandler {}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct VetSchedQueryParser;

#[async_trait]
impl QueryParser for VetSchedQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for VetSchedHandler {
    type Statement = String;
    type QueryParser = VetSchedQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(&sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let values: Vec<Option<String>> = portal
        .parameters
        .iter()
        .map(|p| p.as_ref().map(|bytes| String::from_utf8_lossy(bytes).into_owned()))
        .collect();
    bind_params(&portal.statement.statement, &values)
}

/// Single left-to-right pass over the statement. Quoted literals are copied
/// through untouched and substituted text is never scanned again, so a bound
/// value may itself contain `$1`.
fn bind_params(sql: &str, values: &[Option<String>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.char_indices().peekable();
    let mut in_literal = false;
    while let Some((i, c)) = chars.next() {
        if in_literal {
            result.push(c);
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        match c {
            '\'' => {
                in_literal = true;
                result.push(c);
            }
            '$' => {
                let start = i + 1;
                let mut end = start;
                while let Some(&(j, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = j + 1;
                    chars.next();
                }
                let bound = sql[start..end]
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|idx| values.get(idx));
                match bound {
                    Some(Some(text)) => {
                        result.push('\'');
                        result.push_str(&text.replace('\'', "''"));
                        result.push('\'');
                    }
                    Some(None) => result.push_str("NULL"),
                    None => result.push_str(&sql[i..end]),
                }
            }
            _ => result.push(c),
        }
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct VetSchedFactory {
    handler: Arc<VetSchedHandler>,
    noop: Arc<NoopHandler>,
}

impl VetSchedFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(VetSchedHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for VetSchedFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE reported for each engine error.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Rejected(reason) => match reason {
            RejectReason::MissingField(_) => "23502",
            RejectReason::DateOutOfRange { .. } => "22007",
            RejectReason::TimeOutOfRange { .. } => "22008",
            RejectReason::NoEarlierReschedule { .. } => "23514",
            RejectReason::SlotConflict(_) => "23P01",
            RejectReason::CapacityExceeded(_) => "53400",
        },
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) | EngineError::Duplicate { .. } => "23505",
        EngineError::HasVisits(_) => "23503",
        EngineError::Invalid { .. } => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Busy(_) => "40001",
        EngineError::Store(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Field;
    use chrono::NaiveDate;
    use ulid::Ulid;

    #[test]
    fn every_rejection_has_its_own_state() {
        let d = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let t = chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let cases = [
            (RejectReason::MissingField(Field::Date), "23502"),
            (RejectReason::DateOutOfRange { date: d, last_date: d }, "22007"),
            (
                RejectReason::TimeOutOfRange {
                    time: t,
                    opens_at: t,
                    last_start: t,
                },
                "22008",
            ),
            (
                RejectReason::NoEarlierReschedule { from: d, to: d },
                "23514",
            ),
            (RejectReason::SlotConflict(Ulid::new()), "23P01"),
            (RejectReason::CapacityExceeded(8), "53400"),
        ];
        let mut seen = std::collections::HashSet::new();
        for (reason, state) in cases {
            assert_eq!(sqlstate(&EngineError::Rejected(reason)), state);
            assert!(seen.insert(state), "{state} reused");
        }
        assert_eq!(sqlstate(&EngineError::NotFound(Ulid::new())), "P0002");
        assert_eq!(sqlstate(&EngineError::HasVisits(Ulid::new())), "23503");
    }

    #[test]
    fn error_message_leads_with_reason_code() {
        let err = EngineError::Rejected(RejectReason::CapacityExceeded(8));
        assert_eq!(sqlstate(&err), "53400");
        assert!(err.to_string().starts_with("capacity_exceeded:"));
        assert!(matches!(engine_err(err), PgWireError::UserError(_)));
    }

    #[test]
    fn count_params_takes_highest() {
        assert_eq!(count_params("SELECT * FROM visits"), 0);
        assert_eq!(
            count_params("UPDATE visits SET date = $2, time = $3 WHERE id = $1"),
            3
        );
        assert_eq!(count_params("SELECT '$' FROM x WHERE a = $12"), 12);
    }

    #[test]
    fn bind_params_quotes_and_nulls() {
        let sql = "INSERT INTO visits VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)";
        let mut values: Vec<Option<String>> = (1..=10).map(|i| Some(i.to_string())).collect();
        values[0] = None;
        values[4] = Some("it's".into());
        let bound = bind_params(sql, &values);
        assert!(bound.starts_with("INSERT INTO visits VALUES (NULL, '2'"));
        assert!(bound.contains("'it''s'"));
        assert!(bound.ends_with("'9', '10')"));
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let pet = Ulid::new().to_string();
        let sql = "INSERT INTO visits VALUES (NULL, $1, '2026-01-10', '09:00', $2, 'x')";
        let bound = bind_params(sql, &[Some(pet.clone()), Some("dose $1 per kg".into())]);
        assert_eq!(
            bound,
            format!("INSERT INTO visits VALUES (NULL, '{pet}', '2026-01-10', '09:00', 'dose $1 per kg', 'x')")
        );
    }

    #[test]
    fn placeholders_inside_literals_stay() {
        let bound = bind_params(
            "UPDATE visits SET time = '$2' WHERE id = $1",
            &[Some("v1".into())],
        );
        assert_eq!(bound, "UPDATE visits SET time = '$2' WHERE id = 'v1'");
        assert_eq!(bind_params("SELECT $3", &[None]), "SELECT $3");
    }

    #[test]
    fn result_schema_by_table() {
        assert_eq!(result_schema("SELECT * FROM visits WHERE id = $1").len(), 6);
        assert_eq!(result_schema("select * from animals where owner_id = $1").len(), 7);
        assert_eq!(result_schema("SELECT * FROM free_slots WHERE date = $1").len(), 2);
        assert_eq!(result_schema("SELECT * FROM day_load WHERE date = $1").len(), 4);
        assert!(result_schema("DELETE FROM visits WHERE id = $1").is_empty());
    }
}
