use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::auth::{authorize, Access, Caller, ClinicAuthSource, Credentials};
use crate::engine::{Engine, EngineError, ErrorKind};
use crate::limits::MAX_LISTED_APPOINTMENTS;
use crate::model::*;
use crate::observability::{command_label, PERMISSION_DENIED_TOTAL, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};

pub struct ClinicHandler {
    engine: Arc<Engine>,
    query_parser: Arc<ClinicQueryParser>,
}

impl ClinicHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(ClinicQueryParser),
        }
    }

    fn caller<C: ClientInfo>(client: &C) -> PgWireResult<Caller> {
        client
            .metadata()
            .get("user")
            .map(|user| Caller::from_user(user))
            .ok_or_else(|| user_error("28000", "no user in startup packet".into()))
    }

    async fn run(&self, caller: &Caller, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_authorized(caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_authorized(&self, caller: &Caller, cmd: Command) -> PgWireResult<Vec<Response>> {
        match authorize(caller, &cmd) {
            Access::Granted => {}
            Access::OwnerOf(id) => {
                let appt = self.engine.get_appointment(id).await.map_err(engine_err)?;
                if !caller.owns(&appt.patient_id) {
                    return Err(permission_denied(caller, "not your appointment"));
                }
            }
            Access::Denied(reason) => return Err(permission_denied(caller, reason)),
        }
        self.execute_command(cmd).await
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        let rows = match cmd {
            Command::CreateAppointment(req) => {
                let appt = engine.create_appointment(req).await.map_err(engine_err)?;
                appointment_rows(vec![appt])
            }
            Command::ConfirmAppointment { id } => {
                let appt = engine.confirm_appointment(id).await.map_err(engine_err)?;
                appointment_rows(vec![appt])
            }
            Command::CancelAppointment { id, reason } => {
                let appt = engine
                    .cancel_appointment(id, &reason)
                    .await
                    .map_err(engine_err)?;
                appointment_rows(vec![appt])
            }
            Command::RescheduleAppointment {
                id,
                scheduled_at,
                doctor_id,
            } => {
                let appt = engine
                    .reschedule_appointment(id, scheduled_at, doctor_id)
                    .await
                    .map_err(engine_err)?;
                appointment_rows(vec![appt])
            }
            Command::SelectAppointment { id } => {
                let appt = engine.get_appointment(id).await.map_err(engine_err)?;
                appointment_rows(vec![appt])
            }
            Command::SelectPatientAppointments { patient_id } => {
                appointment_rows(engine.list_appointments_for_patient(&patient_id).await)
            }
            Command::SelectAllAppointments => {
                appointment_rows(engine.recent_appointments(MAX_LISTED_APPOINTMENTS).await)
            }
            Command::SelectAvailability { doctor_id, at } => {
                let availability = engine.check_availability(&doctor_id, at);
                availability_rows(&doctor_id, at, availability)
            }
            Command::SelectFreeSlots {
                doctor_id,
                start,
                end,
            } => {
                let spans = engine
                    .free_slots(&doctor_id, start, end)
                    .map_err(engine_err)?;
                free_slot_rows(&doctor_id, spans)
            }
            Command::SelectDoctors { doctor_type } => doctor_rows(engine.list_doctors(doctor_type)),
            Command::SelectExport { id } => {
                let bundle = engine.export_bundle(id).await.map_err(engine_err)?;
                export_rows(bundle)
            }
            Command::SelectCounts => count_rows(engine.appointment_counts().await),
        };
        Ok(vec![rows?])
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn appointment_fields() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("patient_id", Type::VARCHAR),
        text_field("doctor_id", Type::VARCHAR),
        text_field("doctor_type", Type::VARCHAR),
        text_field("scheduled_at", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("reason", Type::VARCHAR),
        text_field("note", Type::VARCHAR),
        text_field("cancellation_reason", Type::VARCHAR),
        text_field("created_at", Type::INT8),
    ]
}

fn availability_fields() -> Vec<FieldInfo> {
    vec![
        text_field("doctor_id", Type::VARCHAR),
        text_field("at", Type::INT8),
        text_field("available", Type::BOOL),
        text_field("conflicting_id", Type::VARCHAR),
    ]
}

fn free_slot_fields() -> Vec<FieldInfo> {
    vec![
        text_field("doctor_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
    ]
}

fn doctor_fields() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("type", Type::VARCHAR),
    ]
}

fn export_fields() -> Vec<FieldInfo> {
    let mut fields = appointment_fields();
    fields.push(text_field("doctor_name", Type::VARCHAR));
    fields
}

fn count_fields() -> Vec<FieldInfo> {
    vec![
        text_field("pending", Type::INT8),
        text_field("scheduled", Type::INT8),
        text_field("cancelled", Type::INT8),
        text_field("total", Type::INT8),
    ]
}

/// Result columns for a statement, judged from the table it names. Every
/// write on `appointments` returns the affected row.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    if lower.contains("appointment_exports") {
        export_fields()
    } else if lower.contains("appointment_counts") {
        count_fields()
    } else if lower.contains("free_slots") {
        free_slot_fields()
    } else if lower.contains("availability") {
        availability_fields()
    } else if lower.contains("doctors") {
        doctor_fields()
    } else if lower.contains("appointments") {
        appointment_fields()
    } else {
        vec![]
    }
}

// ── Row encoding ─────────────────────────────────────────────────

fn query_response(fields: Vec<FieldInfo>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(Arc::new(fields), stream::iter(rows)))
}

fn encode_appointment(encoder: &mut DataRowEncoder, appt: &Appointment) -> PgWireResult<()> {
    encoder.encode_field(&appt.id.to_string())?;
    encoder.encode_field(&appt.patient_id)?;
    encoder.encode_field(&appt.doctor_id)?;
    encoder.encode_field(&appt.doctor_type.to_string())?;
    encoder.encode_field(&appt.scheduled_at)?;
    encoder.encode_field(&appt.status.to_string())?;
    encoder.encode_field(&appt.reason)?;
    encoder.encode_field(&appt.note)?;
    encoder.encode_field(&appt.cancellation_reason)?;
    encoder.encode_field(&appt.created_at)
}

fn appointment_rows(appointments: Vec<Appointment>) -> PgWireResult<Response> {
    let schema = Arc::new(appointment_fields());
    let rows = appointments
        .iter()
        .map(|appt| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode_appointment(&mut encoder, appt)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(appointment_fields(), rows))
}

fn availability_rows(doctor_id: &str, at: Ms, availability: Availability) -> PgWireResult<Response> {
    let schema = Arc::new(availability_fields());
    let mut encoder = DataRowEncoder::new(schema);
    let conflicting = match availability {
        Availability::Available => None,
        Availability::Conflict(id) => Some(id.to_string()),
    };
    encoder.encode_field(&doctor_id.to_string())?;
    encoder.encode_field(&at)?;
    encoder.encode_field(&availability.is_available())?;
    encoder.encode_field(&conflicting)?;
    Ok(query_response(availability_fields(), vec![Ok(encoder.take_row())]))
}

fn free_slot_rows(doctor_id: &str, spans: Vec<Span>) -> PgWireResult<Response> {
    let schema = Arc::new(free_slot_fields());
    let doctor_id = doctor_id.to_string();
    let rows = spans
        .into_iter()
        .map(|span| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&doctor_id)?;
            encoder.encode_field(&span.start)?;
            encoder.encode_field(&span.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(free_slot_fields(), rows))
}

fn doctor_rows(doctors: Vec<Doctor>) -> PgWireResult<Response> {
    let schema = Arc::new(doctor_fields());
    let rows = doctors
        .iter()
        .map(|doctor| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&doctor.id)?;
            encoder.encode_field(&doctor.name)?;
            encoder.encode_field(&doctor.doctor_type.to_string())?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(query_response(doctor_fields(), rows))
}

fn export_rows(bundle: ExportBundle) -> PgWireResult<Response> {
    let mut encoder = DataRowEncoder::new(Arc::new(export_fields()));
    encode_appointment(&mut encoder, &bundle.appointment)?;
    encoder.encode_field(&bundle.doctor.name)?;
    Ok(query_response(export_fields(), vec![Ok(encoder.take_row())]))
}

fn count_rows(counts: StatusCounts) -> PgWireResult<Response> {
    let mut encoder = DataRowEncoder::new(Arc::new(count_fields()));
    encoder.encode_field(&(counts.pending as i64))?;
    encoder.encode_field(&(counts.scheduled as i64))?;
    encoder.encode_field(&(counts.cancelled as i64))?;
    encoder.encode_field(&(counts.total() as i64))?;
    Ok(query_response(count_fields(), vec![Ok(encoder.take_row())]))
}

#[async_trait]
impl SimpleQueryHandler for ClinicHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = Self::caller(client)?;
        self.run(&caller, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ClinicQueryParser;

#[async_trait]
impl QueryParser for ClinicQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ClinicHandler {
    type Statement = String;
    type QueryParser = ClinicQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = Self::caller(client)?;
        let sql = substitute_params(portal);
        self.run(&caller, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
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
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
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

/// Inline bound text parameters as quoted literals. Numeric columns accept
/// quoted numbers, so every parameter is quoted. Placeholders are replaced in
/// one pass over the statement text, so bound values are never rescanned.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

fn inline_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let bytes = sql.as_bytes();
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        let start = i + 1;
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let param = sql[start..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| params.get(idx));
        if let Some(value) = param {
            result.push_str(&sql[copied..i]);
            match value {
                Some(raw) => {
                    result.push('\'');
                    result.push_str(&String::from_utf8_lossy(raw.as_ref()).replace('\'', "''"));
                    result.push('\'');
                }
                None => result.push_str("NULL"),
            }
            copied = end;
        }
        i = end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ClinicFactory {
    handler: Arc<ClinicHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ClinicAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ClinicFactory {
    pub fn new(engine: Arc<Engine>, credentials: Credentials) -> Self {
        let auth_source = ClinicAuthSource::new(credentials);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ClinicHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ClinicFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<ClinicFactory>,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn permission_denied(caller: &Caller, reason: &str) -> PgWireError {
    debug!("permission denied for {caller:?}: {reason}");
    metrics::counter!(PERMISSION_DENIED_TOTAL).increment(1);
    user_error("42501", format!("permission denied: {reason}"))
}

pub fn sqlstate(e: &EngineError) -> &'static str {
    match e.kind() {
        ErrorKind::Validation => "22023",
        ErrorKind::OutOfHorizon => "22008",
        ErrorKind::Conflict => "23P01",
        ErrorKind::InvalidTransition => "55000",
        ErrorKind::NotFound => "P0002",
        ErrorKind::Infrastructure => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
