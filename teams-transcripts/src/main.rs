use nexus_teams_transcripts::config::ExtensionConfig;
use nexus_teams_transcripts::controller::{Ensured, WebhookController};
use nexus_teams_transcripts::graph::{GraphClient, HostToken};
use nexus_teams_transcripts::http_server::{self, RegistrationMap};
use nexus_teams_transcripts::logging;
use nexus_teams_transcripts::store::{FileStateStore, TriggerStore};
use nexus_teams_transcripts::subscription::SubscriptionManager;
use nexus_teams_transcripts::transcripts::{TranscriptClient, TranscriptFormat};
use nexus_teams_transcripts::trigger::{self, Registration, TriggerConfig};
use nexus_teams_transcripts::types::PendingEvent;
use nexus_teams_transcripts::TeamsError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

// ─── JSON-RPC wire types ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Value,
}

#[derive(Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
    id: Value,
}

#[derive(Serialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

fn ok_response(id: Value, data: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({
            "success": true,
            "data": data,
            "message": null
        })),
        error: None,
        id,
    }
}

fn err_response(id: Value, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: None,
        error: Some(JsonRpcError { code, message }),
        id,
    }
}

// ─── Shared app state ────────────────────────────────────────────────────────

/// Graph-backed services, built once `initialize` has the config.
#[derive(Clone)]
struct Services {
    controller: Arc<WebhookController>,
    transcripts: Arc<TranscriptClient>,
}

struct AppState {
    triggers: TriggerStore,
    /// Mirror of registrations for the HTTP server (refreshed on mutation).
    registration_map: RegistrationMap,
    token: Arc<HostToken>,
    services: Option<Services>,
    port: Option<u16>,
    webhook_base_url: String,
    /// Change events received by the HTTP server, not yet published to host.
    pending_rx: Option<mpsc::UnboundedReceiver<PendingEvent>>,
}

impl AppState {
    fn new(data_dir: PathBuf) -> Self {
        Self {
            triggers: TriggerStore::new(data_dir),
            registration_map: Arc::new(RwLock::new(HashMap::new())),
            token: Arc::new(HostToken::default()),
            services: None,
            port: None,
            webhook_base_url: String::new(),
            pending_rx: None,
        }
    }

    async fn refresh_registration_map(&self) {
        let mut map = self.registration_map.write().await;
        map.clear();
        for reg in self.triggers.list() {
            map.insert(reg.id.clone(), reg.clone());
        }
    }

    fn save_triggers(&self) {
        if let Err(e) = self.triggers.save() {
            warn!(error = %e, "Failed to persist triggers");
        }
    }
}

type SharedState = Arc<RwLock<AppState>>;

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    logging::init_logging("info");

    let state: SharedState = Arc::new(RwLock::new(AppState::new(PathBuf::from("."))));

    let state_clone = state.clone();
    let handle = tokio::runtime::Handle::current();

    // Stdin loop on a blocking thread to avoid blocking the async runtime.
    let result = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut line = String::new();

        loop {
            line.clear();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                _ => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        err_response(Value::Number(0.into()), -32700, format!("Parse error: {e}"));
                    emit_line(&mut out, &resp);
                    continue;
                }
            };

            let is_shutdown = request.method == "shutdown";

            let response = handle.block_on(handle_request(&request, &state_clone, &mut out));
            emit_line(&mut out, &response);

            if is_shutdown {
                break;
            }
        }
    })
    .await;

    if let Err(e) = result {
        error!(error = %e, "stdin loop terminated abnormally");
    }
}

fn emit_line(out: &mut impl Write, resp: &JsonRpcResponse) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => error!(error = %e, "Failed to serialize response"),
    }
}

// ─── Request dispatch ─────────────────────────────────────────────────────────

async fn handle_request(
    req: &JsonRpcRequest,
    state: &SharedState,
    out: &mut dyn Write,
) -> JsonRpcResponse {
    match req.method.as_str() {
        "initialize" => handle_initialize(req, state).await,
        "shutdown" => handle_shutdown(req, state).await,
        "execute" => handle_execute(req, state, out).await,
        _ => err_response(req.id.clone(), -32601, format!("Unknown method: {}", req.method)),
    }
}

async fn handle_initialize(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    let config = match ExtensionConfig::from_params(&req.params) {
        Ok(c) => c,
        Err(e) => return err_response(req.id.clone(), -32602, e.to_string()),
    };

    let (token, registration_map) = {
        let st = state.read().await;
        (st.token.clone(), st.registration_map.clone())
    };
    if let Some(access_token) = config.access_token.clone() {
        token.set(access_token);
    }

    let graph = match GraphClient::new(config.graph_base_url.clone(), token) {
        Ok(g) => Arc::new(g),
        Err(e) => return err_response(req.id.clone(), -32603, format!("Graph client failed: {e}")),
    };
    let state_store = match FileStateStore::open(config.data_dir.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => return err_response(req.id.clone(), -32603, e.to_string()),
    };
    let controller = Arc::new(WebhookController::new(
        SubscriptionManager::with_lease_minutes(graph.clone(), config.lease_minutes),
        state_store,
    ));

    let (port, pending_rx) =
        match http_server::start(&config.bind_addr, registration_map, controller.clone()).await {
            Ok(r) => r,
            Err(e) => {
                return err_response(req.id.clone(), -32603, format!("HTTP server failed: {e}"));
            }
        };
    let webhook_base_url = config.webhook_base_url(port);

    let registrations = {
        let mut st = state.write().await;
        st.triggers = TriggerStore::new(config.data_dir.clone());
        if let Err(e) = st.triggers.load() {
            warn!(error = %e, "Failed to load triggers");
        }

        // Webhook URLs follow the current public base URL.
        for reg in st.triggers.registrations.values_mut() {
            reg.webhook_url = trigger::webhook_url_for(&webhook_base_url, &reg.id);
        }
        st.save_triggers();

        st.services = Some(Services {
            controller: controller.clone(),
            transcripts: Arc::new(TranscriptClient::new(graph)),
        });
        st.port = Some(port);
        st.webhook_base_url = webhook_base_url.clone();
        st.pending_rx = Some(pending_rx);
        st.refresh_registration_map().await;

        // Failed registrations are retried too; a transient error must not
        // strand them.
        st.triggers.list().into_iter().cloned().collect::<Vec<_>>()
    };

    if !registrations.is_empty() {
        tokio::spawn(reconcile(controller, registrations, state.clone()));
    }

    info!(port, webhook_base_url = %webhook_base_url, "Extension initialized");

    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({ "ready": true })),
        error: None,
        id: req.id.clone(),
    }
}

/// Re-activate persisted triggers after a restart, reusing live subscriptions
/// where Graph still has them.
async fn reconcile(
    controller: Arc<WebhookController>,
    registrations: Vec<Registration>,
    state: SharedState,
) {
    for reg in registrations {
        match controller.ensure(&reg).await {
            Ok(Ensured::Existing(_)) => {
                info!(registration = %reg.id, "Existing subscriptions reused");
                record_status(&state, &reg.id, "active").await;
            }
            Ok(Ensured::Created(ids)) => {
                info!(registration = %reg.id, count = ids.len(), "Subscriptions re-created");
                record_status(&state, &reg.id, "active").await;
            }
            Err(e) => {
                warn!(registration = %reg.id, error = %e, "Failed to re-create subscriptions");
                record_status(&state, &reg.id, "failed").await;
            }
        }
    }
}

async fn record_status(state: &SharedState, id: &str, status: &str) {
    let mut st = state.write().await;
    if st.triggers.get(id).is_some_and(|r| r.status != status) {
        st.triggers.set_status(id, status);
        st.save_triggers();
        st.refresh_registration_map().await;
    }
}

async fn handle_shutdown(req: &JsonRpcRequest, state: &SharedState) -> JsonRpcResponse {
    let st = state.read().await;
    st.save_triggers();
    JsonRpcResponse {
        jsonrpc: "2.0",
        result: Some(serde_json::json!({})),
        error: None,
        id: req.id.clone(),
    }
}

// ─── Execute handler ──────────────────────────────────────────────────────────

async fn handle_execute(
    req: &JsonRpcRequest,
    state: &SharedState,
    out: &mut dyn Write,
) -> JsonRpcResponse {
    drain_pending_events(state, out).await;

    let operation = req
        .params
        .get("operation")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let input = req
        .params
        .get("input")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));

    let result = match operation {
        "get_server_info" => op_get_server_info(state).await,
        "update_credentials" => op_update_credentials(&input, state).await,
        "list_triggers" => op_list_triggers(state).await,
        "activate_trigger" => op_activate_trigger(&input, state).await,
        "check_trigger" => op_check_trigger(&input, state).await,
        "deactivate_trigger" => op_deactivate_trigger(&input, state).await,
        "get_meeting" => op_get_meeting(&input, state).await,
        "list_transcripts" => op_list_transcripts(&input, state).await,
        "get_transcript" => op_get_transcript(&input, state).await,
        "get_transcript_content" => op_get_transcript_content(&input, state).await,
        "search_users" => op_search_users(&input, state).await,
        "search_meetings" => op_search_meetings(&input, state).await,
        _ => Err(format!("Unknown operation: {operation}")),
    };

    match result {
        Ok(data) => ok_response(req.id.clone(), data),
        Err(msg) => err_response(req.id.clone(), -32000, msg),
    }
}

// ─── Pending event draining ───────────────────────────────────────────────────

/// Drain change events queued by the HTTP server and publish each one as its
/// own IPC event. Must be called while the host is in its read loop (i.e.,
/// during an execute call).
async fn drain_pending_events(state: &SharedState, out: &mut dyn Write) {
    let mut pending: Vec<PendingEvent> = Vec::new();
    {
        let mut st = state.write().await;
        if let Some(rx) = &mut st.pending_rx {
            while let Ok(item) = rx.try_recv() {
                pending.push(item);
            }
        }
    }

    if pending.is_empty() {
        return;
    }

    static NEXT_ID: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(20000);
    let stdin = io::stdin();

    for event in &pending {
        let call_id = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let req = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "event.publish",
            "params": {
                "type": event.event_type,
                "subject": event.subject,
                "data": event.data,
            },
            "id": call_id,
        });
        let _ = writeln!(out, "{req}");
        let _ = out.flush();

        // Read back the host's response to keep the protocol in sync
        let mut line = String::new();
        let _ = stdin.lock().read_line(&mut line);
    }

    let mut st = state.write().await;
    for event in &pending {
        st.triggers.record_notification(&event.subject);
    }
    st.save_triggers();
    st.refresh_registration_map().await;
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

fn required_field<'a>(input: &'a Value, key: &str) -> Result<&'a str, String> {
    str_field(input, key).ok_or_else(|| format!("missing required field: {key}"))
}

async fn services(state: &SharedState) -> Result<Services, String> {
    state
        .read()
        .await
        .services
        .clone()
        .ok_or_else(|| "Extension not initialized. Send 'initialize' first.".to_string())
}

async fn registration(state: &SharedState, id: &str) -> Result<Registration, String> {
    state
        .read()
        .await
        .triggers
        .get(id)
        .cloned()
        .ok_or_else(|| format!("trigger not found: {id}"))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

// ─── Operations ───────────────────────────────────────────────────────────────

async fn op_get_server_info(state: &SharedState) -> Result<Value, String> {
    let st = state.read().await;
    let port = st.port.ok_or("server not initialized")?;
    Ok(serde_json::json!({
        "port": port,
        "webhook_base_url": st.webhook_base_url,
        "trigger_count": st.triggers.registrations.len(),
    }))
}

async fn op_update_credentials(input: &Value, state: &SharedState) -> Result<Value, String> {
    let token = required_field(input, "access_token")?;
    state.read().await.token.set(token.to_string());
    Ok(serde_json::json!({ "updated": true }))
}

async fn op_list_triggers(state: &SharedState) -> Result<Value, String> {
    let Services { controller, .. } = services(state).await?;
    let st = state.read().await;
    let items: Vec<Value> = st
        .triggers
        .list()
        .into_iter()
        .map(|reg| {
            let mut item = serde_json::to_value(reg.summary()).unwrap_or(Value::Null);
            item["subscription_ids"] =
                serde_json::json!(controller.subscription_ids(&reg.id).unwrap_or_default());
            item
        })
        .collect();
    Ok(serde_json::json!({ "triggers": items, "count": items.len() }))
}

async fn op_activate_trigger(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { controller, .. } = services(state).await?;

    let trigger: TriggerConfig = serde_json::from_value(input.clone())
        .map_err(|e| format!("invalid trigger configuration: {e}"))?;
    let name = str_field(input, "name")
        .unwrap_or("Teams transcripts")
        .to_string();

    let reg = {
        let mut st = state.write().await;
        let reg = Registration::new(name, trigger, &st.webhook_base_url);
        // Registered before any Graph call so the validation handshake resolves.
        st.triggers.upsert(reg.clone());
        st.save_triggers();
        st.refresh_registration_map().await;
        reg
    };

    match controller.create(&reg).await {
        Ok(ids) => Ok(serde_json::json!({
            "trigger": to_json(&reg.summary())?,
            "subscription_ids": ids,
        })),
        Err(TeamsError::Config(msg)) => {
            let mut st = state.write().await;
            st.triggers.remove(&reg.id);
            st.save_triggers();
            st.refresh_registration_map().await;
            Err(format!("Configuration error: {msg}"))
        }
        Err(e) => {
            record_status(state, &reg.id, "failed").await;
            Err(format!(
                "{e} (trigger {} kept; check_trigger retries, deactivate_trigger cleans up)",
                reg.id
            ))
        }
    }
}

async fn op_check_trigger(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { controller, .. } = services(state).await?;
    let reg = registration(state, required_field(input, "trigger_id")?).await?;

    // Missing subscriptions are re-created so a failed trigger can recover.
    match controller.ensure(&reg).await {
        Ok(ensured) => {
            record_status(state, &reg.id, "active").await;
            Ok(serde_json::json!({
                "trigger_id": reg.id,
                "exists": matches!(ensured, Ensured::Existing(_)),
                "recreated": matches!(ensured, Ensured::Created(_)),
                "status": "active",
                "subscription_ids": ensured.ids(),
            }))
        }
        Err(e) => {
            record_status(state, &reg.id, "failed").await;
            Err(e.to_string())
        }
    }
}

async fn op_deactivate_trigger(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { controller, .. } = services(state).await?;
    let reg = registration(state, required_field(input, "trigger_id")?).await?;

    if !controller.delete(&reg.id).await {
        return Ok(serde_json::json!({
            "deleted": false,
            "pending_subscription_ids":
                controller.subscription_ids(&reg.id).map_err(|e| e.to_string())?,
        }));
    }

    let mut st = state.write().await;
    st.triggers.remove(&reg.id);
    st.save_triggers();
    st.refresh_registration_map().await;
    Ok(serde_json::json!({ "deleted": true }))
}

async fn op_get_meeting(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { transcripts, .. } = services(state).await?;
    transcripts
        .get_meeting(
            required_field(input, "user_id")?,
            required_field(input, "meeting_id")?,
        )
        .await
        .map_err(|e| e.to_string())
}

async fn op_list_transcripts(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { transcripts, .. } = services(state).await?;
    let limit = input
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|l| l.min(u32::MAX as u64) as u32);

    let items = transcripts
        .list_transcripts(
            required_field(input, "user_id")?,
            str_field(input, "meeting_id"),
            str_field(input, "filter"),
            limit,
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "transcripts": items, "count": items.len() }))
}

async fn op_get_transcript(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { transcripts, .. } = services(state).await?;
    transcripts
        .get_transcript(
            required_field(input, "user_id")?,
            required_field(input, "meeting_id")?,
            required_field(input, "transcript_id")?,
        )
        .await
        .map_err(|e| e.to_string())
}

async fn op_get_transcript_content(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { transcripts, .. } = services(state).await?;
    let format: TranscriptFormat = match input.get("format") {
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| format!("invalid format: {e}"))?,
        None => TranscriptFormat::default(),
    };

    let content = transcripts
        .get_transcript_content(
            required_field(input, "user_id")?,
            required_field(input, "meeting_id")?,
            required_field(input, "transcript_id")?,
            format,
        )
        .await
        .map_err(|e| e.to_string())?;
    to_json(&content)
}

async fn op_search_users(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { transcripts, .. } = services(state).await?;
    let results = transcripts
        .search_users(str_field(input, "filter"))
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "results": results }))
}

async fn op_search_meetings(input: &Value, state: &SharedState) -> Result<Value, String> {
    let Services { transcripts, .. } = services(state).await?;
    let results = transcripts
        .search_meetings(
            str_field(input, "user_id").unwrap_or(""),
            str_field(input, "filter"),
        )
        .await
        .map_err(|e| e.to_string())?;
    Ok(serde_json::json!({ "results": results }))
}
