use std::sync::Arc;

use axum::{
    Json,
    extract::{self, Path, Query},
    http::StatusCode,
    response::IntoResponse,
};
use catalog::{Candidate, Election, ElectionCatalog};
use serde::{Deserialize, Serialize};
use tracing::debug;
use wizard::{ContactChannel, Notice, SessionState, Step, Wizard, WizardError};

use crate::{
    error::AppError,
    state::{Session, State},
};

/// Everything the front end needs to render the current step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardView {
    pub session_id: String,
    pub step: Step,
    pub step_label: &'static str,
    pub state: SessionState,
    pub elections: Vec<Election>,
    pub elections_stale: bool,
    pub constituency_query: String,
    pub constituencies: Vec<String>,
    pub candidate_query: String,
    pub candidates: Vec<Candidate>,
    pub candidates_stale: bool,
    pub verification_progress: u8,
    pub verifying: bool,
    pub submitting: bool,
    /// What the wizard is busy with while another request holds it.
    pub busy: Option<&'static str>,
    pub last_error: Option<Notice>,
}

impl From<&Wizard> for WizardView {
    fn from(wizard: &Wizard) -> Self {
        Self {
            session_id: wizard.session_id().to_string(),
            step: wizard.step(),
            step_label: wizard.step().label(),
            state: wizard.state().clone(),
            elections: wizard.elections().items.clone(),
            elections_stale: wizard.elections().stale,
            constituency_query: wizard.constituency_filter().to_string(),
            constituencies: wizard
                .visible_constituencies()
                .into_iter()
                .map(String::from)
                .collect(),
            candidate_query: wizard.candidate_filter().to_string(),
            candidates: wizard.visible_candidates().into_iter().cloned().collect(),
            candidates_stale: wizard.candidates().stale,
            verification_progress: wizard.verification_progress(),
            verifying: wizard.is_verifying(),
            submitting: wizard.is_submitting(),
            busy: None,
            last_error: wizard.last_error().cloned(),
        }
    }
}

#[derive(Deserialize)]
pub struct Login {
    contact: ContactChannel,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    constituency_query: Option<String>,
    candidate_query: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionChoice {
    election_id: String,
}

#[derive(Deserialize)]
pub struct ConstituencyChoice {
    constituency: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateChoice {
    candidate_id: String,
}

#[derive(Deserialize)]
pub struct Code {
    code: String,
}

type SharedState = extract::State<Arc<State>>;
type ViewResult = Result<Json<WizardView>, AppError>;

/// Publishes the wizard's view, then reports the outcome of the action.
fn respond<T>(session: &Session, wizard: &Wizard, result: Result<T, WizardError>) -> ViewResult {
    let view = session.publish(wizard);
    result?;

    Ok(Json(view))
}

pub async fn elections_handler(
    extract::State(state): SharedState,
) -> Result<Json<Vec<Election>>, AppError> {
    let elections = state
        .catalog
        .list_elections()
        .await
        .map_err(WizardError::from)?;

    Ok(Json(elections))
}

pub async fn login_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
    Json(payload): Json<Login>,
) -> ViewResult {
    let session = state.login(&id, payload.contact).await?;
    let wizard = session.lock().await;

    respond(&session, &wizard, Ok(()))
}

pub async fn logout_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.logout(&id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn wizard_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
    Query(filters): Query<Filters>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let Some(mut wizard) = session.try_lock() else {
        debug!("Session {id} is busy, serving its last view");
        return Ok(Json(session.snapshot()));
    };

    if let Some(query) = filters.constituency_query {
        wizard.set_constituency_filter(query);
    }
    if let Some(query) = filters.candidate_query {
        wizard.set_candidate_filter(query);
    }
    if let Err(e) = wizard.sync_verification().await {
        debug!("Session {id} could not record its identity check: {e}");
    }

    respond(&session, &wizard, Ok(()))
}

pub async fn election_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
    Json(payload): Json<ElectionChoice>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    let result = wizard.select_election(&payload.election_id).await;

    respond(&session, &wizard, result)
}

pub async fn constituency_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
    Json(payload): Json<ConstituencyChoice>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    let result = wizard.select_constituency(&payload.constituency).await;

    respond(&session, &wizard, result)
}

pub async fn candidate_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
    Json(payload): Json<CandidateChoice>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    let result = wizard.select_candidate(&payload.candidate_id).await;

    respond(&session, &wizard, result)
}

pub async fn next_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Loading");
    let result = wizard.next().await;

    respond(&session, &wizard, result)
}

pub async fn back_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Loading");
    let result = wizard.back().await;

    respond(&session, &wizard, result)
}

pub async fn reload_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Loading");
    let result = wizard.reload().await;

    respond(&session, &wizard, result)
}

pub async fn send_code_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Sending code");
    let result = wizard.send_code().await;

    respond(&session, &wizard, result)
}

pub async fn verify_code_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
    Json(payload): Json<Code>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Checking code");
    let result = wizard.verify_code(&payload.code).await;

    respond(&session, &wizard, result)
}

pub async fn confirm_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Submitting vote");
    let result = wizard.confirm_vote().await;

    respond(&session, &wizard, result)
}

pub async fn reset_handler(
    extract::State(state): SharedState,
    Path(id): Path<String>,
) -> ViewResult {
    let session = state.session(&id).await?;
    let mut wizard = session.lock().await;
    session.begin(&wizard, "Loading");
    let result = wizard.reset_voting().await;

    respond(&session, &wizard, result)
}
