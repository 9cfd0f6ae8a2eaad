use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use catalog::{BankCatalog, CatalogBank, get_remote_bank};
use tokio::{
    sync::{Mutex, MutexGuard, RwLock, watch},
    time::Instant,
};
use tracing::{debug, info, warn};
use wizard::{
    AuthGate, ContactChannel, FileStore, MemoryStore, Services, SessionStore, SimulatedBallotBox,
    SimulatedOtp, VoterSession, Wizard, WizardError,
};

use super::{
    config::{Config, SessionBackend},
    database::{RedisStore, init_redis},
    error::AppError,
    routes::WizardView,
};

/// A signed-in voter's wizard and the last view rendered from it.
///
/// The view is kept outside the wizard lock so it can still be served while
/// a slow action (catalog fetch, OTP round-trip, submission) holds the lock.
pub struct Session {
    wizard: Mutex<Wizard>,
    view: watch::Sender<WizardView>,
    last_seen: StdMutex<Instant>,
}

impl Session {
    fn new(wizard: Wizard) -> Self {
        let (view, _) = watch::channel(WizardView::from(&wizard));

        Self {
            wizard: Mutex::new(wizard),
            view,
            last_seen: StdMutex::new(Instant::now()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Wizard> {
        self.wizard.lock().await
    }

    /// `None` while another request is working on the wizard.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Wizard>> {
        self.wizard.try_lock().ok()
    }

    /// Marks `wizard` as busy with `activity` for readers of the snapshot.
    pub fn begin(&self, wizard: &Wizard, activity: &'static str) {
        let mut view = WizardView::from(wizard);
        view.busy = Some(activity);
        self.view.send_replace(view);
    }

    pub fn publish(&self, wizard: &Wizard) -> WizardView {
        let view = WizardView::from(wizard);
        self.view.send_replace(view.clone());
        view
    }

    /// Last published view.
    pub fn snapshot(&self) -> WizardView {
        self.view.borrow().clone()
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn idle_since(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct State {
    pub config: Config,
    pub catalog: Arc<BankCatalog>,
    pub otp: Arc<SimulatedOtp>,
    pub ballot_box: Arc<SimulatedBallotBox>,
    pub store: Arc<dyn SessionStore>,
    voters: RwLock<HashMap<String, VoterSession>>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let bank = load_bank(&config).await;
        let store = init_store(&config).await;

        Self::build(config, bank, store)
    }

    pub fn build(config: Config, bank: CatalogBank, store: Arc<dyn SessionStore>) -> Arc<Self> {
        let catalog = Arc::new(BankCatalog::new(bank).with_latency(
            config.wizard.election_latency,
            config.wizard.candidate_latency,
        ));

        Arc::new(Self {
            otp: Arc::new(SimulatedOtp::new(&config.wizard)),
            ballot_box: Arc::new(SimulatedBallotBox::new(config.wizard.submission_latency)),
            catalog,
            store,
            config,
            voters: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        })
    }

    pub fn services(&self) -> Services {
        Services {
            elections: self.catalog.clone(),
            candidates: self.catalog.clone(),
            otp: self.otp.clone(),
            ballot_box: self.ballot_box.clone(),
            store: self.store.clone(),
        }
    }

    /// Signs the voter in and returns their session, resuming stored progress.
    pub async fn login(
        &self,
        session_id: &str,
        contact: ContactChannel,
    ) -> Result<Arc<Session>, AppError> {
        let voter = VoterSession::authenticated(session_id, contact);
        self.voters
            .write()
            .await
            .insert(session_id.to_string(), voter);

        // A new contact channel means a new wizard.
        self.sessions.write().await.remove(session_id);

        self.session(session_id).await
    }

    /// Forgets the voter and everything their wizard stored.
    pub async fn logout(&self, session_id: &str) -> Result<(), AppError> {
        let Some(mut voter) = self.voters.write().await.remove(session_id) else {
            return Err(AppError::UnknownSession(session_id.to_string()));
        };
        voter.logout();

        let session = self.sessions.write().await.remove(session_id);
        match session {
            Some(session) => session.lock().await.discard().await?,
            None => self
                .store
                .clear(session_id)
                .await
                .map_err(WizardError::from)?,
        }

        info!("Voter {session_id} logged out");

        Ok(())
    }

    /// The live session of a signed-in voter.
    pub async fn session(&self, session_id: &str) -> Result<Arc<Session>, AppError> {
        if let Some(session) = self.sessions.read().await.get(session_id) {
            session.touch();
            return Ok(session.clone());
        }

        let voter = self
            .voters
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| VoterSession::new(session_id));

        let resumed = Wizard::resume(&voter, self.services(), self.config.wizard.clone()).await?;
        info!("Opened wizard for {}", voter.session_id());

        let session = self
            .sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Session::new(resumed)))
            .clone();

        Ok(session)
    }

    /// Signs out voters whose session saw no request for the session TTL.
    /// Their stored progress is left to the store's own expiry.
    pub async fn evict_idle(&self) -> usize {
        let ttl = self.config.session_ttl;
        let mut sessions = self.sessions.write().await;

        let before = sessions.len();
        sessions.retain(|id, session| {
            let keep = session.idle_since().elapsed() < ttl;
            if !keep {
                debug!("Evicting idle session {id}");
            }
            keep
        });
        let evicted = before - sessions.len();

        self.voters
            .write()
            .await
            .retain(|id, _| sessions.contains_key(id));

        evicted
    }
}

async fn load_bank(config: &Config) -> CatalogBank {
    if let Some(path) = &config.catalog_path {
        info!("Loading catalog from {}", path.display());
        return CatalogBank::from_file(path).expect("Catalog misconfigured!");
    }

    if let Some(url) = &config.catalog_url {
        info!("Fetching catalog from {url}");
        return get_remote_bank(url).await.expect("Catalog misconfigured!");
    }

    warn!("No catalog configured, serving the built-in elections");
    CatalogBank::builtin()
}

async fn init_store(config: &Config) -> Arc<dyn SessionStore> {
    match config.session_backend {
        SessionBackend::Memory => Arc::new(MemoryStore::new()),
        SessionBackend::File => Arc::new(
            FileStore::open(&config.session_dir)
                .await
                .expect("Session directory misconfigured!"),
        ),
        SessionBackend::Redis => {
            let connection = init_redis(&config.redis_url)
                .await
                .expect("Redis misconfigured!");
            Arc::new(RedisStore::new(connection, config.session_ttl))
        }
    }
}
