pub mod cli;
pub mod client;
pub mod core;
pub mod dashboard;
pub mod query;
pub mod reconcile;
pub mod session;
pub mod store;

use crate::client::{ApiClient, DashboardApi, SessionExpiredHook};
use crate::core::cache::Store;
use crate::core::config::AppConfig;
use crate::core::models::AlertCondition;
use crate::dashboard::Dashboard;
use crate::query::QueryClient;
use crate::reconcile::snapshot::SnapshotCache;
use crate::session::Session;
use crate::session::credentials::CredentialStore;
use crate::store::KeyValueStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Collection holding credentials and identity.
pub const SESSION_COLLECTION: &str = "session";
/// Collection holding merged view snapshots.
pub const SNAPSHOT_COLLECTION: &str = "snapshots";

/// Wired application services. One instance per process, injected everywhere.
pub struct App {
    pub config: AppConfig,
    pub session: Arc<Session>,
    pub api: DashboardApi,
    pub dashboard: Dashboard,
}

impl App {
    /// Opens the on-disk store at the configured data path.
    pub fn open(config: AppConfig, hooks: Vec<Arc<dyn SessionExpiredHook>>) -> Result<Self> {
        let data_path = config.default_data_path()?;
        debug!("Using data directory {}", data_path.display());
        let store = KeyValueStore::open(&data_path);
        Ok(Self::with_store(config, &store, hooks))
    }

    /// Builds the services over `store`. `hooks` run after the session-state
    /// hook when a session expires.
    pub fn with_store(
        config: AppConfig,
        store: &dyn Store,
        hooks: Vec<Arc<dyn SessionExpiredHook>>,
    ) -> Self {
        let session_storage = store.get_collection(SESSION_COLLECTION, true);
        let credentials = Arc::new(CredentialStore::new(Arc::clone(&session_storage)));
        let session = Arc::new(Session::new(Arc::clone(&credentials), session_storage));

        let mut client = ApiClient::new(&config.api.base_url, credentials)
            .with_session_hook(Arc::clone(&session) as Arc<dyn SessionExpiredHook>);
        for hook in hooks {
            client = client.with_session_hook(hook);
        }
        let api = DashboardApi::new(Arc::new(client));

        let snapshots = Arc::new(SnapshotCache::new(
            store.get_collection(SNAPSHOT_COLLECTION, true),
        ));
        let dashboard = Dashboard::new(api.clone(), QueryClient::new(), snapshots);

        Self {
            config,
            session,
            api,
            dashboard,
        }
    }

    /// Clears the session and every cached query of the previous user.
    pub fn logout(&self) {
        self.session.logout();
        self.dashboard.reset();
    }
}

#[derive(Debug, Clone)]
pub enum AppCommand {
    Login {
        email: String,
        password: String,
    },
    Register {
        email: String,
        password: String,
        name: String,
    },
    Logout,
    Whoami,
    OAuthCallback {
        url: String,
    },
    Prices,
    Chart {
        grades: Vec<String>,
        days: Option<u32>,
    },
    Forecast {
        grade: String,
    },
    Predictions {
        grade: String,
        refresh: bool,
    },
    AlertsList {
        email: Option<String>,
    },
    AlertsCreate {
        grade: String,
        condition: AlertCondition,
        threshold: f64,
        email: Option<String>,
    },
    AlertsDelete {
        id: i64,
    },
    Market {
        date: Option<String>,
    },
    Factors {
        grade: String,
    },
    Model {
        grade: String,
    },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("pricecast starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let app = App::open(config, vec![Arc::new(cli::session::ExpiredNotice)])?;

    execute(&app, command).await
}

/// Runs `command` against already wired services.
pub async fn execute(app: &App, command: AppCommand) -> Result<()> {
    match command {
        AppCommand::Login { email, password } => cli::session::login(app, &email, &password).await,
        AppCommand::Register {
            email,
            password,
            name,
        } => cli::session::register(app, &email, &password, &name).await,
        AppCommand::Logout => cli::session::logout(app),
        AppCommand::Whoami => cli::session::whoami(app).await,
        AppCommand::OAuthCallback { url } => cli::session::oauth_callback(app, &url).await,
        AppCommand::Prices => cli::prices::current(app).await,
        AppCommand::Chart { grades, days } => {
            let grades = if grades.is_empty() {
                app.config.chart.grades.clone()
            } else {
                grades
            };
            let days = days.unwrap_or(app.config.chart.days);
            cli::prices::chart(app, &grades, days).await
        }
        AppCommand::Forecast { grade } => cli::insights::forecast(app, &grade).await,
        AppCommand::Predictions { grade, refresh } => {
            cli::insights::predictions(app, &grade, refresh).await
        }
        AppCommand::AlertsList { email } => cli::alerts::list(app, email.as_deref()).await,
        AppCommand::AlertsCreate {
            grade,
            condition,
            threshold,
            email,
        } => cli::alerts::create(app, &grade, condition, threshold, email.as_deref()).await,
        AppCommand::AlertsDelete { id } => cli::alerts::delete(app, id).await,
        AppCommand::Market { date } => cli::insights::market(app, date.as_deref()).await,
        AppCommand::Factors { grade } => cli::insights::factors(app, &grade).await,
        AppCommand::Model { grade } => cli::insights::model(app, &grade).await,
    }
}
