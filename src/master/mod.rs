//! The master runtime context and its startup sequence.
//!
//! [`Master`] is built once at startup and shared by `Arc` with every request
//! handler. It owns the actor system and the handles of the two long-lived
//! actors, along with the storage and collaborator handles.

pub mod recovery;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::actor::{ActorAddress, ActorRef, ActorSystem};
use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::db::{Database, InMemoryDatabase, TrialLog};
use crate::logs::{LogBuffer, LogEntry, LogWindow};
use crate::rpc::RpcServer;
use crate::rwlock::{
    Coordinator, CoordinatorMessage, LockRequest, LockSnapshot, SessionMessage, COORDINATOR_NAME,
};
use crate::trial_logger::{TrialLogger, TrialLoggerMessage, TRIAL_LOGGER_NAME};
use crate::transport::{self, tls};
use crate::types::{ClusterId, Config, Error, MasterId, Result};
use recovery::{restore_jobs, JobResumer, NoopResumer};

/// SAML initiation path advertised on the IdP recipient host.
const SAML_INITIATE_PATH: &str = "/saml/initiate";

/// External systems the master talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub db: Arc<dyn Database>,
    pub resumer: Arc<dyn JobResumer>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Fresh in-memory storage, no-op resumer, and the configured API tokens.
    pub fn in_memory(config: &Config) -> Result<Self> {
        let cluster_id = ClusterId::from_string(uuid::Uuid::new_v4().to_string())
            .map_err(Error::internal)?;
        Ok(Self {
            db: Arc::new(InMemoryDatabase::new(cluster_id)),
            resumer: Arc::new(NoopResumer),
            authenticator: Arc::new(StaticTokenAuthenticator::new(
                config.security.api_tokens.iter().cloned(),
            )),
        })
    }
}

/// Telemetry advertisement on `/info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryInfo {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoProvider {
    pub name: String,
    pub sso_url: String,
}

/// Response of `/info` and `master.GetInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_id: ClusterId,
    pub master_id: MasterId,
    pub version: String,
    pub cluster_name: String,
    pub telemetry: TelemetryInfo,
    pub sso_providers: Vec<SsoProvider>,
}

/// Explicit runtime context of one master process.
pub struct Master {
    id: MasterId,
    cluster_id: ClusterId,
    version: String,
    config: Config,
    logs: LogBuffer,
    system: ActorSystem,
    coordinator: ActorRef<CoordinatorMessage>,
    trial_logger: ActorRef<TrialLoggerMessage>,
    collaborators: Collaborators,
    tls: Option<Arc<rustls::ServerConfig>>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("id", &self.id)
            .field("cluster_id", &self.cluster_id)
            .field("version", &self.version)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl Master {
    /// Resolve the cluster identity, load TLS material, and start the
    /// top-level actors.
    pub async fn setup(
        config: Config,
        version: impl Into<String>,
        logs: LogBuffer,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let version = version.into();
        let id = MasterId::new();
        tracing::info!(version = %version, master_id = %id, "master_starting");

        let cluster_id = collaborators.db.cluster_id().await?;
        tracing::info!(cluster_id = %cluster_id, "cluster_identity_loaded");

        let tls = tls::load_server_config(&config.security.tls)?;

        let system = ActorSystem::new("master");
        let root = ActorAddress::root();
        let trial_logger = system.spawn(
            &root,
            TRIAL_LOGGER_NAME,
            TrialLogger::new(collaborators.db.clone(), config.trial_logger.clone()),
        )?;
        let coordinator = system.spawn(&root, COORDINATOR_NAME, Coordinator::new())?;

        Ok(Arc::new(Self {
            id,
            cluster_id,
            version,
            config,
            logs,
            system,
            coordinator,
            trial_logger,
            collaborators,
            tls,
        }))
    }

    pub fn id(&self) -> &MasterId {
        &self.id
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.collaborators.authenticator.clone()
    }

    /// Single-sign-on providers to advertise. Fails on a malformed IdP URL.
    pub fn sso_providers(&self) -> Result<Vec<SsoProvider>> {
        let saml = &self.config.saml;
        if !saml.enabled {
            return Ok(Vec::new());
        }
        let mut url = url::Url::parse(&saml.idp_recipient_url).map_err(|e| {
            Error::internal(format!(
                "invalid SAML IdP recipient URL {:?}: {}",
                saml.idp_recipient_url, e
            ))
        })?;
        url.set_path(SAML_INITIATE_PATH);
        Ok(vec![SsoProvider {
            name: saml.provider.clone(),
            sso_url: url.to_string(),
        }])
    }

    pub fn info(&self) -> Result<ClusterInfo> {
        let telemetry = &self.config.telemetry;
        let segment_key = (telemetry.enabled && !telemetry.segment_webui_key.is_empty())
            .then(|| telemetry.segment_webui_key.clone());
        Ok(ClusterInfo {
            cluster_id: self.cluster_id.clone(),
            master_id: self.id.clone(),
            version: self.version.clone(),
            cluster_name: self.config.cluster_name.clone(),
            telemetry: TelemetryInfo {
                enabled: telemetry.enabled,
                segment_key,
            },
            sso_providers: self.sso_providers()?,
        })
    }

    pub fn master_logs(&self, window: LogWindow) -> Vec<LogEntry> {
        self.logs.window(window)
    }

    /// Forward trial logs to the trial logger, dropping records without a
    /// trial. Returns how many were forwarded.
    pub fn post_trial_logs(&self, logs: Vec<TrialLog>) -> usize {
        let mut forwarded = 0;
        for log in logs.into_iter().filter(|l| l.trial_id != 0) {
            if self.trial_logger.tell(TrialLoggerMessage::Log(log)) {
                forwarded += 1;
            }
        }
        forwarded
    }

    /// Queue for a lock and wait (bounded) for the grant.
    pub async fn acquire_lock(&self, request: LockRequest) -> Result<ActorRef<SessionMessage>> {
        self.coordinator
            .ask(
                |reply| CoordinatorMessage::Acquire { request, reply },
                self.config.actors.lock_ask_timeout,
            )
            .await
    }

    pub async fn lock_state(&self, resource: &str) -> Result<Option<LockSnapshot>> {
        let resource = resource.to_string();
        self.coordinator
            .ask(
                |reply| CoordinatorMessage::GetState { resource, reply },
                self.config.actors.ask_timeout,
            )
            .await
    }

    /// Revoke every grant on `resource`. Returns how many were revoked.
    pub async fn evict_lock(&self, resource: &str) -> Result<usize> {
        let resource = resource.to_string();
        self.coordinator
            .ask(
                |reply| CoordinatorMessage::Evict { resource, reply },
                self.config.actors.ask_timeout,
            )
            .await
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.server.bind_addr();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::internal(format!("could not bind {}: {}", addr, e)))
    }

    /// Register routes and run the servers on `listener`. Only returns on a
    /// fatal error or a clean stop of one of the servers.
    pub async fn serve(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let router = crate::api::router(self.clone())?;
        let rpc = RpcServer::new(self.clone(), self.config.rpc.clone());
        transport::start_servers(listener, self.tls.clone(), &self.config.server, router, rpc).await
    }

    /// Launch startup recovery, then bind and serve.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let _restoring = restore_jobs(
            self.collaborators.db.clone(),
            self.collaborators.resumer.clone(),
        )
        .await?;
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rwlock::{LockConnection, LockMode};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn master_with(config: Config) -> (Arc<Master>, Arc<InMemoryDatabase>) {
        let db = Arc::new(InMemoryDatabase::new(
            ClusterId::from_string("cluster-1".to_string()).unwrap(),
        ));
        let collaborators = Collaborators {
            db: db.clone(),
            resumer: Arc::new(NoopResumer),
            authenticator: Arc::new(StaticTokenAuthenticator::new(vec!["t".to_string()])),
        };
        let master = Master::setup(config, "1.2.3", LogBuffer::new(100), collaborators)
            .await
            .unwrap();
        (master, db)
    }

    #[tokio::test]
    async fn test_info_without_telemetry_or_sso() {
        let mut config = Config::default();
        config.cluster_name = "research".to_string();
        config.telemetry.segment_webui_key = "key".to_string();
        let (master, _) = master_with(config).await;

        let info = master.info().unwrap();
        assert_eq!(info.cluster_id.as_str(), "cluster-1");
        assert_eq!(info.version, "1.2.3");
        assert_eq!(info.cluster_name, "research");
        assert_eq!(
            info.telemetry,
            TelemetryInfo {
                enabled: false,
                segment_key: None
            }
        );
        assert!(info.sso_providers.is_empty());
    }

    #[tokio::test]
    async fn test_segment_key_needs_enabled_and_key() {
        let mut config = Config::default();
        config.telemetry.enabled = true;
        let (master, _) = master_with(config.clone()).await;
        assert_eq!(master.info().unwrap().telemetry.segment_key, None);

        config.telemetry.segment_webui_key = "key".to_string();
        let (master, _) = master_with(config).await;
        assert_eq!(
            master.info().unwrap().telemetry.segment_key.as_deref(),
            Some("key")
        );
    }

    #[tokio::test]
    async fn test_saml_provider_url() {
        let mut config = Config::default();
        config.saml.enabled = true;
        config.saml.provider = "Okta".to_string();
        config.saml.idp_recipient_url = "https://idp.example.com/sso/acs".to_string();
        let (master, _) = master_with(config).await;

        assert_eq!(
            master.sso_providers().unwrap(),
            vec![SsoProvider {
                name: "Okta".to_string(),
                sso_url: "https://idp.example.com/saml/initiate".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_malformed_saml_url_is_internal_error() {
        let mut config = Config::default();
        config.saml.enabled = true;
        config.saml.idp_recipient_url = "not a url".to_string();
        let (master, _) = master_with(config).await;

        let err = master.info().unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_half_configured_tls_fails_setup() {
        let mut config = Config::default();
        config.security.tls.cert = Some("/nonexistent/cert.pem".into());
        let collaborators = Collaborators::in_memory(&config).unwrap();
        assert!(Master::setup(config, "v", LogBuffer::new(10), collaborators)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_zero_flush_interval_fails_setup() {
        let mut config = Config::default();
        config.trial_logger.flush_interval = Duration::ZERO;
        let collaborators = Collaborators::in_memory(&config).unwrap();
        assert!(Master::setup(config, "v", LogBuffer::new(10), collaborators)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_top_level_actors_started() {
        let (master, _) = master_with(Config::default()).await;
        let children = master.system().children(&ActorAddress::root());
        let names: Vec<&str> = children.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec![COORDINATOR_NAME, TRIAL_LOGGER_NAME]);
    }

    #[tokio::test]
    async fn test_post_trial_logs_drops_unset_trial() {
        let mut config = Config::default();
        config.trial_logger.flush_interval = Duration::from_millis(20);
        let (master, db) = master_with(config).await;

        let logs = vec![
            TrialLog {
                id: None,
                trial_id: 0,
                message: "orphan".to_string(),
                state: None,
            },
            TrialLog {
                id: None,
                trial_id: 7,
                message: "step 1".to_string(),
                state: None,
            },
        ];
        assert_eq!(master.post_trial_logs(logs), 1);

        tokio::time::timeout(Duration::from_secs(5), async {
            while db.trial_logs().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let stored = db.trial_logs().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].trial_id, 7);
    }

    #[tokio::test]
    async fn test_lock_round_trip_through_master() {
        let (master, _) = master_with(Config::default()).await;
        let connection = LockConnection::new();
        let session = master
            .acquire_lock(LockRequest {
                resource: "/ws/data-layer/a".to_string(),
                mode: LockMode::Write,
                connection: connection.clone(),
            })
            .await
            .unwrap();

        let state = master.lock_state("/ws/data-layer/a").await.unwrap().unwrap();
        assert_eq!(state.holders.len(), 1);
        assert_eq!(state.holders[0].mode, LockMode::Write);

        assert_eq!(master.evict_lock("/ws/data-layer/a").await.unwrap(), 1);
        tokio::time::timeout(Duration::from_secs(5), session.await_termination())
            .await
            .unwrap();
        assert!(connection.is_close_requested());
    }
}
