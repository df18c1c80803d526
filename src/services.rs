use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::repositories::issuer::IssuerApi;
use crate::repositories::ledger::LedgerError;
use crate::settings::Settings;

pub mod cards;
pub mod commission;
mod http;
pub mod users;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Repository error: {0} - {1}")]
    Repository(String, String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Insufficient funds for user {0}")]
    InsufficientFunds(i64),
    #[error("External service error: {0} -> {1} => {2}")]
    ExternalService(String, String, String),
}

impl ServiceError {
    /// Atomic-update failures keep their type all the way to the caller.
    pub fn from_ledger(service: &str, err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds(user_id) => ServiceError::InsufficientFunds(user_id),
            other => ServiceError::Repository(service.to_string(), other.to_string()),
        }
    }
}

#[async_trait]
pub trait RequestHandler<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    async fn handle_request(&self, request: T);
}

#[async_trait]
pub trait Service<T, H>: Send + Sync + 'static
where
    T: Send + 'static,
    H: RequestHandler<T> + Clone + Send,
{
    async fn run(&mut self, handler: H, receiver: &mut mpsc::Receiver<T>) {
        while let Some(request) = receiver.recv().await {
            let handler = handler.clone();

            tokio::spawn(async move {
                handler.handle_request(request).await;
            });
        }
    }
}

/// Named single-flight lock for a batch job. A pass holds the guard for its
/// whole run; an overlapping trigger no-ops instead of interleaving.
#[derive(Clone)]
pub struct JobLease {
    name: &'static str,
    slot: Arc<Mutex<()>>,
}

impl JobLease {
    pub fn new(name: &'static str) -> Self {
        JobLease {
            name,
            slot: Arc::new(Mutex::new(())),
        }
    }

    pub fn try_acquire(&self) -> Option<OwnedMutexGuard<()>> {
        match self.slot.clone().try_lock_owned() {
            Ok(guard) => Some(guard),
            Err(_) => {
                log::debug!("{} pass already running, skipping trigger", self.name);
                None
            }
        }
    }
}

pub async fn start_services(pool: PgPool, settings: Settings) -> Result<(), anyhow::Error> {
    let issuer = Arc::new(IssuerApi::new(&settings.issuer)?);

    let commission = commission::CommissionEngine::new(pool.clone());
    let orchestrator = Arc::new(cards::CardOrchestrator::new(
        pool.clone(),
        issuer.clone(),
        commission.clone(),
        settings.cards.clone(),
    ));

    let (user_tx, mut user_rx) = mpsc::channel(512);

    log::info!("Starting user service.");
    let mut user_service = users::UserService::new();
    let user_pool_clone = pool.clone();
    let user_issuer = issuer.clone();
    let user_cards_settings = settings.cards.clone();
    tokio::spawn(async move {
        user_service
            .run(
                users::UserRequestHandler::new(user_pool_clone, user_issuer, user_cards_settings),
                &mut user_rx,
            )
            .await;
    });

    log::info!("Starting open-card pass driver.");
    let open_orchestrator = orchestrator.clone();
    let open_secs = settings.schedule.open_card_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(open_secs));
        loop {
            interval.tick().await;
            open_orchestrator.open_card_pass().await;
        }
    });

    log::info!("Starting card-status pass driver.");
    let status_orchestrator = orchestrator.clone();
    let status_secs = settings.schedule.card_status_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(status_secs));
        loop {
            interval.tick().await;
            status_orchestrator.card_status_pass().await;
        }
    });

    log::info!("Starting second-track pass driver.");
    let queue_commission = commission.clone();
    let queue_secs = settings.schedule.second_track_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(queue_secs));
        loop {
            interval.tick().await;
            queue_commission.second_track_pass().await;
        }
    });

    log::info!("Starting HTTP server.");
    http::start_http_server(&settings.server.bind, user_tx).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lease_rejects_overlapping_acquisition() {
        let lease = JobLease::new("test-pass");

        let guard = lease.try_acquire();
        assert!(guard.is_some());

        // A second trigger while the pass runs must no-op.
        assert!(lease.try_acquire().is_none());

        drop(guard);
        assert!(lease.try_acquire().is_some());
    }

    #[tokio::test]
    async fn lease_clones_share_the_slot() {
        let lease = JobLease::new("test-pass");
        let clone = lease.clone();

        let _guard = lease.try_acquire().expect("first acquisition");
        assert!(clone.try_acquire().is_none());
    }

    #[test]
    fn ledger_errors_keep_their_type() {
        let err = ServiceError::from_ledger(
            "UserService",
            crate::repositories::ledger::LedgerError::InsufficientFunds(7),
        );
        assert!(matches!(err, ServiceError::InsufficientFunds(7)));
    }
}
