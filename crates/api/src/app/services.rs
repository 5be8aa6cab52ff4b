//! Ledger service wiring shared by every route.

use std::sync::Arc;

use stockledger_infra::store::{InMemoryLedgerStore, LedgerQuery, LedgerStore, PostgresLedgerStore, StoreError};
use stockledger_infra::{
    AdjustmentBatchProcessor, LedgerSettings, ReservationManager, ReversalEngine, StockLedger,
};
use stockledger_inventory::{Taxonomy, ValidationPolicy};

/// Ledger services over one store. Routes reach it through `Extension`.
pub struct AppServices<S> {
    ledger: Arc<StockLedger<S>>,
    reservations: ReservationManager<S>,
    batches: AdjustmentBatchProcessor<S>,
    reversal: ReversalEngine<S>,
}

impl<S> AppServices<S>
where
    S: LedgerStore + LedgerQuery,
{
    pub fn new(store: S, settings: LedgerSettings) -> Self {
        let policy = ValidationPolicy {
            max_observation_len: settings.max_note_len,
        };
        let ledger = Arc::new(StockLedger::new(store, settings));
        Self {
            reservations: ReservationManager::new(ledger.clone()),
            batches: AdjustmentBatchProcessor::new(ledger.clone(), Taxonomy::default(), policy),
            reversal: ReversalEngine::new(ledger.clone()),
            ledger,
        }
    }

    pub fn ledger(&self) -> &StockLedger<S> {
        &self.ledger
    }

    /// Committed-data queries.
    pub fn query(&self) -> &S {
        self.ledger.store()
    }

    pub fn reservations(&self) -> &ReservationManager<S> {
        &self.reservations
    }

    pub fn batches(&self) -> &AdjustmentBatchProcessor<S> {
        &self.batches
    }

    pub fn reversal(&self) -> &ReversalEngine<S> {
        &self.reversal
    }
}

pub fn in_memory_services(settings: LedgerSettings) -> AppServices<InMemoryLedgerStore> {
    AppServices::new(InMemoryLedgerStore::new(), settings)
}

pub async fn postgres_services(
    database_url: &str,
    max_connections: u32,
    settings: LedgerSettings,
) -> Result<AppServices<PostgresLedgerStore>, StoreError> {
    let store = PostgresLedgerStore::connect(database_url, max_connections).await?;
    Ok(AppServices::new(store, settings))
}
