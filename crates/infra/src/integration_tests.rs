//! Integration tests for the ledger services over the in-memory store.
//!
//! Verifies:
//! - every committed state keeps `0 <= reserved <= quantity`
//! - one movement per applied change, matching the kind's signed delta
//! - batch commit is all-or-nothing and reversal restores pre-batch stock
//! - concurrent writers on one stock row are serialized
//! - a batch header never leaves cancelled or processed once it got there

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use stockledger_core::{BatchId, ProductId, UserId, WarehouseId};
use stockledger_inventory::{
    BatchStatus, CatalogProduct, CatalogWarehouse, Catalogs, Conversion, LedgerError, Motive,
    MovementKind, MovementMetadata, RawAdjustmentRow, ReservationState, StockKey, Taxonomy,
    ValidationPolicy,
};

use crate::batch_processor::{AdjustmentBatchProcessor, CommitRequest};
use crate::ledger::{LedgerSettings, StockLedger};
use crate::reservations::ReservationManager;
use crate::reversal::ReversalEngine;
use crate::store::{InMemoryLedgerStore, LedgerQuery, LedgerStore, LedgerTransaction, MovementFilter, Pagination};

type Ledger = Arc<StockLedger<InMemoryLedgerStore>>;

fn test_user() -> UserId {
    UserId::new()
}

fn test_key() -> StockKey {
    StockKey::new(ProductId::new(), WarehouseId::new())
}

fn setup() -> Ledger {
    setup_with(LedgerSettings::default())
}

fn setup_with(settings: LedgerSettings) -> Ledger {
    Arc::new(StockLedger::new(InMemoryLedgerStore::new(), settings))
}

async fn seed(ledger: &Ledger, key: &StockKey, quantity: i64) {
    ledger
        .apply(key, quantity, MovementKind::Entrada, MovementMetadata::new(test_user()))
        .await
        .unwrap();
}

async fn quantity_of(ledger: &Ledger, key: &StockKey) -> (i64, i64) {
    ledger
        .store()
        .stock(key)
        .await
        .unwrap()
        .map(|row| (row.quantity(), row.reserved()))
        .unwrap_or((0, 0))
}

async fn movement_count(ledger: &Ledger, filter: MovementFilter) -> u64 {
    ledger
        .store()
        .movements(&filter, Pagination::default())
        .await
        .unwrap()
        .total
}

// ---------------------------------------------------------------------------
// StockLedger
// ---------------------------------------------------------------------------

#[tokio::test]
async fn apply_records_exactly_one_movement_with_before_and_after() {
    let ledger = setup();
    let key = test_key();
    seed(&ledger, &key, 10).await;

    let m = ledger
        .apply(&key, 4, MovementKind::SalidaAjuste, MovementMetadata::new(test_user()))
        .await
        .unwrap();

    assert_eq!(m.quantity, -4);
    assert_eq!((m.quantity_before, m.quantity_after), (10, 6));
    assert_eq!(quantity_of(&ledger, &key).await, (6, 0));
    assert_eq!(
        movement_count(
            &ledger,
            MovementFilter {
                product_id: Some(key.product_id),
                ..Default::default()
            }
        )
        .await,
        2
    );
}

#[tokio::test]
async fn conversion_factor_scales_to_base_units() {
    let ledger = setup();
    let key = test_key();

    let meta = MovementMetadata::new(test_user()).with_conversion(Conversion::new(12).unwrap());
    let m = ledger.apply(&key, 3, MovementKind::EntradaCompra, meta).await.unwrap();

    assert_eq!(m.quantity, 3);
    assert_eq!(m.requested_quantity, Some(3));
    assert_eq!(m.conversion_factor, Some(12));
    assert_eq!(quantity_of(&ledger, &key).await, (36, 0));
}

#[tokio::test]
async fn rejected_movement_leaves_no_trace() {
    let ledger = setup();
    let key = test_key();
    seed(&ledger, &key, 5).await;

    let err = ledger
        .apply(&key, 6, MovementKind::Salida, MovementMetadata::new(test_user()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::StockInsufficient {
            requested: 6,
            available: 5,
            ..
        }
    ));

    let err = ledger
        .apply(&key, 0, MovementKind::Entrada, MovementMetadata::new(test_user()))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    assert_eq!(quantity_of(&ledger, &key).await, (5, 0));
    assert_eq!(movement_count(&ledger, MovementFilter::default()).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_consumers_of_the_same_row_are_serialized() {
    let ledger = setup();
    let key = test_key();
    seed(&ledger, &key, 100).await;

    let sell = |ledger: Ledger, key: StockKey| {
        tokio::spawn(async move {
            let meta = MovementMetadata::new(test_user()).with_motive(Motive::Customer {
                name: "Tienda Sol".to_string(),
            });
            ledger.apply(&key, 100, MovementKind::SalidaVenta, meta).await
        })
    };
    let first = sell(ledger.clone(), key.clone());
    let second = sell(ledger.clone(), key.clone());
    let results = [first.await.unwrap(), second.await.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1, "{results:?}");
    assert!(results.iter().any(|r| matches!(
        r,
        Err(LedgerError::StockInsufficient { available: 0, .. })
    )));
    assert_eq!(quantity_of(&ledger, &key).await, (0, 0));
    assert_eq!(
        movement_count(
            &ledger,
            MovementFilter {
                kind: Some(MovementKind::SalidaVenta),
                ..Default::default()
            }
        )
        .await,
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_rows_do_not_block_each_other() {
    let ledger = setup();
    let keys: Vec<StockKey> = (0..8).map(|_| test_key()).collect();

    let tasks: Vec<_> = keys
        .iter()
        .cloned()
        .map(|key| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                for _ in 0..10 {
                    ledger
                        .apply(&key, 1, MovementKind::Entrada, MovementMetadata::new(test_user()))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for t in tasks {
        t.await.unwrap();
    }

    for key in &keys {
        assert_eq!(quantity_of(&ledger, key).await, (10, 0));
    }
}

#[tokio::test]
async fn lock_wait_is_bounded_and_retryable() {
    let ledger = setup_with(LedgerSettings {
        lock_timeout: Duration::from_millis(50),
        ..LedgerSettings::default()
    });
    let key = test_key();

    let mut holder = ledger.store().begin().await.unwrap();
    holder.lock_stock_row(&key, Duration::from_secs(1)).await.unwrap();

    let err = ledger
        .apply(&key, 1, MovementKind::Entrada, MovementMetadata::new(test_user()))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::LockTimeout { .. }));
    assert!(err.is_retryable());

    holder.rollback().await.unwrap();
    ledger
        .apply(&key, 1, MovementKind::Entrada, MovementMetadata::new(test_user()))
        .await
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    /// Property: after any sequence of attempted movements, the committed row
    /// satisfies `0 <= reserved <= quantity`, and replaying the recorded
    /// movements' deltas reproduces it.
    #[test]
    fn committed_rows_always_satisfy_the_invariant(
        ops in prop::collection::vec(
            (prop::sample::select(MovementKind::ALL.to_vec()), 1i64..200i64),
            1..40
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let ledger = setup();
            let key = test_key();
            for (kind, qty) in ops {
                let _ = ledger.apply(&key, qty, kind, MovementMetadata::new(test_user())).await;
            }

            let (quantity, reserved) = quantity_of(&ledger, &key).await;
            prop_assert!(quantity >= 0);
            prop_assert!(reserved >= 0 && reserved <= quantity);

            let page = ledger
                .store()
                .movements(&MovementFilter::default(), Pagination::new(Some(1000), None))
                .await
                .unwrap();
            let replayed: i64 = page.items.iter().map(|m| m.quantity_after - m.quantity_before).sum();
            prop_assert_eq!(replayed, quantity);
            for m in &page.items {
                prop_assert_eq!(
                    m.quantity_after - m.quantity_before,
                    m.kind.effect(m.base_magnitude()).quantity_delta
                );
            }
            Ok(())
        })?;
    }
}

// ---------------------------------------------------------------------------
// ReservationManager
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reserve_then_release_restores_reserved() {
    let ledger = setup();
    let reservations = ReservationManager::new(ledger.clone());
    let key = test_key();
    seed(&ledger, &key, 100).await;

    reservations.reserve(&key, 50, "PED-7", test_user()).await.unwrap();
    assert_eq!(quantity_of(&ledger, &key).await, (100, 50));

    let released = reservations.release("PED-7", test_user()).await.unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].kind, MovementKind::LiberacionReserva);
    assert_eq!(quantity_of(&ledger, &key).await, (100, 0));

    let status = reservations.status("PED-7").await.unwrap();
    assert_eq!(status[0].state, ReservationState::Released { quantity: 50 });
}

#[tokio::test]
async fn reserve_then_consume_reduces_both_sides() {
    let ledger = setup();
    let reservations = ReservationManager::new(ledger.clone());
    let key = test_key();
    seed(&ledger, &key, 100).await;

    reservations.reserve(&key, 50, "PED-8", test_user()).await.unwrap();
    reservations.consume("PED-8", test_user()).await.unwrap();
    assert_eq!(quantity_of(&ledger, &key).await, (50, 0));
}

#[tokio::test]
async fn release_is_idempotent_and_consume_needs_an_open_reservation() {
    let ledger = setup();
    let reservations = ReservationManager::new(ledger.clone());
    let key = test_key();
    seed(&ledger, &key, 10).await;

    reservations.reserve(&key, 4, "PED-9", test_user()).await.unwrap();
    assert_eq!(reservations.release("PED-9", test_user()).await.unwrap().len(), 1);
    assert!(reservations.release("PED-9", test_user()).await.unwrap().is_empty());
    assert!(reservations.release("UNKNOWN", test_user()).await.unwrap().is_empty());

    let err = reservations.consume("PED-9", test_user()).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidReservationState(_)));
    let err = reservations.consume("UNKNOWN", test_user()).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidReservationState(_)));

    assert_eq!(quantity_of(&ledger, &key).await, (10, 0));
}

#[tokio::test]
async fn reserving_twice_for_one_document_is_rejected() {
    let ledger = setup();
    let reservations = ReservationManager::new(ledger.clone());
    let key = test_key();
    seed(&ledger, &key, 10).await;

    reservations.reserve(&key, 4, "PED-10", test_user()).await.unwrap();
    let err = reservations.reserve(&key, 1, "PED-10", test_user()).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidReservationState(_)));

    reservations.release("PED-10", test_user()).await.unwrap();
    let err = reservations.reserve(&key, 1, "PED-10", test_user()).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidReservationState(_)));
}

#[tokio::test]
async fn reserve_is_limited_by_unreserved_stock() {
    let ledger = setup();
    let reservations = ReservationManager::new(ledger.clone());
    let key = test_key();
    seed(&ledger, &key, 100).await;

    reservations.reserve(&key, 70, "PED-11", test_user()).await.unwrap();
    let err = reservations.reserve(&key, 40, "PED-12", test_user()).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::StockInsufficient { available: 30, .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_releases_produce_one_movement() {
    let ledger = setup();
    let reservations = Arc::new(ReservationManager::new(ledger.clone()));
    let key = test_key();
    seed(&ledger, &key, 100).await;
    reservations.reserve(&key, 60, "PED-13", test_user()).await.unwrap();

    let a = {
        let r = reservations.clone();
        tokio::spawn(async move { r.release("PED-13", UserId::new()).await })
    };
    let b = {
        let r = reservations.clone();
        tokio::spawn(async move { r.release("PED-13", UserId::new()).await })
    };
    let released = a.await.unwrap().unwrap().len() + b.await.unwrap().unwrap().len();

    assert_eq!(released, 1);
    assert_eq!(quantity_of(&ledger, &key).await, (100, 0));
}

#[tokio::test]
async fn reserve_and_consume_document_end_to_end() {
    let ledger = setup();
    let reservations = ReservationManager::new(ledger.clone());
    let key = test_key();
    seed(&ledger, &key, 1000).await;

    reservations.reserve(&key, 100, "DOC-1", test_user()).await.unwrap();
    assert_eq!(quantity_of(&ledger, &key).await, (1000, 100));

    reservations.consume("DOC-1", test_user()).await.unwrap();
    assert_eq!(quantity_of(&ledger, &key).await, (900, 0));

    let trail = ledger.store().document_movements("DOC-1").await.unwrap();
    let kinds: Vec<MovementKind> = trail.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MovementKind::Reserva, MovementKind::ConsumoReserva]);
    assert!(trail.iter().all(|m| m.document_number.as_deref() == Some("DOC-1")));
}

// ---------------------------------------------------------------------------
// AdjustmentBatchProcessor / ReversalEngine
// ---------------------------------------------------------------------------

struct Upload {
    catalogs: Catalogs,
    cafe: StockKey,
    te: StockKey,
}

fn upload_fixture() -> Upload {
    let cafe = ProductId::new();
    let te = ProductId::new();
    let central = WarehouseId::new();
    Upload {
        catalogs: Catalogs {
            products: vec![
                CatalogProduct {
                    id: cafe,
                    name: "Café Molido".to_string(),
                    sku: None,
                    barcode: None,
                },
                CatalogProduct {
                    id: te,
                    name: "Té Verde".to_string(),
                    sku: None,
                    barcode: None,
                },
            ],
            warehouses: vec![CatalogWarehouse {
                id: central,
                name: "Almacén Central".to_string(),
            }],
        },
        cafe: StockKey::new(cafe, central),
        te: StockKey::new(te, central),
    }
}

fn raw(producto: &str, cantidad: &str, operacion: &str, motivo: Option<&str>) -> RawAdjustmentRow {
    RawAdjustmentRow {
        producto: producto.to_string(),
        cantidad: cantidad.to_string(),
        tipo_operacion: Some(operacion.to_string()),
        tipo_motivo: motivo.map(str::to_string),
        almacen: "Almacén Central".to_string(),
        ..RawAdjustmentRow::default()
    }
}

fn processor(ledger: &Ledger) -> AdjustmentBatchProcessor<InMemoryLedgerStore> {
    AdjustmentBatchProcessor::new(ledger.clone(), Taxonomy::default(), ValidationPolicy::default())
}

fn request() -> CommitRequest {
    CommitRequest {
        user_id: test_user(),
        file_name: Some("ajustes.xlsx".to_string()),
        note: None,
    }
}

#[tokio::test]
async fn committed_batch_owns_its_movements() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);

    let rows = processor.validate(
        &[
            raw("Café Molido", "100", "ajuste_entrada", Some("sobrante")),
            raw("cafe molido", "abc", "entrada", None),
            raw("Té Verde", "20", "compra", Some("Distribuidora López")),
        ],
        &up.catalogs,
    );
    let batch = processor.commit(&rows, request()).await.unwrap();

    assert_eq!(batch.status, BatchStatus::Processed);
    assert!(batch.revertible);
    assert_eq!((batch.rows_total, batch.rows_valid, batch.rows_errored), (3, 2, 1));
    assert_eq!(batch.rows_processed, 2);
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (100, 0));
    assert_eq!(quantity_of(&ledger, &up.te).await, (20, 0));

    let detail = ledger.store().batch_detail(batch.id).await.unwrap().unwrap();
    assert_eq!(detail.movements.len(), 2);
    assert!(detail.movements.iter().all(|m| m.batch_id == Some(batch.id)));
    assert_eq!(
        detail.movements[1].motive,
        Motive::Supplier {
            name: "Distribuidora López".to_string()
        }
    );
}

#[tokio::test]
async fn failed_row_rolls_back_the_whole_batch() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);
    seed(&ledger, &up.te, 10).await;

    let rows = processor.validate(
        &[
            raw("Café Molido", "10", "entrada", None),
            raw("Té Verde", "50", "salida", None),
        ],
        &up.catalogs,
    );
    let err = processor.commit(&rows, request()).await.unwrap_err();

    match &err {
        LedgerError::BatchCommitFailed { line, source } => {
            assert_eq!(*line, 2);
            assert!(matches!(**source, LedgerError::StockInsufficient { .. }));
        }
        other => panic!("expected BatchCommitFailed, got {other:?}"),
    }
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (0, 0));
    assert_eq!(quantity_of(&ledger, &up.te).await, (10, 0));
    assert_eq!(movement_count(&ledger, MovementFilter::default()).await, 1);

    let drafts = ledger
        .store()
        .batches(Some(BatchStatus::Draft), Pagination::default())
        .await
        .unwrap();
    assert_eq!(drafts.total, 1);
    let draft = &drafts.items[0];
    assert_eq!(draft.rows_errored, 1);
    assert!(draft.errors[0].starts_with("line 2:"));

    let cancelled = processor.cancel(draft.id).await.unwrap();
    assert_eq!(cancelled.status, BatchStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_a_blocked_commit_keeps_one_outcome() {
    let store = InMemoryLedgerStore::new();
    let patient: Ledger = Arc::new(StockLedger::new(store.clone(), LedgerSettings::default()));
    let impatient: Ledger = Arc::new(StockLedger::new(
        store.clone(),
        LedgerSettings {
            lock_timeout: Duration::from_millis(100),
            ..LedgerSettings::default()
        },
    ));
    let up = upload_fixture();
    let committer = Arc::new(processor(&patient));
    let canceller = processor(&impatient);

    let mut holder = store.begin().await.unwrap();
    holder.lock_stock_row(&up.cafe, Duration::from_secs(1)).await.unwrap();

    let rows = committer.validate(&[raw("Café Molido", "10", "entrada", None)], &up.catalogs);
    let commit = {
        let committer = committer.clone();
        tokio::spawn(async move { committer.commit(&rows, request()).await })
    };

    let mut draft = None;
    for _ in 0..100 {
        let page = store.batches(Some(BatchStatus::Draft), Pagination::default()).await.unwrap();
        if let Some(batch) = page.items.into_iter().next() {
            draft = Some(batch.id);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let batch_id = draft.expect("draft header is saved before the commit blocks");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cancelled = canceller.cancel(batch_id).await;
    holder.rollback().await.unwrap();
    let committed = commit.await.unwrap();
    let stored = store.batch(batch_id).await.unwrap().unwrap();

    match cancelled {
        Ok(_) => {
            assert!(matches!(committed, Err(LedgerError::InvalidBatchState(_))), "{committed:?}");
            assert_eq!(stored.status, BatchStatus::Cancelled);
            assert!(!stored.revertible);
            assert_eq!(quantity_of(&patient, &up.cafe).await, (0, 0));
        }
        Err(e) => {
            assert!(matches!(e, LedgerError::LockTimeout { .. }), "{e:?}");
            assert_eq!(committed.unwrap().status, BatchStatus::Processed);
            assert_eq!(stored.status, BatchStatus::Processed);
            assert_eq!(quantity_of(&patient, &up.cafe).await, (10, 0));
            assert!(matches!(
                canceller.cancel(batch_id).await,
                Err(LedgerError::InvalidBatchState(_))
            ));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn batches_touching_rows_in_opposite_orders_both_commit() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = Arc::new(processor(&ledger));

    let forward = processor.validate(
        &[
            raw("Café Molido", "1", "entrada", None),
            raw("Té Verde", "1", "entrada", None),
        ],
        &up.catalogs,
    );
    let backward = processor.validate(
        &[
            raw("Té Verde", "1", "entrada", None),
            raw("Café Molido", "1", "entrada", None),
        ],
        &up.catalogs,
    );

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let processor = processor.clone();
            let rows = if i % 2 == 0 { forward.clone() } else { backward.clone() };
            tokio::spawn(async move { processor.commit(&rows, request()).await })
        })
        .collect();
    for t in tasks {
        assert_eq!(t.await.unwrap().unwrap().status, BatchStatus::Processed);
    }

    assert_eq!(quantity_of(&ledger, &up.cafe).await, (8, 0));
    assert_eq!(quantity_of(&ledger, &up.te).await, (8, 0));
}

#[tokio::test]
async fn uploads_reject_grouped_thousands_and_match_decomposed_accents() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);

    let rows = processor.validate(
        &[
            raw("Cafe\u{301} Molido", "12", "entrada", None),
            raw("Café Molido", "1.000", "entrada", None),
            raw("Té Verde", "1,000", "entrada", None),
            raw("Te\u{301} Verde", "12,0", "entrada", None),
        ],
        &up.catalogs,
    );
    assert!(rows[0].valid, "{:?}", rows[0].errors);
    assert_eq!(rows[0].stock_key(), Some(up.cafe.clone()));
    assert!(!rows[1].valid);
    assert!(!rows[2].valid);
    assert!(rows[3].valid, "{:?}", rows[3].errors);
    assert_eq!(rows[3].quantity, 12);

    let batch = processor.commit(&rows, request()).await.unwrap();
    assert_eq!((batch.rows_valid, batch.rows_errored), (2, 2));
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (12, 0));
    assert_eq!(quantity_of(&ledger, &up.te).await, (12, 0));
}

#[tokio::test]
async fn upload_without_valid_rows_is_not_committed() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);

    let rows = processor.validate(&[raw("cacao", "1", "entrada", None)], &up.catalogs);
    let err = processor.commit(&rows, request()).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
    assert_eq!(
        ledger.store().batches(None, Pagination::default()).await.unwrap().total,
        0
    );
}

#[tokio::test]
async fn preview_projects_stock_without_writing() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);
    seed(&ledger, &up.cafe, 20).await;

    let rows = processor.validate(
        &[
            raw("Café Molido", "15", "salida", None),
            raw("Café Molido", "10", "merma", Some("vencimiento")),
        ],
        &up.catalogs,
    );
    let rows = processor.preview(rows).await.unwrap();

    assert_eq!((rows[0].stock_before, rows[0].stock_after), (Some(20), Some(5)));
    assert!(!rows[1].valid);
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (20, 0));
}

#[tokio::test]
async fn reversal_restores_pre_batch_stock_once() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);
    let reversal = ReversalEngine::new(ledger.clone());
    seed(&ledger, &up.te, 50).await;

    let rows = processor.validate(
        &[
            raw("Café Molido", "100", "ajuste_entrada", Some("sobrante")),
            raw("Té Verde", "30", "ajuste_salida", Some("faltante")),
        ],
        &up.catalogs,
    );
    let batch = processor.commit(&rows, request()).await.unwrap();
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (100, 0));
    assert_eq!(quantity_of(&ledger, &up.te).await, (20, 0));

    let reverted = reversal
        .revert(batch.id, "archivo duplicado", test_user())
        .await
        .unwrap();
    assert_eq!(reverted.status, BatchStatus::Reverted);
    assert!(!reverted.revertible);
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (0, 0));
    assert_eq!(quantity_of(&ledger, &up.te).await, (50, 0));

    let detail = ledger.store().batch_detail(batch.id).await.unwrap().unwrap();
    assert_eq!(detail.movements.len(), 4);
    let compensations: Vec<_> = detail.movements.iter().filter(|m| m.reversal_of.is_some()).collect();
    assert_eq!(compensations.len(), 2);
    assert!(compensations.iter().any(|m| m.kind == MovementKind::SalidaAjuste));
    assert!(compensations.iter().any(|m| m.kind == MovementKind::EntradaAjuste));

    let err = reversal.revert(batch.id, "otra vez", test_user()).await.unwrap_err();
    assert!(matches!(err, LedgerError::BatchNotRevertible { .. }));
}

#[tokio::test]
async fn compensations_link_the_original_and_carry_no_motive() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);
    let reversal = ReversalEngine::new(ledger.clone());

    let rows = processor.validate(
        &[raw("Té Verde", "20", "compra", Some("Distribuidora López"))],
        &up.catalogs,
    );
    let batch = processor.commit(&rows, request()).await.unwrap();
    reversal.revert(batch.id, "proveedor equivocado", test_user()).await.unwrap();

    let detail = ledger.store().batch_detail(batch.id).await.unwrap().unwrap();
    let original = detail.movements.iter().find(|m| m.reversal_of.is_none()).unwrap();
    let compensation = detail.movements.iter().find(|m| m.reversal_of.is_some()).unwrap();
    assert_eq!(original.kind, MovementKind::EntradaCompra);
    assert!(matches!(original.motive, Motive::Supplier { .. }));
    assert_eq!(compensation.kind, MovementKind::SalidaVenta);
    assert_eq!(compensation.reversal_of, Some(original.id));
    assert_eq!(compensation.motive, Motive::None);
    assert_eq!(quantity_of(&ledger, &up.te).await, (0, 0));
}

#[tokio::test]
async fn reversal_blocked_by_later_consumption_changes_nothing() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);
    let reversal = ReversalEngine::new(ledger.clone());

    let rows = processor.validate(&[raw("Café Molido", "100", "entrada", None)], &up.catalogs);
    let batch = processor.commit(&rows, request()).await.unwrap();
    ledger
        .apply(&up.cafe, 80, MovementKind::Salida, MovementMetadata::new(test_user()))
        .await
        .unwrap();

    let err = reversal.revert(batch.id, "error de carga", test_user()).await.unwrap_err();
    match &err {
        LedgerError::ReversalBlocked { batch_id, key, .. } => {
            assert_eq!(*batch_id, batch.id);
            assert_eq!(key, &up.cafe);
        }
        other => panic!("expected ReversalBlocked, got {other:?}"),
    }
    assert!(matches!(err.root_cause(), LedgerError::StockInsufficient { .. }));

    let after = ledger.store().batch(batch.id).await.unwrap().unwrap();
    assert_eq!(after.status, BatchStatus::Processed);
    assert!(after.revertible);
    assert_eq!(quantity_of(&ledger, &up.cafe).await, (20, 0));
}

#[tokio::test]
async fn reversal_needs_a_reason_and_a_known_processed_batch() {
    let ledger = setup();
    let reversal = ReversalEngine::new(ledger.clone());
    let processor = processor(&ledger);

    let err = reversal
        .revert(BatchId::new(), "   ", test_user())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = reversal
        .revert(BatchId::new(), &"x".repeat(501), test_user())
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let missing = BatchId::new();
    let err = reversal.revert(missing, "motivo", test_user()).await.unwrap_err();
    assert_eq!(err, LedgerError::BatchNotFound(missing));

    let err = processor.cancel(missing).await.unwrap_err();
    assert_eq!(err, LedgerError::BatchNotFound(missing));
}

#[tokio::test]
async fn processed_batches_cannot_be_cancelled() {
    let ledger = setup();
    let up = upload_fixture();
    let processor = processor(&ledger);

    let rows = processor.validate(&[raw("Café Molido", "1", "entrada", None)], &up.catalogs);
    let batch = processor.commit(&rows, request()).await.unwrap();
    let err = processor.cancel(batch.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidBatchState(_)));
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn movement_queries_filter_and_paginate_newest_first() {
    let ledger = setup();
    let key = test_key();
    for qty in 1..=5 {
        seed(&ledger, &key, qty).await;
    }
    ledger
        .apply(&key, 2, MovementKind::Merma, MovementMetadata::new(test_user()))
        .await
        .unwrap();

    let page = ledger
        .store()
        .movements(
            &MovementFilter {
                kind: Some(MovementKind::Entrada),
                ..Default::default()
            },
            Pagination::new(Some(2), Some(0)),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    assert!(page.has_more);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].quantity, 5);

    let last = ledger
        .store()
        .movements(&MovementFilter::default(), Pagination::from_page(Some(2), Some(4)))
        .await
        .unwrap();
    assert_eq!(last.items.len(), 2);
    assert!(!last.has_more);
}
