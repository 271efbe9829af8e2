mod common;

use common::{event, test_database_url};
use serde_json::json;
use solana_webhook_indexer::indexers::{
    NftBidIndexer, NftPriceIndexer, TokenBorrowIndexer, TokenPriceIndexer,
};
use solana_webhook_indexer::{Indexer, TableName};
use sqlx::PgPool;
use sqlx::Row;

async fn pool() -> PgPool {
    PgPool::connect(&test_database_url()).await.unwrap()
}

fn fresh_table(prefix: &str) -> TableName {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    TableName::parse(&format!("{prefix}_{}", &suffix[..12])).unwrap()
}

async fn drop_table(db: &PgPool, table: &TableName) {
    sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
        .execute(db)
        .await
        .unwrap();
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_token_price_older_slot_does_not_overwrite() {
    let db = pool().await;
    let table = fresh_table("tp_slots");
    let indexer = TokenPriceIndexer::from_params("idx", &json!({"tokens": ["MINT"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let newer = event(10, "sig-10", json!({"tokenTransfers": [{"mint": "MINT", "tokenAmount": 2.0}]}));
    let older = event(5, "sig-5", json!({"tokenTransfers": [{"mint": "MINT", "tokenAmount": 1.0}]}));
    indexer.process(&db, &table, &newer).await.unwrap();
    indexer.process(&db, &table, &older).await.unwrap();

    let row = sqlx::query(&format!(
        "SELECT price_sol, slot, transaction_id FROM {table} WHERE token_address = 'MINT' AND platform = 'UNKNOWN'"
    ))
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(row.get::<Option<f64>, _>("price_sol"), Some(2.0));
    assert_eq!(row.get::<i64, _>("slot"), 10);
    assert_eq!(row.get::<Option<String>, _>("transaction_id").as_deref(), Some("sig-10"));

    drop_table(&db, &table).await;
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_token_price_redelivery_is_idempotent() {
    let db = pool().await;
    let table = fresh_table("tp_idem");
    let indexer = TokenPriceIndexer::from_params("idx", &json!({"tokens": ["A", "B"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let ev = event(
        7,
        "sig-7",
        json!({"tokenTransfers": [
            {"mint": "A", "tokenAmount": 100, "usdValue": 1.5},
            {"mint": "B", "tokenAmount": 3}
        ]}),
    );
    let first = indexer.process(&db, &table, &ev).await.unwrap();
    let second = indexer.process(&db, &table, &ev).await.unwrap();
    assert_eq!(first.applied_count(), 2);
    assert_eq!(second.applied_count(), 2);

    let rows = sqlx::query(&format!(
        "SELECT token_address, price_usd, slot FROM {table} WHERE slot = 7 ORDER BY token_address"
    ))
    .fetch_all(&db)
    .await
    .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get::<Option<f64>, _>("price_usd"), Some(1.5));

    drop_table(&db, &table).await;
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_nft_sale_without_listing_inserts_sold_row() {
    let db = pool().await;
    let table = fresh_table("nft_prices");
    let indexer = NftPriceIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let sale = event(
        20,
        "sale-1",
        json!({"type": "NFT_SALE", "mint": "M1", "seller": "S1", "buyer": "B1", "amount": 4}),
    );
    indexer.process(&db, &table, &sale).await.unwrap();
    indexer.process(&db, &table, &sale).await.unwrap();

    let rows = sqlx::query(&format!("SELECT status, buyer, price FROM {table} WHERE nft_mint = 'M1'"))
        .fetch_all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("status"), "sold");
    assert_eq!(rows[0].get::<Option<String>, _>("buyer").as_deref(), Some("B1"));

    drop_table(&db, &table).await;
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_nft_listing_then_sale_flips_status() {
    let db = pool().await;
    let table = fresh_table("nft_flip");
    let indexer = NftPriceIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let listing = event(
        30,
        "list-1",
        json!({"type": "NFT_LISTING", "mint": "M2", "seller": "S2", "amount": 2, "source": "TENSOR"}),
    );
    let sale = event(
        31,
        "sale-2",
        json!({"type": "NFT_SALE", "mint": "M2", "seller": "S2", "buyer": "B2", "amount": 2, "source": "TENSOR"}),
    );
    indexer.process(&db, &table, &listing).await.unwrap();
    indexer.process(&db, &table, &sale).await.unwrap();

    let rows = sqlx::query(&format!("SELECT status, slot FROM {table} WHERE nft_mint = 'M2'"))
        .fetch_all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("status"), "sold");
    assert_eq!(rows[0].get::<i64, _>("slot"), 31);

    drop_table(&db, &table).await;
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_nft_bid_cancel_removes_older_bid() {
    let db = pool().await;
    let table = fresh_table("nft_bids");
    let indexer = NftBidIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let bid = event(
        40,
        "bid-1",
        json!({"type": "NFT_BID", "mint": "M3", "bidder": "W1", "amount": 1.25}),
    );
    let cancel = event(
        41,
        "cancel-1",
        json!({"type": "NFT_BID_CANCELLED", "mint": "M3", "bidder": "W1"}),
    );
    indexer.process(&db, &table, &bid).await.unwrap();
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 1);

    indexer.process(&db, &table, &cancel).await.unwrap();
    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(&db)
        .await
        .unwrap();
    assert_eq!(count, 0);

    drop_table(&db, &table).await;
}

fn borrow_event(slot: u64, rate: f64) -> solana_webhook_indexer::WebhookEvent {
    event(
        slot,
        &format!("sig-{slot}"),
        json!({
            "source": "SOLEND",
            "events": [{"type": "BORROW", "mint": "USDC", "marketData": {"borrowRate": rate}}]
        }),
    )
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_token_borrow_keeps_highest_slot_in_either_order() {
    let db = pool().await;
    for (first, second) in [((20, 0.09), (10, 0.01)), ((10, 0.01), (20, 0.09))] {
        let table = fresh_table("tb_slots");
        let indexer = TokenBorrowIndexer::from_params("idx", &json!({"tokens": ["USDC"]})).unwrap();
        indexer.initialize(&db, &table).await.unwrap();

        indexer.process(&db, &table, &borrow_event(first.0, first.1)).await.unwrap();
        indexer.process(&db, &table, &borrow_event(second.0, second.1)).await.unwrap();

        let row = sqlx::query(&format!(
            "SELECT borrow_rate, slot, transaction_id FROM {table} \
             WHERE token_address = 'USDC' AND platform = 'SOLEND'"
        ))
        .fetch_one(&db)
        .await
        .unwrap();
        assert_eq!(row.get::<Option<f64>, _>("borrow_rate"), Some(0.09));
        assert_eq!(row.get::<i64, _>("slot"), 20);
        assert_eq!(row.get::<Option<String>, _>("transaction_id").as_deref(), Some("sig-20"));

        drop_table(&db, &table).await;
    }
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_token_borrow_platform_case_shares_one_row() {
    let db = pool().await;
    let table = fresh_table("tb_case");
    let indexer = TokenBorrowIndexer::from_params(
        "idx",
        &json!({"tokens": ["USDC"], "platforms": ["solend"]}),
    )
    .unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let ev = borrow_event(12, 0.05);
    indexer.process(&db, &table, &ev).await.unwrap();
    indexer.process(&db, &table, &ev).await.unwrap();

    let rows = sqlx::query(&format!("SELECT platform, slot FROM {table}"))
        .fetch_all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("platform"), "SOLEND");
    assert_eq!(rows[0].get::<i64, _>("slot"), 12);

    drop_table(&db, &table).await;
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_nft_bid_keeps_highest_slot_in_either_order() {
    let db = pool().await;
    let bid = |slot: u64, amount: f64| {
        event(
            slot,
            "bid-7",
            json!({"type": "NFT_BID", "mint": "M7", "bidder": "W7", "amount": amount}),
        )
    };
    for (first, second) in [((50, 2.0), (45, 1.0)), ((45, 1.0), (50, 2.0))] {
        let table = fresh_table("nb_slots");
        let indexer = NftBidIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
        indexer.initialize(&db, &table).await.unwrap();

        indexer.process(&db, &table, &bid(first.0, first.1)).await.unwrap();
        indexer.process(&db, &table, &bid(second.0, second.1)).await.unwrap();

        let row = sqlx::query(&format!("SELECT amount, slot FROM {table} WHERE signature = 'bid-7'"))
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(row.get::<f64, _>("amount"), 2.0);
        assert_eq!(row.get::<i64, _>("slot"), 50);

        drop_table(&db, &table).await;
    }
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_nft_listing_keeps_highest_slot_in_either_order() {
    let db = pool().await;
    let listing = |slot: u64, amount: f64| {
        event(
            slot,
            "list-9",
            json!({"type": "NFT_LISTING", "mint": "M9", "seller": "S9", "amount": amount}),
        )
    };
    for (first, second) in [((30, 5.0), (25, 4.0)), ((25, 4.0), (30, 5.0))] {
        let table = fresh_table("np_slots");
        let indexer = NftPriceIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
        indexer.initialize(&db, &table).await.unwrap();

        indexer.process(&db, &table, &listing(first.0, first.1)).await.unwrap();
        indexer.process(&db, &table, &listing(second.0, second.1)).await.unwrap();

        let row = sqlx::query(&format!("SELECT price, slot FROM {table} WHERE signature = 'list-9'"))
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(row.get::<Option<f64>, _>("price"), Some(5.0));
        assert_eq!(row.get::<i64, _>("slot"), 30);

        drop_table(&db, &table).await;
    }
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_redelivered_listing_after_sale_stays_sold() {
    let db = pool().await;
    let table = fresh_table("np_redeliver");
    let indexer = NftPriceIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let listing = event(
        30,
        "list-1",
        json!({"type": "NFT_LISTING", "mint": "M4", "seller": "S4", "amount": 2, "source": "TENSOR"}),
    );
    let sale = event(
        31,
        "sale-1",
        json!({"type": "NFT_SALE", "mint": "M4", "seller": "S4", "buyer": "B4", "amount": 2, "source": "TENSOR"}),
    );
    indexer.process(&db, &table, &listing).await.unwrap();
    indexer.process(&db, &table, &sale).await.unwrap();
    indexer.process(&db, &table, &listing).await.unwrap();
    indexer.process(&db, &table, &sale).await.unwrap();

    let rows = sqlx::query(&format!("SELECT signature, status, slot FROM {table} WHERE nft_mint = 'M4'"))
        .fetch_all(&db)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get::<String, _>("signature"), "sale-1");
    assert_eq!(rows[0].get::<String, _>("status"), "sold");
    assert_eq!(rows[0].get::<i64, _>("slot"), 31);

    drop_table(&db, &table).await;
}

#[tokio::test]
#[ignore = "Requires database connection"]
async fn test_listing_arriving_after_its_sale_is_dropped() {
    let db = pool().await;
    let table = fresh_table("np_late");
    let indexer = NftPriceIndexer::from_params("idx", &json!({"collections": ["COLL"]})).unwrap();
    indexer.initialize(&db, &table).await.unwrap();

    let sale = event(
        41,
        "sale-5",
        json!({"type": "NFT_SALE", "mint": "M5", "seller": "S5", "buyer": "B5", "amount": 3}),
    );
    let late_listing = event(
        40,
        "list-5",
        json!({"type": "NFT_LISTING", "mint": "M5", "seller": "S5", "amount": 3}),
    );
    let relist = event(
        50,
        "list-6",
        json!({"type": "NFT_LISTING", "mint": "M5", "seller": "S5", "amount": 6}),
    );
    indexer.process(&db, &table, &sale).await.unwrap();
    indexer.process(&db, &table, &late_listing).await.unwrap();

    let open: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} WHERE nft_mint = 'M5' AND status = 'listed'"
    ))
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(open, 0);

    indexer.process(&db, &table, &relist).await.unwrap();
    let open: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} WHERE nft_mint = 'M5' AND status = 'listed'"
    ))
    .fetch_one(&db)
    .await
    .unwrap();
    assert_eq!(open, 1);

    drop_table(&db, &table).await;
}
