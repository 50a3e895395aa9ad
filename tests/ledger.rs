// tests/ledger.rs
//
// Money and trade paths against a real Postgres. `#[sqlx::test]` creates a
// throwaway database per test from DATABASE_URL and runs `migrations/`.

use futures::future::join_all;
use sqlx::PgPool;
use uuid::Uuid;

use apexpips_backend::{
    db::models::{OrderType, TradeSide},
    db::queries::{self, NewDeposit, NewWithdrawal},
    services::admin::{self, AdminAction},
    services::ledger::{self, BalanceEdit, Claim},
    services::market_data::PriceBoard,
    services::trading_engine::{self, OpenTradeRequest},
    utils::errors::AppError,
};

async fn new_user(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    queries::ensure_account(pool, id, Some("t@apexpips.test"), 10_000.0)
        .await
        .unwrap();
    id
}

async fn deposit(pool: &PgPool, user_id: Uuid, amount: f64) -> Uuid {
    queries::insert_deposit(
        pool,
        &NewDeposit {
            user_id,
            amount,
            method: "USDT".into(),
            wallet_address: None,
            tx_hash: None,
            screenshot_url: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn withdrawal(pool: &PgPool, user_id: Uuid, amount: f64) -> Uuid {
    queries::insert_withdrawal(
        pool,
        &NewWithdrawal {
            user_id,
            amount,
            method: "USDT".into(),
            wallet_address: Some("TXwallet".into()),
            bank_details: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn funded_user(pool: &PgPool, amount: f64) -> Uuid {
    let user = new_user(pool).await;
    let id = deposit(pool, user, amount).await;
    ledger::approve_deposit(pool, id, Claim::default()).await.unwrap();
    user
}

async fn balance_of(pool: &PgPool, user_id: Uuid) -> f64 {
    queries::get_balance(pool, user_id).await.unwrap().unwrap().balance
}

async fn status_of(pool: &PgPool, table: &str, id: Uuid) -> String {
    sqlx::query_scalar(&format!("SELECT status FROM {table} WHERE id = $1"))
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn btc_order(quantity: f64, leverage: i32, is_demo: bool) -> OpenTradeRequest {
    OpenTradeRequest {
        symbol: "BTC".into(),
        side: TradeSide::Buy,
        quantity,
        leverage,
        order_type: Some(OrderType::Market),
        price: None,
        stop_loss: None,
        take_profit: None,
        is_demo,
    }
}

// ───────────────────────────────────────── deposits

#[sqlx::test(migrations = "./migrations")]
async fn deposit_is_approved_once(pool: PgPool) {
    let user = new_user(&pool).await;
    let id = deposit(&pool, user, 250.0).await;

    let b = ledger::approve_deposit(&pool, id, Claim { user_id: Some(user), amount: Some(250.0) })
        .await
        .unwrap();
    assert_eq!(b.balance, 250.0);
    assert_eq!(b.total_deposited, 250.0);
    assert_eq!(status_of(&pool, "deposits", id).await, "approved");

    let again = ledger::approve_deposit(&pool, id, Claim::default()).await;
    assert!(matches!(again, Err(AppError::Conflict(ref m)) if m == "deposit already approved"));
    let rejected = ledger::reject_deposit(&pool, id, Some("late")).await;
    assert!(matches!(rejected, Err(AppError::Conflict(_))));
    assert_eq!(balance_of(&pool, user).await, 250.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn mismatched_claim_changes_nothing(pool: PgPool) {
    let user = new_user(&pool).await;
    let id = deposit(&pool, user, 40.0).await;

    let r = ledger::approve_deposit(&pool, id, Claim { user_id: None, amount: Some(400.0) }).await;
    assert!(matches!(r, Err(AppError::Validation(_))));
    let r = ledger::approve_deposit(&pool, id, Claim { user_id: Some(Uuid::new_v4()), amount: None }).await;
    assert!(matches!(r, Err(AppError::Validation(_))));
    assert_eq!(status_of(&pool, "deposits", id).await, "pending");
    assert_eq!(balance_of(&pool, user).await, 0.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_deposit_approvals_all_land(pool: PgPool) {
    let user = new_user(&pool).await;
    let mut ids = Vec::new();
    for _ in 0..10 {
        ids.push(deposit(&pool, user, 10.0).await);
    }

    // each request approved twice at once: exactly one of each pair wins
    let results = join_all(
        ids.iter()
            .chain(ids.iter())
            .map(|id| ledger::approve_deposit(&pool, *id, Claim::default())),
    )
    .await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 10);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::Conflict(_))));

    let b = queries::get_balance(&pool, user).await.unwrap().unwrap();
    assert_eq!(b.balance, 100.0);
    assert_eq!(b.total_deposited, 100.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn rejected_deposit_cannot_be_approved(pool: PgPool) {
    let user = new_user(&pool).await;
    let id = deposit(&pool, user, 75.0).await;

    ledger::reject_deposit(&pool, id, Some("blurry screenshot")).await.unwrap();
    let note: Option<String> = sqlx::query_scalar("SELECT admin_note FROM deposits WHERE id = $1")
        .bind(id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(note.as_deref(), Some("blurry screenshot"));

    let r = ledger::approve_deposit(&pool, id, Claim::default()).await;
    assert!(matches!(r, Err(AppError::Conflict(ref m)) if m == "deposit already rejected"));
    assert!(matches!(
        ledger::reject_deposit(&pool, Uuid::new_v4(), None).await,
        Err(AppError::NotFound("deposit"))
    ));
    assert_eq!(balance_of(&pool, user).await, 0.0);
}

// ───────────────────────────────────────── withdrawals

#[sqlx::test(migrations = "./migrations")]
async fn overdrawing_withdrawal_leaves_everything_unchanged(pool: PgPool) {
    let user = funded_user(&pool, 100.0).await;
    let id = withdrawal(&pool, user, 500.0).await;

    let r = ledger::approve_withdrawal(&pool, id, Claim::default()).await;
    assert!(matches!(r, Err(AppError::InsufficientFunds)));
    assert_eq!(status_of(&pool, "withdrawals", id).await, "pending");
    let b = queries::get_balance(&pool, user).await.unwrap().unwrap();
    assert_eq!(b.balance, 100.0);
    assert_eq!(b.total_withdrawn, 0.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn racing_withdrawals_cannot_overdraw(pool: PgPool) {
    let user = funded_user(&pool, 100.0).await;
    let mut ids = Vec::new();
    for _ in 0..5 {
        ids.push(withdrawal(&pool, user, 30.0).await);
    }

    let results = join_all(
        ids.iter()
            .map(|id| ledger::approve_withdrawal(&pool, *id, Claim::default())),
    )
    .await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 3);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::InsufficientFunds)));

    let b = queries::get_balance(&pool, user).await.unwrap().unwrap();
    assert_eq!(b.balance, 10.0);
    assert_eq!(b.total_withdrawn, 90.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn settlements_compose(pool: PgPool) {
    let user = funded_user(&pool, 300.0).await;
    let d = deposit(&pool, user, 50.0).await;
    ledger::approve_deposit(&pool, d, Claim::default()).await.unwrap();
    let w = withdrawal(&pool, user, 120.0).await;
    ledger::approve_withdrawal(&pool, w, Claim { user_id: Some(user), amount: Some(120.0) })
        .await
        .unwrap();
    let w2 = withdrawal(&pool, user, 10.0).await;
    ledger::reject_withdrawal(&pool, w2, None).await.unwrap();

    let b = queries::get_balance(&pool, user).await.unwrap().unwrap();
    assert_eq!(b.balance, 230.0);
    assert_eq!(b.total_deposited, 350.0);
    assert_eq!(b.total_withdrawn, 120.0);
}

// ───────────────────────────────────────── admin balance edit

#[sqlx::test(migrations = "./migrations")]
async fn balance_edit_writes_audit_row(pool: PgPool) {
    let user = funded_user(&pool, 80.0).await;
    let edit = BalanceEdit {
        balance: 500.0,
        today_pl: -12.5,
        signal_strength: 8,
        reason: Some("bonus".into()),
    };

    let (b, adj) = ledger::admin_set_balance(&pool, user, &edit).await.unwrap();
    assert_eq!(b.balance, 500.0);
    assert_eq!(b.today_profit_loss, -12.5);
    assert_eq!(b.signal_strength, 8);
    assert_eq!(adj.user_id, user);
    assert_eq!(adj.amount, 500.0);
    assert_eq!(adj.previous_balance, 80.0);
    assert_eq!(adj.adjustment_type, "manual_adjustment");
    assert_eq!(adj.reason.as_deref(), Some("bonus"));

    let rows: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM admin_balance_adjustments WHERE user_id = $1",
    )
    .bind(user)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(rows, 1);

    let bad = BalanceEdit { balance: -1.0, ..edit };
    assert!(matches!(
        ledger::admin_set_balance(&pool, user, &bad).await,
        Err(AppError::Validation(_))
    ));
    assert_eq!(balance_of(&pool, user).await, 500.0);
}

// ───────────────────────────────────────── trades

#[sqlx::test(migrations = "./migrations")]
async fn concurrent_opens_respect_free_margin(pool: PgPool) {
    let user = funded_user(&pool, 100.0).await;
    let board = PriceBoard::fallback();
    // 0.007 BTC at 86077 with 10x leverage holds about 60 of margin
    let order = btc_order(0.007, 10, false);

    let results = join_all(
        (0..6).map(|_| trading_engine::open_trade(&pool, &board, user, &order)),
    )
    .await;
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, AppError::InsufficientMargin)));

    let open = queries::list_open_trades(&pool, user, false).await.unwrap();
    assert_eq!(open.len(), 1);
    assert!(trading_engine::margin_used(&open) <= 100.0);
}

#[sqlx::test(migrations = "./migrations")]
async fn close_records_exit_and_pnl_once(pool: PgPool) {
    let user = new_user(&pool).await;
    let opened = trading_engine::open_trade(&pool, &PriceBoard::fallback(), user, &btc_order(0.125, 2, true))
        .await
        .unwrap();
    assert!(opened.is_demo);
    assert_eq!(opened.entry_price, 86077.0);

    let mut later = PriceBoard::fallback();
    for a in later.crypto.iter_mut().chain(later.extended.iter_mut()) {
        if a.symbol == "BTC" {
            a.price = 86177.0;
        }
    }

    let closed = trading_engine::close_trade(&pool, &later, user, opened.id, None)
        .await
        .unwrap();
    assert_eq!(closed.status, "closed");
    assert_eq!(closed.exit_price, Some(86177.0));
    assert_eq!(closed.profit_loss, 25.0);
    assert!(closed.closed_at.is_some());

    let again = trading_engine::close_trade(&pool, &later, user, opened.id, None).await;
    assert!(matches!(again, Err(AppError::Conflict(_))));
    // someone else's trade is invisible
    let other = trading_engine::close_trade(&pool, &later, Uuid::new_v4(), opened.id, None).await;
    assert!(matches!(other, Err(AppError::NotFound("trade"))));
}

#[sqlx::test(migrations = "./migrations")]
async fn disabled_account_cannot_open_trades(pool: PgPool) {
    let user = funded_user(&pool, 1_000.0).await;
    queries::set_active(&pool, user, false).await.unwrap();
    let r = trading_engine::open_trade(&pool, &PriceBoard::fallback(), user, &btc_order(0.001, 1, false)).await;
    assert!(matches!(r, Err(AppError::Forbidden(_))));
}

// ───────────────────────────────────────── admin delete

#[sqlx::test(migrations = "./migrations")]
async fn delete_user_removes_every_row(pool: PgPool) {
    let user = funded_user(&pool, 100.0).await;
    withdrawal(&pool, user, 10.0).await;
    trading_engine::open_trade(&pool, &PriceBoard::fallback(), user, &btc_order(0.001, 1, true))
        .await
        .unwrap();
    admin::execute(
        &pool,
        AdminAction::SendAdminMessage { user_id: user, message: "welcome".into() },
    )
    .await
    .unwrap();

    admin::execute(&pool, AdminAction::DeleteUser { user_id: user }).await.unwrap();

    for table in ["deposits", "withdrawals", "trades", "chat_messages", "balances", "user_roles"] {
        let n: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM {table} WHERE user_id = $1"))
            .bind(user)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 0, "{table}");
    }
    assert!(queries::get_profile(&pool, user).await.unwrap().is_none());

    let again = admin::execute(&pool, AdminAction::DeleteUser { user_id: user }).await;
    assert!(matches!(again, Err(AppError::NotFound("user"))));
}
