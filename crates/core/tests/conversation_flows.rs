use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tally_core::flows::StepId;
use tally_core::{
    ConversationEngine, ConversationKey, ConversationStore, CurrencyCode, EngineSettings,
    FlowCatalog, FlowId, InMemoryLedger, Inbound, Ledger, Rate, StaticRateProvider, Turn,
    TurnOutcome, UserDirectory, UserId,
};

type Engine = ConversationEngine<InMemoryLedger, StaticRateProvider>;

fn display_currencies() -> Vec<CurrencyCode> {
    ["RUB", "EUR", "USD"].iter().map(|raw| CurrencyCode::parse(raw).expect("code")).collect()
}

fn engine_with(ledger: Arc<InMemoryLedger>, store: ConversationStore, settings: EngineSettings) -> Engine {
    let catalog = FlowCatalog::standard(&display_currencies()).expect("catalog");
    ConversationEngine::new(
        Arc::new(catalog),
        Arc::new(store),
        ledger,
        Arc::new(StaticRateProvider::standard()),
        settings,
    )
}

fn engine(ledger: Arc<InMemoryLedger>) -> Engine {
    engine_with(ledger, ConversationStore::new(None), EngineSettings::default())
}

async fn say(engine: &Engine, user: &str, text: &str) -> Turn {
    engine.handle(&Inbound::text(ConversationKey::new(user), text)).await
}

async fn press(engine: &Engine, user: &str, value: &str) -> Turn {
    engine.handle(&Inbound::choice(ConversationKey::new(user), value)).await
}

async fn registered(ledger: &InMemoryLedger, user: &str) {
    ledger.register_user(&UserId::new(user), user).await.expect("registered");
}

async fn with_currency(ledger: &InMemoryLedger, code: &str, rate: &str) {
    ledger
        .upsert_currency(
            &CurrencyCode::parse(code).expect("code"),
            Rate::new(Decimal::from_str(rate).expect("decimal")).expect("rate"),
        )
        .await
        .expect("currency saved");
}

#[tokio::test]
async fn conversion_completes_with_rounded_result() {
    let ledger = Arc::new(InMemoryLedger::new());
    with_currency(&ledger, "USD", "90").await;
    let engine = engine(Arc::clone(&ledger));

    let started = say(&engine, "alice", "/convert").await;
    assert_eq!(started.outcome, TurnOutcome::Started);
    assert_eq!(started.transcript(), "Enter the currency code:");

    let advanced = say(&engine, "alice", " usd ").await;
    assert_eq!(advanced.outcome, TurnOutcome::Advanced);

    let done = say(&engine, "alice", "100,5").await;
    assert_eq!(done.outcome, TurnOutcome::Completed);
    assert_eq!(done.transcript(), "100.50 USD = 9045.00 RUB");
    assert!(engine.store().get(&ConversationKey::new("alice")).await.is_none());
}

#[tokio::test]
async fn conversion_of_unknown_currency_fails_at_code_step() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    say(&engine, "alice", "/convert").await;
    let failed = say(&engine, "alice", "GBP").await;

    assert_eq!(failed.outcome, TurnOutcome::Failed);
    assert_eq!(failed.transcript(), "Currency GBP was not found.");
    assert!(engine.store().get(&ConversationKey::new("alice")).await.is_none());
}

#[tokio::test]
async fn invalid_input_reprompts_without_changing_state() {
    let ledger = Arc::new(InMemoryLedger::new());
    with_currency(&ledger, "EUR", "100").await;
    let engine = engine(ledger);
    let key = ConversationKey::new("alice");

    say(&engine, "alice", "/convert").await;
    say(&engine, "alice", "EUR").await;
    let before = engine.store().get(&key).await.expect("active");

    let reprompt = say(&engine, "alice", "ten").await;
    assert_eq!(reprompt.outcome, TurnOutcome::Reprompted);
    assert_eq!(
        reprompt.transcript(),
        "Invalid amount. Enter a positive number, for example 100 or 100,50."
    );

    let after = engine.store().get(&key).await.expect("still active");
    assert_eq!(after.step, before.step);
    assert_eq!(after.fields, before.fields);

    let negative = say(&engine, "alice", "-4").await;
    assert_eq!(negative.outcome, TurnOutcome::Reprompted);
}

#[tokio::test]
async fn oversized_amount_reprompts_at_the_amount_step() {
    let ledger = Arc::new(InMemoryLedger::new());
    with_currency(&ledger, "USD", "90").await;
    let engine = engine(ledger);

    say(&engine, "alice", "/convert").await;
    say(&engine, "alice", "USD").await;
    let turn = say(&engine, "alice", "10000000000000000000000000000").await;

    assert_eq!(turn.outcome, TurnOutcome::Reprompted);
    let state = engine.store().get(&ConversationKey::new("alice")).await.expect("still active");
    assert_eq!(state.step, StepId("amount"));

    let done = say(&engine, "alice", "2").await;
    assert_eq!(done.outcome, TurnOutcome::Completed);
    assert_eq!(done.transcript(), "2.00 USD = 180.00 RUB");
}

#[tokio::test]
async fn one_shot_commands_leave_no_slot_behind() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    for user in ["alice", "bob", "carol"] {
        say(&engine, user, "/help").await;
        say(&engine, user, "/start").await;
    }

    assert_eq!(engine.store().tracked_count(), 0);
}

#[tokio::test]
async fn commands_other_than_cancel_reprompt_inside_a_flow() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    say(&engine, "alice", "/convert").await;
    let turn = say(&engine, "alice", "/help").await;

    assert_eq!(turn.outcome, TurnOutcome::Reprompted);
    let state = engine.store().get(&ConversationKey::new("alice")).await.expect("active");
    assert_eq!(state.flow, FlowId::ConvertAmount);
    assert_eq!(state.step, StepId("code"));
}

#[tokio::test]
async fn cancel_discards_the_conversation() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    say(&engine, "alice", "/convert").await;
    let cancelled = say(&engine, "alice", "/cancel").await;
    assert_eq!(cancelled.outcome, TurnOutcome::Cancelled);
    assert!(engine.store().get(&ConversationKey::new("alice")).await.is_none());

    let idle = say(&engine, "alice", "/cancel").await;
    assert_eq!(idle.outcome, TurnOutcome::Replied);
    assert_eq!(idle.transcript(), "There is nothing to cancel.");
}

#[tokio::test]
async fn free_text_registers_an_unregistered_user_once() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine(Arc::clone(&ledger));

    let first = say(&engine, "alice", "Alice Liddell").await;
    assert_eq!(first.outcome, TurnOutcome::Completed);
    assert_eq!(first.transcript(), "Registration complete. Welcome, Alice Liddell!");
    assert!(ledger.is_registered(&UserId::new("alice")).await.expect("lookup"));

    let second = say(&engine, "alice", "Someone Else").await;
    assert_eq!(second.outcome, TurnOutcome::Rejected);
    assert_eq!(second.transcript(), "You are already registered. Send /help to see what I can do.");

    let via_command = say(&engine, "alice", "/reg").await;
    assert_eq!(via_command.outcome, TurnOutcome::Rejected);
}

#[tokio::test]
async fn registration_command_prompts_for_a_username() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    let started = say(&engine, "bob", "/reg").await;
    assert_eq!(started.outcome, TurnOutcome::Started);
    assert_eq!(started.transcript(), "Enter your username:");

    let too_long = say(&engine, "bob", &"x".repeat(65)).await;
    assert_eq!(too_long.outcome, TurnOutcome::Reprompted);

    let done = say(&engine, "bob", "Bob").await;
    assert_eq!(done.outcome, TurnOutcome::Completed);
}

#[tokio::test]
async fn operation_lifecycle_records_lists_and_deletes() {
    let ledger = Arc::new(InMemoryLedger::new());
    registered(&ledger, "alice").await;
    let engine = engine(Arc::clone(&ledger));

    let started = say(&engine, "alice", "/add_operation").await;
    assert_eq!(started.outcome, TurnOutcome::Started);
    assert_eq!(started.notifications[0].quick_replies.len(), 2);

    assert_eq!(press(&engine, "alice", "expense").await.outcome, TurnOutcome::Advanced);
    assert_eq!(say(&engine, "alice", "250").await.outcome, TurnOutcome::Advanced);
    let saved = say(&engine, "alice", "2024-03-15").await;
    assert_eq!(saved.outcome, TurnOutcome::Completed);
    assert_eq!(saved.transcript(), "Operation 1 saved: EXPENSE 250.00 RUB on 2024-03-15.");

    say(&engine, "alice", "/operations").await;
    let listed = press(&engine, "alice", "EUR").await;
    assert_eq!(listed.outcome, TurnOutcome::Completed);
    assert_eq!(listed.transcript(), "Your operations in EUR:\n1. EXPENSE 2.50 EUR (2024-03-15)");

    let intro = say(&engine, "alice", "/delete_operation").await;
    assert_eq!(intro.outcome, TurnOutcome::Started);
    assert!(intro.transcript().starts_with("Your operations:\n1. EXPENSE 250.00 RUB (2024-03-15)"));
    assert!(intro.transcript().ends_with("Enter the ID of the operation to delete:"));

    let deleted = say(&engine, "alice", "1").await;
    assert_eq!(deleted.outcome, TurnOutcome::Completed);
    assert_eq!(deleted.transcript(), "Operation 1 deleted.");
    assert!(ledger.list_operations(&UserId::new("alice")).await.expect("list").is_empty());
}

#[tokio::test]
async fn deleting_another_users_operation_is_refused() {
    let ledger = Arc::new(InMemoryLedger::new());
    registered(&ledger, "alice").await;
    registered(&ledger, "mallory").await;
    let engine = engine(Arc::clone(&ledger));

    for text in ["/add_operation", "income", "1000", "2024-01-10"] {
        say(&engine, "alice", text).await;
    }
    for text in ["/add_operation", "income", "5", "2024-01-11"] {
        say(&engine, "mallory", text).await;
    }

    say(&engine, "mallory", "/delete_operation").await;
    let refused = say(&engine, "mallory", "1").await;

    assert_eq!(refused.outcome, TurnOutcome::Failed);
    assert_eq!(refused.transcript(), "Operation 1 was not found among your operations.");
    assert_eq!(ledger.list_operations(&UserId::new("alice")).await.expect("list").len(), 1);
}

#[tokio::test]
async fn delete_operation_without_operations_does_not_start() {
    let ledger = Arc::new(InMemoryLedger::new());
    registered(&ledger, "alice").await;
    let engine = engine(ledger);

    let turn = say(&engine, "alice", "/delete_operation").await;
    assert_eq!(turn.outcome, TurnOutcome::Rejected);
    assert_eq!(turn.transcript(), "You have no operations to delete.");
    assert!(engine.store().get(&ConversationKey::new("alice")).await.is_none());
}

#[tokio::test]
async fn unregistered_users_cannot_record_operations() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    let turn = say(&engine, "alice", "/add_operation").await;
    assert_eq!(turn.outcome, TurnOutcome::Rejected);
    assert_eq!(turn.transcript(), "Please register first with /reg.");
}

#[tokio::test]
async fn currency_management_is_admin_only() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.grant_admin(&UserId::new("root")).await.expect("granted");
    let engine = engine(Arc::clone(&ledger));

    let denied = say(&engine, "alice", "/add_currency").await;
    assert_eq!(denied.outcome, TurnOutcome::Rejected);
    assert_eq!(denied.transcript(), "You do not have access to this command.");
    assert_eq!(say(&engine, "alice", "/manage_currency").await.outcome, TurnOutcome::Rejected);

    let menu = say(&engine, "root", "/manage_currency").await;
    assert_eq!(menu.outcome, TurnOutcome::Replied);
    assert_eq!(menu.notifications[0].quick_replies.len(), 3);

    assert_eq!(press(&engine, "root", "Add currency").await.outcome, TurnOutcome::Started);
    assert_eq!(say(&engine, "root", "usd").await.outcome, TurnOutcome::Advanced);
    let added = say(&engine, "root", "75,43").await;
    assert_eq!(added.outcome, TurnOutcome::Completed);
    assert_eq!(added.transcript(), "Currency USD saved with rate 75.43 RUB.");

    let code = CurrencyCode::parse("USD").expect("code");
    assert_eq!(
        ledger.get_currency(&code).await.map(Rate::value),
        Ok(Decimal::from_str("75.43").expect("decimal"))
    );

    say(&engine, "root", "/add_currency").await;
    let duplicate = say(&engine, "root", "USD").await;
    assert_eq!(duplicate.outcome, TurnOutcome::Failed);
    assert_eq!(duplicate.transcript(), "Currency USD already exists.");

    say(&engine, "root", "Change currency rate").await;
    say(&engine, "root", "USD").await;
    let changed = say(&engine, "root", "80").await;
    assert_eq!(changed.transcript(), "Rate for USD changed to 80 RUB.");

    say(&engine, "root", "/delete_currency").await;
    let deleted = say(&engine, "root", "usd").await;
    assert_eq!(deleted.transcript(), "Currency USD deleted.");
    assert!(ledger.list_currencies().await.expect("list").is_empty());
}

#[tokio::test]
async fn updating_a_missing_currency_fails_before_asking_for_rate() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.grant_admin(&UserId::new("root")).await.expect("granted");
    let engine = engine(ledger);

    say(&engine, "root", "/update_currency").await;
    let turn = say(&engine, "root", "JPY").await;

    assert_eq!(turn.outcome, TurnOutcome::Failed);
    assert_eq!(turn.transcript(), "Currency JPY was not found.");
}

#[tokio::test]
async fn reprompt_budget_abandons_the_flow() {
    let engine = engine_with(
        Arc::new(InMemoryLedger::new()),
        ConversationStore::new(None),
        EngineSettings { max_reprompts: Some(2) },
    );

    say(&engine, "alice", "/convert").await;
    assert_eq!(say(&engine, "alice", "$$").await.outcome, TurnOutcome::Reprompted);
    assert_eq!(say(&engine, "alice", "$$").await.outcome, TurnOutcome::Reprompted);
    let abandoned = say(&engine, "alice", "$$").await;

    assert_eq!(abandoned.outcome, TurnOutcome::Abandoned);
    assert!(engine.store().get(&ConversationKey::new("alice")).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn idle_conversation_expires_with_a_notice() {
    let ledger = Arc::new(InMemoryLedger::new());
    registered(&ledger, "alice").await;
    let engine = engine_with(
        ledger,
        ConversationStore::new(Some(Duration::from_secs(300))),
        EngineSettings::default(),
    );

    say(&engine, "alice", "/add_operation").await;
    tokio::time::advance(Duration::from_secs(301)).await;

    let turn = say(&engine, "alice", "/help").await;
    assert_eq!(turn.outcome, TurnOutcome::Replied);
    assert_eq!(
        turn.notifications[0].text,
        "Your previous dialogue was closed after a period of inactivity. Please start again."
    );
    assert!(turn.notifications[1].text.starts_with("Available commands:"));

    let next = say(&engine, "alice", "/help").await;
    assert_eq!(next.notifications.len(), 1);
}

#[tokio::test]
async fn storage_outage_fails_the_turn_without_leaking_detail() {
    let ledger = Arc::new(InMemoryLedger::new());
    registered(&ledger, "alice").await;
    let engine = engine(Arc::clone(&ledger));

    for text in ["/add_operation", "income", "100"] {
        say(&engine, "alice", text).await;
    }
    ledger.set_outage(true);
    let failed = say(&engine, "alice", "2024-05-01").await;

    assert_eq!(failed.outcome, TurnOutcome::Failed);
    assert_eq!(
        failed.transcript(),
        "Something went wrong while saving your data. Please try again later."
    );
    assert!(engine.store().get(&ConversationKey::new("alice")).await.is_none());
}

#[tokio::test]
async fn unknown_rate_currency_in_listing_names_the_code() {
    let ledger = Arc::new(InMemoryLedger::new());
    registered(&ledger, "alice").await;
    let catalog = FlowCatalog::standard(&[CurrencyCode::parse("CNY").expect("code")]).expect("catalog");
    let engine = ConversationEngine::new(
        Arc::new(catalog),
        Arc::new(ConversationStore::new(None)),
        ledger,
        Arc::new(StaticRateProvider::standard()),
        EngineSettings::default(),
    );

    say(&engine, "alice", "/operations").await;
    let failed = say(&engine, "alice", "CNY").await;

    assert_eq!(failed.outcome, TurnOutcome::Failed);
    assert_eq!(failed.transcript(), "Currency CNY is not supported by the rate service.");
}

#[tokio::test]
async fn unknown_commands_and_blank_messages() {
    let engine = engine(Arc::new(InMemoryLedger::new()));

    let unknown = say(&engine, "alice", "/teleport").await;
    assert_eq!(unknown.outcome, TurnOutcome::Replied);
    assert_eq!(unknown.transcript(), "Unknown command. Send /help to see what I can do.");

    assert_eq!(say(&engine, "alice", "   ").await.outcome, TurnOutcome::Ignored);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_users_progress_concurrently() {
    let ledger = Arc::new(InMemoryLedger::new());
    with_currency(&ledger, "EUR", "100").await;
    let engine = Arc::new(engine(Arc::clone(&ledger)));

    let mut handles = Vec::new();
    for index in 0..32 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let user = format!("user-{index}");
            let mut last = None;
            for text in ["/convert", "eur", "2"] {
                last = Some(engine.handle(&Inbound::text(ConversationKey::new(&user), text)).await);
            }
            last.expect("three turns")
        }));
    }

    for handle in handles {
        let turn = handle.await.expect("join");
        assert_eq!(turn.outcome, TurnOutcome::Completed);
        assert_eq!(turn.transcript(), "2.00 EUR = 200.00 RUB");
    }
    assert_eq!(engine.store().active_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_user_messages_apply_in_arrival_order() {
    let ledger = Arc::new(InMemoryLedger::new());
    with_currency(&ledger, "USD", "90").await;
    let engine = Arc::new(engine(ledger));
    let key = ConversationKey::new("alice");

    let guard = engine.store().lock(&key).await;
    let first = {
        let engine = Arc::clone(&engine);
        let key = key.clone();
        tokio::spawn(async move { engine.handle(&Inbound::text(key, "/convert")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!first.is_finished());
    drop(guard);

    assert_eq!(first.await.expect("join").outcome, TurnOutcome::Started);
    assert_eq!(engine.handle(&Inbound::text(key.clone(), "USD")).await.outcome, TurnOutcome::Advanced);
    assert_eq!(engine.handle(&Inbound::text(key, "1")).await.transcript(), "1.00 USD = 90.00 RUB");
}

#[tokio::test]
async fn help_lists_admin_commands_for_admins_only() {
    let ledger = Arc::new(InMemoryLedger::new());
    ledger.grant_admin(&UserId::new("root")).await.expect("granted");
    let engine = engine(ledger);

    assert!(say(&engine, "root", "/help").await.transcript().contains("/manage_currency"));
    assert!(!say(&engine, "alice", "/help").await.transcript().contains("/manage_currency"));
    assert!(say(&engine, "alice", "/start").await.transcript().starts_with("Hello!"));
}

#[tokio::test]
async fn currencies_command_lists_saved_rates() {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = engine(Arc::clone(&ledger));

    assert_eq!(say(&engine, "alice", "/currencies").await.transcript(), "No currencies have been saved yet.");

    with_currency(&ledger, "USD", "90.50").await;
    with_currency(&ledger, "EUR", "100").await;
    assert_eq!(
        say(&engine, "alice", "/currencies").await.transcript(),
        "Saved currencies (rate to RUB):\nEUR: 100\nUSD: 90.5"
    );
}
