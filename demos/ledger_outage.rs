/// ledger outage - local commits survive a remote ledger outage and are reconciled later
use chrono::{TimeZone, Utc};
use installment_billing_rs::{
    BillingConfig, BillingService, Card, CreatePlanRequest, InMemoryLedgerClient, InMemoryRepository, Money,
    PaymentMethod, PaymentRequest, SafeTimeProvider, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== ledger outage ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
    let config = BillingConfig::default();
    let repo = InMemoryRepository::from_config(&config);
    let card = Card::credit(Uuid::new_v4(), Money::from_major(1_500), time.now());
    repo.insert_card(card.clone())?;
    let service = BillingService::new(repo, InMemoryLedgerClient::new(), config, time);

    service.ledger().set_offline(true);
    println!("ledger offline");

    let created = service.create_plan(
        CreatePlanRequest::new(card.id, "user-7", Money::from_major(600), 6, "order-77").described_as("phone", "shop"),
    )?;
    println!("  plan committed, synced: {}", created.is_synced());
    if let Some(warning) = &created.ledger_warning {
        println!("  warning: {warning}");
    }
    let plan = created.into_inner();

    let paid = service.pay_installment(PaymentRequest::full(plan.installments[0].id, PaymentMethod::BankTransfer, "pay-77-1"))?;
    println!("  payment committed, synced: {}", paid.is_synced());
    println!("  card balance: ${}", service.card(card.id)?.balance.as_decimal());
    println!("  pending syncs: {}", service.pending_ledger_syncs()?.len());

    println!("\nledger back online");
    service.ledger().set_offline(false);
    let report = service.reconcile_ledger()?;
    println!("  attempted {}, synced {}, still pending {}", report.attempted, report.synced, report.still_pending);
    println!("  plan transaction id: {:?}", service.plan(plan.id())?.plan.transaction_id);

    println!("\nreplaying the payment request");
    let replay = service.pay_installment(PaymentRequest::full(plan.installments[0].id, PaymentMethod::BankTransfer, "pay-77-1"))?;
    println!("  replayed: {}, balance unchanged: ${}", replay.replayed, replay.value.card_balance.as_decimal());
    println!("  remote records: {}", service.ledger().calls().len());

    Ok(())
}
