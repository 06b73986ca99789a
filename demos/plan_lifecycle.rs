/// plan lifecycle - purchase, payments, suspension, overdue sweep and cancellation on one card
use chrono::{NaiveDate, TimeZone, Utc};
use installment_billing_rs::{
    BillingConfig, BillingService, Card, CreatePlanRequest, InMemoryLedgerClient, InMemoryRepository, Money,
    PaymentMethod, PaymentRequest, Rate, SafeTimeProvider, TimeSource, Uuid,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== installment plan lifecycle ===\n");

    let time = SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()));
    let config = BillingConfig::default();
    let repo = InMemoryRepository::from_config(&config);
    let card = Card::credit(Uuid::new_v4(), Money::from_major(2_000), time.now());
    repo.insert_card(card.clone())?;
    let service = BillingService::new(repo, InMemoryLedgerClient::new(), config, time);

    // 1. preview
    println!("1. preview");
    println!("----------");
    let preview = service.preview_plan(Money::from_major(1_000), 3, None, Rate::from_percentage(6))?;
    for line in &preview.installments {
        println!("  #{} due {}: ${}", line.number, line.due_date, line.amount.as_decimal());
    }
    println!("  rate: {}%, total: ${}", preview.interest_rate.as_percentage(), preview.total_amount.as_decimal());

    // 2. purchase
    println!("\n2. purchase");
    println!("-----------");
    let request = CreatePlanRequest::new(card.id, "user-42", Money::from_major(1_000), 3, "order-1001")
        .with_interest_rate(Rate::from_percentage(6))
        .described_as("laptop", "computer store");
    let plan = service.create_plan(request)?.into_inner();
    println!("  plan {} is {:?}", plan.id(), plan.plan.status);
    println!("  card balance: ${}", service.card(card.id)?.balance.as_decimal());
    println!("  available: ${}", service.card(card.id)?.available_credit().as_decimal());

    // 3. payments
    println!("\n3. payments");
    println!("-----------");
    let first = plan.installments[0].id;
    let receipt = service
        .pay_installment(PaymentRequest::partial(first, Money::from_major(100), PaymentMethod::DebitCard, "pay-1"))?
        .into_inner();
    println!("  partial: applied ${}, left ${}", receipt.applied.as_decimal(), receipt.installment.remaining_amount.as_decimal());
    let receipt = service
        .pay_installment(PaymentRequest::full(first, PaymentMethod::DebitCard, "pay-2"))?
        .into_inner();
    println!("  settled #{}: status {:?}", receipt.installment.installment_number, receipt.installment.status);

    // 4. suspension
    println!("\n4. suspension");
    println!("-------------");
    service.suspend_plan(plan.id(), "ops", "customer dispute")?;
    let blocked = service.pay_installment(PaymentRequest::full(plan.installments[1].id, PaymentMethod::Cash, "pay-3"));
    println!("  payment while suspended: {}", blocked.map(|_| "accepted".to_string()).unwrap_or_else(|e| e.to_string()));
    service.reactivate_plan(plan.id(), "ops", "dispute resolved")?;
    println!("  reactivated");

    // 5. overdue sweep
    println!("\n5. overdue sweep");
    println!("----------------");
    let cutoff = NaiveDate::from_ymd_opt(2024, 3, 20).ok_or("bad date")?;
    println!("  marked overdue as of {}: {}", cutoff, service.run_overdue_sweep_at(cutoff)?);
    println!("  again: {}", service.run_overdue_sweep_at(cutoff)?);

    // 6. cancellation
    println!("\n6. cancellation");
    println!("---------------");
    let cancelled = service.cancel_plan(plan.id(), "user-42", "returned item")?.into_inner();
    println!("  status: {:?}", cancelled.plan.status);
    println!("  card balance: ${}", service.card(card.id)?.balance.as_decimal());

    println!("\naudit trail:");
    for record in service.plan_history(plan.id())? {
        println!(
            "  {} {:<15} ${:<8} balance {} -> {}",
            record.timestamp.format("%Y-%m-%d"),
            record.action,
            record.amount.as_decimal(),
            record.balance.before.as_decimal(),
            record.balance.after.as_decimal()
        );
    }

    Ok(())
}
