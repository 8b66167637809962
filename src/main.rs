use std::{env, fs::File, path::Path, sync::Arc};

use futures::StreamExt;
use tracing_subscriber::EnvFilter;

use giftcard_ledger::balance::InMemoryBalanceStore;
use giftcard_ledger::config::Config;
use giftcard_ledger::domain::Error;
use giftcard_ledger::journal::InMemoryJournal;
use giftcard_ledger::script::{ScriptOp, ScriptReader, ScriptSource};
use giftcard_ledger::service::{
    ChargeService, ChargeStateDto, DecideRequest, LogNotifier, OpenChargeRequest, ScanRequest,
};
use giftcard_ledger::sweep::RecoverySweep;

type Service = ChargeService<InMemoryBalanceStore, InMemoryJournal, LogNotifier>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args();
    let file_path = args
        .nth(1)
        .ok_or("usage: giftcard-ledger <session-script.csv>")?;
    let file = File::open(Path::new(&file_path))?;

    let store = Arc::new(InMemoryBalanceStore::new());
    let journal = Arc::new(InMemoryJournal::new());
    let config = Config::default();

    let sweep = RecoverySweep::new(store.clone(), journal.clone(), config.pending_ttl());
    tokio::spawn(sweep.run_forever(config.sweep_interval()));

    let service = ChargeService::new(store.clone(), journal.clone(), LogNotifier, config);

    let mut reader = ScriptReader::new(file);
    let mut ops = reader.stream();
    while let Some(op) = ops.next().await {
        match op {
            Ok(op) => {
                if let Err(e) = apply(&store, &service, op).await {
                    eprintln!("charge failed: {}", e);
                }
            }
            Err(e) => eprintln!("skipping row: {}", e),
        }
    }

    print_summary(&store, &service);
    Ok(())
}

async fn apply(store: &InMemoryBalanceStore, service: &Service, op: ScriptOp) -> Result<(), Error> {
    match op {
        ScriptOp::OpenAccount(account) => {
            let account_id = account.account_id.clone();
            if !store.open_account(account) {
                eprintln!("account {} already open", account_id);
            }
            Ok(())
        }
        ScriptOp::RegisterMerchant(merchant) => {
            let merchant_id = merchant.merchant_id.clone();
            if !store.register_merchant(merchant) {
                eprintln!("merchant {} already registered", merchant_id);
            }
            Ok(())
        }
        ScriptOp::Charge {
            merchant_id,
            amount,
            payload,
            confirm,
        } => {
            let opened = service
                .open_charge(OpenChargeRequest {
                    merchant_id,
                    amount,
                })
                .await?;
            let scanned = service
                .scan(ScanRequest {
                    charge_id: opened.charge_id,
                    scanned_payload: payload,
                })
                .await?;
            let transaction_id = match scanned.state {
                ChargeStateDto::Confirming { transaction_id, .. } => transaction_id,
                other => {
                    return Err(Error::Script(format!(
                        "charge did not reach confirmation: {other:?}"
                    )));
                }
            };

            let decision = DecideRequest {
                transaction_id,
                confirm,
            };
            let mut result = service.decide(decision.clone()).await;
            if matches!(&result, Err(err) if err.is_retryable()) {
                result = service.decide(decision).await;
            }
            match result {
                Ok(response) => {
                    describe(&response.state);
                    Ok(())
                }
                Err(err) => {
                    // Leave nothing pending behind a failed confirmation.
                    let _ = service
                        .decide(DecideRequest {
                            transaction_id,
                            confirm: false,
                        })
                        .await;
                    Err(err)
                }
            }
        }
    }
}

fn describe(state: &ChargeStateDto) {
    match state {
        ChargeStateDto::Committed {
            account_id,
            amount,
            new_balance,
            merchant_accrued,
            ..
        } => println!(
            "committed {} from {}: balance {}, accrued {}",
            amount, account_id, new_balance, merchant_accrued
        ),
        ChargeStateDto::Aborted { reason } => println!("aborted: {}", reason),
        other => println!("charge left in {:?}", other),
    }
}

fn print_summary(store: &InMemoryBalanceStore, service: &Service) {
    println!("account,balance");
    for account in store.accounts_snapshot() {
        println!("{},{}", account.account_id, account.balance);
    }
    println!("merchant,accrued_total");
    for merchant in store.merchants_snapshot() {
        println!(
            "{},{}",
            merchant.merchant_id,
            service.accrual().accrued_total(&merchant.merchant_id)
        );
    }
}
