//! CSV session scripts for the replay binary: register accounts and
//! merchants, then drive charges through the service the way a clerk
//! would.

use std::io::Read;
use std::pin::Pin;

use futures::stream::{self, Stream};
use serde::Deserialize;

use crate::domain::{Account, AccountId, Error, MerchantAccount, MerchantId, Money};

/// One replayable operation.
#[derive(Debug, Clone)]
pub enum ScriptOp {
    OpenAccount(Account),
    RegisterMerchant(MerchantAccount),
    Charge {
        merchant_id: MerchantId,
        amount: Money,
        payload: String,
        confirm: bool,
    },
}

/// A source of script operations. The replay loop only sees this seam,
/// not the CSV underneath.
pub trait ScriptSource {
    type Ops: Stream<Item = Result<ScriptOp, Error>> + Send + Unpin + 'static;
    fn stream(&mut self) -> Self::Ops;
}

/// Internal shape used only for CSV deserialization.
#[derive(Debug, Deserialize)]
struct ScriptRow {
    op: String,
    id: String,
    name: Option<String>,
    amount: Option<Money>,
    payload: Option<String>,
    outcome: Option<String>,
}

impl TryFrom<ScriptRow> for ScriptOp {
    type Error = Error;

    fn try_from(row: ScriptRow) -> Result<Self, Self::Error> {
        let bad = |msg: String| Error::Script(msg);
        match row.op.trim().to_ascii_lowercase().as_str() {
            "account" => {
                let account_id = AccountId::parse(row.id.trim())
                    .ok_or_else(|| bad(format!("invalid account id: {}", row.id)))?;
                let opening = row
                    .amount
                    .ok_or_else(|| bad("account row needs an opening balance".into()))?;
                Ok(ScriptOp::OpenAccount(Account::new(
                    account_id,
                    row.name.unwrap_or_default(),
                    opening,
                )))
            }
            "merchant" => {
                let merchant_id = MerchantId::parse(row.id.trim())
                    .ok_or_else(|| bad(format!("invalid merchant id: {}", row.id)))?;
                Ok(ScriptOp::RegisterMerchant(MerchantAccount::new(
                    merchant_id,
                    row.name.unwrap_or_default(),
                )))
            }
            "charge" => {
                let merchant_id = MerchantId::parse(row.id.trim())
                    .ok_or_else(|| bad(format!("invalid merchant id: {}", row.id)))?;
                let amount = row
                    .amount
                    .ok_or_else(|| bad("charge row needs an amount".into()))?;
                let payload = row
                    .payload
                    .ok_or_else(|| bad("charge row needs a scanned payload".into()))?;
                let confirm = match row.outcome.as_deref().map(str::trim) {
                    Some("confirm") | None => true,
                    Some("abort") => false,
                    Some(other) => return Err(bad(format!("invalid outcome: {}", other))),
                };
                Ok(ScriptOp::Charge {
                    merchant_id,
                    amount,
                    payload,
                    confirm,
                })
            }
            other => Err(bad(format!("invalid op: {}", other))),
        }
    }
}

pub struct ScriptReader<R: Read> {
    reader: Option<csv::Reader<R>>,
}

impl<R: Read> ScriptReader<R> {
    pub fn new(reader: R) -> Self {
        let rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        Self { reader: Some(rdr) }
    }
}

impl<R: Read + Send + 'static> ScriptSource for ScriptReader<R> {
    type Ops = Pin<Box<dyn Stream<Item = Result<ScriptOp, Error>> + Send>>;

    fn stream(&mut self) -> Self::Ops {
        // Take ownership of the reader so the iterator owns all data and
        // is 'static.
        let reader = match self.reader.take() {
            Some(r) => r,
            None => {
                // Already consumed; an empty stream.
                return Box::pin(stream::iter(Vec::<Result<ScriptOp, Error>>::new()));
            }
        };

        let iter = reader
            .into_deserialize::<ScriptRow>()
            .map(|row_res| match row_res {
                Ok(row) => ScriptOp::try_from(row),
                Err(e) => Err(Error::Script(format!("CSV deserialization error: {}", e))),
            });

        Box::pin(stream::iter(iter))
    }
}
