use crate::domain::money::{Amount, Currency};
use crate::domain::target::{PriorOperation, PriorStatus};
use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

/// Raw CSV row: `id, amount, refunded, currency, status, metadata`.
///
/// `refunded`, `status` and `metadata` may be left empty or omitted.
/// `metadata` is a `;`-separated list of `key=value` pairs.
#[derive(Debug, Deserialize)]
struct ChargeRow {
    id: String,
    amount: Decimal,
    #[serde(default)]
    refunded: Option<Decimal>,
    currency: String,
    #[serde(default)]
    status: Option<PriorStatus>,
    #[serde(default)]
    metadata: Option<String>,
}

impl TryFrom<ChargeRow> for PriorOperation {
    type Error = LedgerError;

    fn try_from(row: ChargeRow) -> Result<Self> {
        if row.id.is_empty() {
            return Err(LedgerError::ValidationError(
                "charge id must not be empty".to_string(),
            ));
        }
        let amount = Amount::new(row.amount)?;
        let settled_amount = Amount::new(row.refunded.unwrap_or(Decimal::ZERO))?;
        if settled_amount > amount {
            return Err(LedgerError::ValidationError(format!(
                "charge {}: refunded {} exceeds amount {}",
                row.id, settled_amount, amount
            )));
        }
        Ok(Self {
            id: row.id,
            amount,
            settled_amount,
            currency: Currency::new(&row.currency)?,
            status: row.status.unwrap_or(PriorStatus::Succeeded),
            metadata: parse_metadata(row.metadata.as_deref().unwrap_or_default())?,
        })
    }
}

fn parse_metadata(raw: &str) -> Result<BTreeMap<String, String>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.trim().to_string()))
            }
            _ => Err(LedgerError::ValidationError(format!(
                "metadata entry {pair:?} is not key=value"
            ))),
        })
        .collect()
}

/// Reads prior charges from a CSV source.
pub struct TargetReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> TargetReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily yields one snapshot per row.
    pub fn charges(self) -> impl Iterator<Item = Result<PriorOperation>> {
        self.reader
            .into_deserialize::<ChargeRow>()
            .map(|row| row.map_err(LedgerError::from).and_then(PriorOperation::try_from))
    }

    /// Reads every row, failing on the first bad one.
    pub fn read_all(self) -> Result<Vec<PriorOperation>> {
        self.charges().collect()
    }
}
