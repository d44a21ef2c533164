use std::{fmt::Display, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::Date;

use crate::{sanitize::sanitize_name, storage::StorageError};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Income,
    Expense,
}

impl Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Income => write!(f, "income"),
            EntryKind::Expense => write!(f, "expense"),
        }
    }
}

/// One income or expense line of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub title: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub notes: String,
    #[serde(with = "iso_date")]
    pub date: Date,
}

impl LedgerEntry {
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.title.trim().is_empty() {
            return Err(StorageError::Validation("entry title must not be blank".to_string()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(StorageError::Validation(format!(
                "entry amount must be positive, got {}",
                self.amount
            )));
        }
        Ok(())
    }

    /// Amount with the sign it contributes to the running balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            EntryKind::Income => self.amount,
            EntryKind::Expense => -self.amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    #[serde(with = "rust_decimal::serde::float")]
    pub income: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub expense: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    pub count: usize,
}

impl LedgerSummary {
    /// Totals the ledger. Fails instead of wrapping when the sums leave the
    /// range a `Decimal` can hold.
    pub fn from_entries(entries: &[LedgerEntry]) -> Result<Self, StorageError> {
        let mut income = Decimal::ZERO;
        let mut expense = Decimal::ZERO;
        for entry in entries {
            let total = match entry.kind {
                EntryKind::Income => &mut income,
                EntryKind::Expense => &mut expense,
            };
            *total = total.checked_add(entry.amount).ok_or_else(|| out_of_range(entry.kind))?;
        }
        let balance = income
            .checked_sub(expense)
            .ok_or_else(|| StorageError::Validation("ledger balance exceeds the supported amount range".to_string()))?;
        Ok(Self {
            income,
            expense,
            balance,
            count: entries.len(),
        })
    }
}

fn out_of_range(kind: EntryKind) -> StorageError {
    StorageError::Validation(format!("{} total exceeds the supported amount range", kind))
}

/// Where a named document lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    #[default]
    Active,
    Downloaded,
}

impl Area {
    pub const ALL: [Area; 2] = [Area::Active, Area::Downloaded];
}

impl Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Area::Active => write!(f, "active"),
            Area::Downloaded => write!(f, "downloaded"),
        }
    }
}

impl FromStr for Area {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Area::Active),
            "downloaded" => Ok(Area::Downloaded),
            other => Err(format!("unknown area: {}", other)),
        }
    }
}

/// A JSON object stored under a sanitized name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedDocument {
    pub name: String,
    pub content: Map<String, Value>,
}

impl NamedDocument {
    /// Builds a document from a raw title, sanitizing it and checking that
    /// the content is a JSON object.
    pub fn new(raw_name: &str, content: &Value) -> Result<Self, StorageError> {
        if raw_name.trim().is_empty() {
            return Err(StorageError::Validation("document name must not be blank".to_string()));
        }
        let name = sanitize_name(raw_name);
        if name.is_empty() {
            return Err(StorageError::Validation(format!(
                "document name {:?} has no usable characters",
                raw_name
            )));
        }
        let content = match content {
            Value::Object(map) => map.clone(),
            _ => {
                return Err(StorageError::Validation(
                    "document content must be a JSON object".to_string(),
                ))
            }
        };
        Ok(Self { name, content })
    }
}

/// Per-item outcome of a bulk move. Not transactional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveReport {
    pub moved: Vec<String>,
    pub errors: Vec<String>,
}

impl MoveReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}
