// ABOUTME: Change-detection strategy selection for a source table
// ABOUTME: Prefers a rowversion column, otherwise falls back to full hash comparison

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::schema::ColumnDefinition;

/// How modified rows are identified.
///
/// All strategies currently run the same full diff; the strategy is recorded in
/// the ledger and decides whether a rowversion watermark is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeDetectionStrategy {
    Rowversion,
    Hash,
    /// Reserved. Shares the `Hash` code path.
    Full,
}

impl ChangeDetectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeDetectionStrategy::Rowversion => "ROWVERSION",
            ChangeDetectionStrategy::Hash => "HASH",
            ChangeDetectionStrategy::Full => "FULL",
        }
    }
}

impl fmt::Display for ChangeDetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeDetectionStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ROWVERSION" => Ok(ChangeDetectionStrategy::Rowversion),
            "HASH" => Ok(ChangeDetectionStrategy::Hash),
            "FULL" => Ok(ChangeDetectionStrategy::Full),
            other => bail!("Unknown change detection strategy: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeDetection {
    pub strategy: ChangeDetectionStrategy,
    pub rowversion_column: Option<String>,
}

/// Pick the strategy for a table from its source columns.
pub fn select_strategy(columns: &[ColumnDefinition]) -> ChangeDetection {
    match columns.iter().find(|c| c.is_rowversion()) {
        Some(column) => ChangeDetection {
            strategy: ChangeDetectionStrategy::Rowversion,
            rowversion_column: Some(column.name.clone()),
        },
        None => ChangeDetection {
            strategy: ChangeDetectionStrategy::Hash,
            rowversion_column: None,
        },
    }
}
