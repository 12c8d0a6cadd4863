use serde::{Deserialize, Serialize};

use ledgerkit_core::{AccountId, DomainError, Money, TenantId};

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountKind {
    /// Whether a debit increases the account's natural balance.
    pub fn is_debit_normal(self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
            AccountKind::Income => "income",
            AccountKind::Expense => "expense",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        match s {
            "asset" => Ok(AccountKind::Asset),
            "liability" => Ok(AccountKind::Liability),
            "equity" => Ok(AccountKind::Equity),
            "income" => Ok(AccountKind::Income),
            "expense" => Ok(AccountKind::Expense),
            other => Err(DomainError::validation(format!("unknown account kind '{other}'"))),
        }
    }
}

/// A ledger account scoped to one tenant.
///
/// `balance` is a derived cache: Σ(debit − credit) over every persisted line
/// against this account. It is mutated only by the posting engine inside a
/// transaction, never by request handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tenant_id: TenantId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub balance: Money,
    pub active: bool,
}

impl Account {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        name: impl Into<String>,
        kind: AccountKind,
    ) -> Result<Self, DomainError> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(DomainError::validation("account code must not be empty"));
        }
        Ok(Self {
            id: AccountId::new(),
            tenant_id,
            code,
            name: name.into(),
            kind,
            balance: Money::ZERO,
            active: true,
        })
    }
}
