//! Token precision lookup.

use std::collections::HashMap;
use std::sync::Arc;

use agora_core::{Address, AgoraError, Fare, LedgerGateway, Result};
use tokio::sync::RwLock;

/// Maps token addresses to fares.
///
/// The configured base fare is always known; other tokens are resolved once
/// through the token contract's `decimals` method and cached.
pub struct FareBook {
    base: Fare,
    ledger: Arc<dyn LedgerGateway>,
    cache: RwLock<HashMap<Address, Fare>>,
}

impl FareBook {
    pub fn new(base: Fare, ledger: Arc<dyn LedgerGateway>) -> Self {
        Self {
            base,
            ledger,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// The fare job prices are denominated in.
    pub fn base(&self) -> &Fare {
        &self.base
    }

    /// Fare for `token`, reading its precision on first use.
    pub async fn fare(&self, token: &Address) -> Result<Fare> {
        if token == &self.base.token && self.base.decimals.is_some() {
            return Ok(self.base.clone());
        }
        if let Some(fare) = self.cache.read().await.get(token) {
            return Ok(fare.clone());
        }

        let raw = self.ledger.read_contract(token, "decimals", &[]).await?;
        let decimals = raw
            .as_u64()
            .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| AgoraError::InvalidFare(format!("{token} reported decimals {raw}")))?;

        tracing::debug!(%token, decimals, "token precision resolved");
        let fare = Fare::new(token.clone(), decimals);
        self.cache.write().await.insert(token.clone(), fare.clone());
        Ok(fare)
    }

    /// Fill in a fare's precision if it is missing.
    pub async fn resolve(&self, fare: Fare) -> Result<Fare> {
        match fare.decimals {
            Some(_) => Ok(fare),
            None => self.fare(&fare.token).await,
        }
    }
}
