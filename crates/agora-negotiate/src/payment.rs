//! Payment reconciliation.
//!
//! Obligations are grouped by token into the smallest set of allowance
//! approvals: one per distinct token, equal to the exact sum of that token's
//! obligations in base units.

use agora_core::{Address, AgoraError, Fare, FareAmount, JobPhase, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use agora_state::Job;

/// An amount owed, either in human units or already in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amount {
    Human(Decimal),
    Base(u128),
}

/// Why an obligation exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationKind {
    /// The job's agreed price.
    JobPrice,
    /// An ad-hoc transfer requested by a payable memo.
    Transfer,
    /// Fee attached to a payable memo.
    Fee,
}

/// Something the payer must allow the job contract to pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obligation {
    pub fare: Fare,
    pub amount: Amount,
    pub kind: ObligationKind,
}

impl Obligation {
    pub fn job_price(fare: Fare, amount: Decimal) -> Self {
        Self {
            fare,
            amount: Amount::Human(amount),
            kind: ObligationKind::JobPrice,
        }
    }

    pub fn transfer(fare: Fare, base_units: u128) -> Self {
        Self {
            fare,
            amount: Amount::Base(base_units),
            kind: ObligationKind::Transfer,
        }
    }

    pub fn fee(fare: Fare, base_units: u128) -> Self {
        Self {
            fare,
            amount: Amount::Base(base_units),
            kind: ObligationKind::Fee,
        }
    }

    fn to_fare_amount(&self) -> Result<FareAmount> {
        match self.amount {
            Amount::Human(amount) => FareAmount::from_human(amount, self.fare.clone()),
            Amount::Base(_) if self.fare.decimals.is_none() => Err(AgoraError::InvalidFare(format!(
                "precision of {} is unknown",
                self.fare.token
            ))),
            Amount::Base(units) => Ok(FareAmount::new(units, self.fare.clone())),
        }
    }
}

/// One allowance approval covering every obligation in a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub amount: FareAmount,
    /// Kinds of the obligations merged into this approval, in input order.
    pub covers: Vec<ObligationKind>,
}

impl Approval {
    pub fn token(&self) -> &Address {
        &self.amount.fare.token
    }
}

/// Stateless calculator for allowance approvals.
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentReconciler;

impl PaymentReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Compute the approvals for a set of obligations.
    ///
    /// Every obligation is converted first; a negative amount or unknown
    /// precision fails with `InvalidFare` before any approval is produced.
    /// Approvals keep the order in which their tokens first appear.
    pub fn reconcile(&self, obligations: &[Obligation]) -> Result<Vec<Approval>> {
        let converted = obligations
            .iter()
            .map(|o| o.to_fare_amount().map(|amount| (amount, o.kind)))
            .collect::<Result<Vec<_>>>()?;

        let mut approvals: Vec<Approval> = Vec::new();
        for (amount, kind) in converted {
            match approvals.iter_mut().find(|a| a.token() == &amount.fare.token) {
                Some(approval) => {
                    let mut merged = approval.amount.add(&amount)?;
                    if merged.fare.decimals.is_none() {
                        merged.fare = amount.fare.clone();
                    }
                    approval.amount = merged;
                    approval.covers.push(kind);
                }
                None => approvals.push(Approval {
                    amount,
                    covers: vec![kind],
                }),
            }
        }
        Ok(approvals)
    }

    /// Obligations the client owes to move `job` out of negotiation.
    ///
    /// The job price in `price_fare`, plus every pending payable memo that
    /// targets the current phase or its successor, plus its fee in
    /// `price_fare` when non-zero. Memos whose signing window has closed
    /// are skipped.
    pub fn obligations_for(&self, job: &Job, price_fare: &Fare) -> Result<Vec<Obligation>> {
        self.obligations_at(job, price_fare, Utc::now())
    }

    /// [`Self::obligations_for`] evaluated at `now`.
    pub fn obligations_at(&self, job: &Job, price_fare: &Fare, now: DateTime<Utc>) -> Result<Vec<Obligation>> {
        if price_fare.token != job.price_token {
            return Err(AgoraError::InvalidFare(format!(
                "job {} is priced in {}, not {}",
                job.id, job.price_token, price_fare.token
            )));
        }

        let phase = job.phase();
        let targets: Vec<JobPhase> = std::iter::once(phase).chain(phase.successor()).collect();

        let mut obligations = vec![Obligation::job_price(price_fare.clone(), job.price)];
        for memo in job.memos().pending() {
            if !memo.memo_type.is_payable() || !targets.contains(&memo.next_phase) {
                continue;
            }
            if memo.is_lapsed(now) {
                tracing::debug!(job_id = job.id, memo_id = memo.id, "skipping lapsed payable memo");
                continue;
            }
            let Some(payable) = &memo.payable else {
                continue;
            };

            let fare = if payable.token == price_fare.token {
                price_fare.clone()
            } else {
                Fare::unresolved(payable.token.clone())
            };
            obligations.push(Obligation::transfer(fare, payable.amount));
            if payable.fee_amount > 0 {
                obligations.push(Obligation::fee(price_fare.clone(), payable.fee_amount));
            }
        }
        Ok(obligations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_core::{Memo, MemoType, PayableDetails};
    use agora_state::{JobSpec, JobStateMachine, Parties};
    use rust_decimal_macros::dec;

    fn token_a() -> Fare {
        Fare::new("0xaaaa", 6)
    }

    fn token_b() -> Fare {
        Fare::new("0xbbbb", 18)
    }

    #[test]
    fn test_same_token_obligations_merge() {
        let approvals = PaymentReconciler::new()
            .reconcile(&[
                Obligation::job_price(token_a(), dec!(5)),
                Obligation::job_price(token_a(), dec!(7)),
                Obligation::job_price(token_b(), dec!(3)),
            ])
            .unwrap();

        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[0].token(), &token_a().token);
        assert_eq!(approvals[0].amount.amount, 12_000_000);
        assert_eq!(approvals[1].amount.amount, 3_000_000_000_000_000_000);
        assert_eq!(approvals[0].covers.len(), 2);
    }

    #[test]
    fn test_invalid_obligation_blocks_all_approvals() {
        let reconciler = PaymentReconciler::new();
        let negative = reconciler.reconcile(&[
            Obligation::job_price(token_a(), dec!(5)),
            Obligation::job_price(token_b(), dec!(-1)),
        ]);
        assert!(matches!(negative, Err(AgoraError::InvalidFare(_))));

        let unknown = reconciler.reconcile(&[Obligation::job_price(Fare::unresolved("0xcccc"), dec!(1))]);
        assert!(matches!(unknown, Err(AgoraError::InvalidFare(_))));
    }

    #[test]
    fn test_base_units_still_need_precision() {
        let reconciler = PaymentReconciler::new();
        let unknown = reconciler.reconcile(&[
            Obligation::job_price(token_a(), dec!(1)),
            Obligation::transfer(Fare::unresolved("0xcccc"), 40),
        ]);
        assert!(matches!(unknown, Err(AgoraError::InvalidFare(_))));

        let approvals = reconciler
            .reconcile(&[
                Obligation::transfer(Fare::new("0xcccc", 0), 40),
                Obligation::fee(Fare::new("0xcccc", 0), 2),
            ])
            .unwrap();
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].amount.amount, 42);
    }

    fn negotiating_job() -> Job {
        let machine = JobStateMachine::new();
        let mut job = machine
            .create(JobSpec::new(4, Parties::new("0xc", "0xp"), dec!(2), "0xaaaa"))
            .unwrap();
        job.append_memo(Memo::new(1, 4, MemoType::Message, JobPhase::Negotiation, "0xc", ""))
            .unwrap();
        job.resolve_memo(1, true, None).unwrap();
        machine.advance(&mut job);
        job
    }

    fn payable(amount: u128) -> PayableDetails {
        PayableDetails {
            amount,
            fee_amount: 10,
            token: agora_core::Address::new("0xbbbb"),
            recipient: agora_core::Address::new("0xp"),
        }
    }

    #[test]
    fn test_obligations_for_job() {
        let mut job = negotiating_job();
        job.append_memo(
            Memo::new(2, 4, MemoType::PayableRequest, JobPhase::Transaction, "0xp", "")
                .with_payable(payable(500)),
        )
        .unwrap();

        let reconciler = PaymentReconciler::new();
        let mut obligations = reconciler.obligations_for(&job, &token_a()).unwrap();
        let kinds: Vec<_> = obligations.iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![ObligationKind::JobPrice, ObligationKind::Transfer, ObligationKind::Fee]
        );
        assert_eq!(obligations[1].fare.decimals, None);
        assert!(reconciler.reconcile(&obligations).is_err());

        obligations[1].fare = token_b();

        let approvals = reconciler.reconcile(&obligations).unwrap();
        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[0].amount.amount, 2_000_010);
        assert_eq!(approvals[1].amount.amount, 500);

        assert!(reconciler.obligations_for(&job, &token_b()).is_err());
    }

    #[test]
    fn test_lapsed_payable_memo_is_skipped() {
        let mut job = negotiating_job();
        let now = Utc::now();
        job.append_memo(
            Memo::new(2, 4, MemoType::PayableRequest, JobPhase::Transaction, "0xp", "")
                .with_payable(payable(500))
                .with_expiry(now - chrono::Duration::minutes(1)),
        )
        .unwrap();
        job.append_memo(
            Memo::new(3, 4, MemoType::PayableRequest, JobPhase::Transaction, "0xp", "")
                .with_payable(payable(700))
                .with_expiry(now + chrono::Duration::minutes(5)),
        )
        .unwrap();

        let obligations = PaymentReconciler::new().obligations_at(&job, &token_a(), now).unwrap();
        let transfers: Vec<_> = obligations
            .iter()
            .filter(|o| o.kind == ObligationKind::Transfer)
            .map(|o| o.amount)
            .collect();
        assert_eq!(transfers, vec![Amount::Base(700)]);
    }
}
