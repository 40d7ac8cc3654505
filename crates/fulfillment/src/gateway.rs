//! The external payment-gateway capability.
//!
//! Charges and refunds are genuinely fallible in two distinct ways: the
//! gateway can *decline* (a business outcome, modeled in the outcome enums)
//! or the call itself can *fail* (a transport error). Callers must never
//! assume success.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CustomerId, Money};
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

/// Errors reaching the gateway at all. Declines are not errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway could not be reached.
    #[error("Payment gateway unreachable: {0}")]
    Unreachable(String),
}

/// Result of a charge attempt that reached the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { error_code: String },
}

/// Result of a refund attempt that reached the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    Refunded { refund_transaction_id: String },
    Declined { error_code: String },
}

/// Trait for payment gateway integrations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charges a customer.
    async fn charge(
        &self,
        amount: Money,
        currency: &str,
        customer_id: &CustomerId,
    ) -> Result<ChargeOutcome, GatewayError>;

    /// Refunds a previously approved charge.
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
        currency: &str,
    ) -> Result<RefundOutcome, GatewayError>;
}

#[derive(Debug, Default)]
struct MockGatewayState {
    decline_charges: bool,
    fail_charges: bool,
    decline_refunds: bool,
    fail_refunds: bool,
}

/// Mock gateway with probabilistic declines.
///
/// Defaults mirror a flaky processor: 90% charge approval, 95% refund
/// approval. Tests that need determinism use [`MockPaymentGateway::approving`]
/// and the `set_*` overrides instead of relying on the dice.
#[derive(Debug, Clone)]
pub struct MockPaymentGateway {
    charge_approval_rate: f64,
    refund_approval_rate: f64,
    state: Arc<RwLock<MockGatewayState>>,
}

impl MockPaymentGateway {
    /// Creates a gateway with the default approval rates.
    pub fn new() -> Self {
        Self::with_rates(0.9, 0.95)
    }

    /// Creates a gateway that always approves (until overridden).
    pub fn approving() -> Self {
        Self::with_rates(1.0, 1.0)
    }

    /// Creates a gateway with explicit approval rates in `[0, 1]`.
    pub fn with_rates(charge_approval_rate: f64, refund_approval_rate: f64) -> Self {
        Self {
            charge_approval_rate,
            refund_approval_rate,
            state: Arc::new(RwLock::new(MockGatewayState::default())),
        }
    }

    /// Forces every charge to be declined.
    pub fn set_decline_charges(&self, decline: bool) {
        self.state.write().unwrap().decline_charges = decline;
    }

    /// Forces every charge call to fail at the transport level.
    pub fn set_fail_charges(&self, fail: bool) {
        self.state.write().unwrap().fail_charges = fail;
    }

    /// Forces every refund to be declined.
    pub fn set_decline_refunds(&self, decline: bool) {
        self.state.write().unwrap().decline_refunds = decline;
    }

    /// Forces every refund call to fail at the transport level.
    pub fn set_fail_refunds(&self, fail: bool) {
        self.state.write().unwrap().fail_refunds = fail;
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(
        &self,
        amount: Money,
        currency: &str,
        customer_id: &CustomerId,
    ) -> Result<ChargeOutcome, GatewayError> {
        let (decline, fail) = {
            let state = self.state.read().unwrap();
            (state.decline_charges, state.fail_charges)
        };

        if fail {
            return Err(GatewayError::Unreachable("simulated outage".to_string()));
        }

        tracing::debug!(%amount, currency, customer = %customer_id, "processing charge");

        if decline || rand::rng().random::<f64>() >= self.charge_approval_rate {
            return Ok(ChargeOutcome::Declined {
                error_code: "INSUFFICIENT_FUNDS".to_string(),
            });
        }

        Ok(ChargeOutcome::Approved {
            transaction_id: format!("txn_{}", Uuid::new_v4()),
        })
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Money,
        currency: &str,
    ) -> Result<RefundOutcome, GatewayError> {
        let (decline, fail) = {
            let state = self.state.read().unwrap();
            (state.decline_refunds, state.fail_refunds)
        };

        if fail {
            return Err(GatewayError::Unreachable("simulated outage".to_string()));
        }

        tracing::debug!(%amount, currency, transaction_id, "processing refund");

        if decline || rand::rng().random::<f64>() >= self.refund_approval_rate {
            return Ok(RefundOutcome::Declined {
                error_code: "REFUND_FAILED".to_string(),
            });
        }

        Ok(RefundOutcome::Refunded {
            refund_transaction_id: format!("rfnd_{}", Uuid::new_v4()),
        })
    }
}
