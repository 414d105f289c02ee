//! Transaction commands.

use crate::money::{Currency, Money};

/// Command to create a new payment transaction.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    /// Client-supplied key; retries with the same key return the same transaction.
    pub idempotency_key: String,

    /// The amount to charge. Must be greater than zero.
    pub amount: Money,

    /// Currency of the amount.
    pub currency: Currency,

    /// Customer being charged.
    pub customer_id: String,

    /// Order the payment belongs to.
    pub order_id: String,

    /// Payment method reference (e.g. a tokenized card).
    pub payment_method: String,

    /// Optional free-text description.
    pub description: Option<String>,
}

impl CreateTransaction {
    /// Creates a new CreateTransaction command.
    pub fn new(
        idempotency_key: impl Into<String>,
        amount: Money,
        currency: Currency,
        customer_id: impl Into<String>,
        order_id: impl Into<String>,
        payment_method: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            amount,
            currency,
            customer_id: customer_id.into(),
            order_id: order_id.into(),
            payment_method: payment_method.into(),
            description: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}
