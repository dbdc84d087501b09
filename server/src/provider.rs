//! Payment provider adapters wired by the server.
//!
//! [`HttpPaymentProvider`] posts each intent as JSON to a configured
//! endpoint. [`LoggingPaymentProvider`] accepts every submission and only
//! logs it, for local runs where the callback is driven by hand.

use boxoffice_core::{
    BoxFuture, Customer, PaymentId, PaymentIntent, PaymentMethod, PaymentProvider, ProviderError,
    ProviderReference, ProviderSubmission,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Body posted to the provider.
#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    reference: &'a ProviderReference,
    payment_id: PaymentId,
    amount_cents: u64,
    payment_method: &'a PaymentMethod,
    customer: &'a Customer,
}

#[derive(Debug, Default, Deserialize)]
struct ChargeAccepted {
    #[serde(default)]
    transaction_id: Option<String>,
}

/// Provider reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPaymentProvider {
    /// Create a provider posting to `endpoint`, giving up on each request
    /// after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn charge(&self, intent: &PaymentIntent) -> Result<ProviderSubmission, ProviderError> {
        let body = ChargeRequest {
            reference: &intent.provider_reference,
            payment_id: intent.payment_id,
            amount_cents: intent.amount.cents(),
            payment_method: &intent.payment_method,
            customer: &intent.customer,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Idempotency-Key", intent.provider_reference.as_str())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_client_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected(format!("{status}: {detail}")));
        }
        if !status.is_success() {
            return Err(ProviderError::Unavailable(format!("provider answered {status}")));
        }

        let accepted = response
            .json::<ChargeAccepted>()
            .await
            .unwrap_or_default();
        Ok(ProviderSubmission {
            provider_transaction: accepted
                .transaction_id
                .unwrap_or_else(|| intent.provider_reference.as_str().to_string()),
        })
    }
}

fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

impl PaymentProvider for HttpPaymentProvider {
    fn submit<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<ProviderSubmission, ProviderError>> {
        Box::pin(async move {
            let result = self.charge(intent).await;
            match &result {
                Ok(submission) => tracing::debug!(
                    payment_id = %intent.payment_id,
                    transaction = %submission.provider_transaction,
                    "Provider accepted submission"
                ),
                Err(e) => tracing::warn!(
                    payment_id = %intent.payment_id,
                    reference = %intent.provider_reference,
                    error = %e,
                    "Provider submission failed"
                ),
            }
            result
        })
    }
}

/// Provider that accepts everything and logs it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPaymentProvider;

impl PaymentProvider for LoggingPaymentProvider {
    fn submit<'a>(
        &'a self,
        intent: &'a PaymentIntent,
    ) -> BoxFuture<'a, Result<ProviderSubmission, ProviderError>> {
        Box::pin(async move {
            tracing::info!(
                payment_id = %intent.payment_id,
                reference = %intent.provider_reference,
                amount_cents = intent.amount.cents(),
                method = intent.payment_method.kind(),
                "Payment submitted (no provider configured); POST /payments/callback to settle"
            );
            Ok(ProviderSubmission {
                provider_transaction: format!("logged_{}", intent.provider_reference),
            })
        })
    }
}
