// services/mpesa.rs
//
// Outbound mobile-money port plus the Daraja implementation. The charge leg
// is an STK push; the payout leg is a B2C BusinessPayment.
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::MpesaConfig;
use crate::errors::{AppError, Result};

/// Outcome of a charge request: the gateway's tracking references the
/// client polls against.
#[derive(Debug, Clone)]
pub struct ChargeReceipt {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: String,
}

/// Outcome of a transfer request on the payout rail.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub transaction_id: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Issues a charge against the payer. NOT idempotent: every call is a
    /// brand-new STK push.
    async fn request_charge(
        &self,
        amount: i64,
        payer_phone: &str,
        reference: &str,
        description: &str,
    ) -> Result<ChargeReceipt>;

    /// Transfers funds out to a mobile-money account.
    async fn transfer(&self, amount: i64, account: &str, narrative: &str)
        -> Result<TransferReceipt>;
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
    #[serde(rename = "CustomerMessage")]
    customer_message: String,
}

#[derive(Debug, Serialize)]
struct B2CRequest {
    #[serde(rename = "InitiatorName")]
    initiator_name: String,
    #[serde(rename = "SecurityCredential")]
    security_credential: String,
    #[serde(rename = "CommandID")]
    command_id: String,
    #[serde(rename = "Amount")]
    amount: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "Remarks")]
    remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    result_url: String,
    #[serde(rename = "Occasion")]
    occasion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct B2CResponse {
    #[serde(rename = "ConversationID")]
    conversation_id: String,
    #[serde(rename = "ResponseCode")]
    response_code: String,
    #[serde(rename = "ResponseDescription")]
    response_description: String,
}

#[derive(Debug, Clone)]
pub struct MpesaGateway {
    config: MpesaConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl MpesaGateway {
    pub fn new(config: MpesaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::configuration(format!("HTTP client: {}", e)))?;

        Ok(MpesaGateway {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    fn format_phone_number(phone: &str) -> String {
        let phone = phone.trim();
        if phone.starts_with("254") && phone.len() == 12 {
            return phone.to_string();
        }
        if phone.starts_with("07") && phone.len() == 10 {
            return format!("254{}", &phone[1..]);
        }
        if phone.starts_with('7') && phone.len() == 9 {
            return format!("254{}", phone);
        }
        phone.to_string()
    }

    fn generate_password(&self, timestamp: &str) -> String {
        let password_string = format!(
            "{}{}{}",
            self.config.short_code, self.config.passkey, timestamp
        );
        base64.encode(password_string)
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self
                .cached_token
                .read()
                .map_err(|_| AppError::service("token cache poisoned"))?;
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new M-Pesa access token");
        let auth_string = format!(
            "{}:{}",
            self.config.consumer_key, self.config.consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let (auth_url, _, _) = self.config.get_mpesa_urls();

        let response = self
            .client
            .get(&auth_url)
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::mpesa(format!("auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response.json().await?;

        {
            let expiry_time = Utc::now() + chrono::Duration::hours(1);
            let mut cached = self
                .cached_token
                .write()
                .map_err(|_| AppError::service("token cache poisoned"))?;
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }
}

#[async_trait]
impl PaymentGateway for MpesaGateway {
    async fn request_charge(
        &self,
        amount: i64,
        payer_phone: &str,
        reference: &str,
        description: &str,
    ) -> Result<ChargeReceipt> {
        if amount <= 0 {
            return Err(AppError::invalid_data("amount must be greater than 0"));
        }

        info!("C2B: STK push for {} - KSh {}", payer_phone, amount);

        let access_token = self.get_access_token().await?;
        let formatted_phone = Self::format_phone_number(payer_phone);
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let password = self.generate_password(&timestamp);

        let (_, stk_url, _) = self.config.get_mpesa_urls();

        let stk_request = StkPushRequest {
            business_short_code: self.config.short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: amount.to_string(),
            party_a: formatted_phone.clone(),
            party_b: self.config.short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.callback_url.clone(),
            account_reference: reference.to_string(),
            transaction_desc: description.to_string(),
        };

        let response = self
            .client
            .post(&stk_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&stk_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("C2B failed: {} - {}", status, body);
            return Err(AppError::mpesa(format!("STK push failed: {}", status)));
        }

        let stk_response: StkPushResponse = response.json().await?;
        info!("C2B initiated: {}", stk_response.merchant_request_id);

        Ok(ChargeReceipt {
            checkout_request_id: stk_response.checkout_request_id,
            merchant_request_id: stk_response.merchant_request_id,
            customer_message: stk_response.customer_message,
        })
    }

    async fn transfer(
        &self,
        amount: i64,
        account: &str,
        narrative: &str,
    ) -> Result<TransferReceipt> {
        if amount <= 0 {
            return Err(AppError::invalid_data("amount must be greater than 0"));
        }

        info!("B2C: Sending to {} - KSh {}", account, amount);

        let access_token = self.get_access_token().await?;
        let formatted_phone = Self::format_phone_number(account);

        let (_, _, b2c_url) = self.config.get_mpesa_urls();

        let b2c_request = B2CRequest {
            initiator_name: self.config.initiator_name.clone(),
            security_credential: self.config.security_credential.clone(),
            command_id: "BusinessPayment".to_string(),
            amount: amount.to_string(),
            party_a: self.config.short_code.clone(),
            party_b: formatted_phone,
            remarks: narrative.to_string(),
            queue_timeout_url: self.config.b2c_queue_timeout_url.clone(),
            result_url: self.config.b2c_result_url.clone(),
            occasion: None,
        };

        let response = self
            .client
            .post(&b2c_url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&b2c_request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("B2C failed: {} - {}", status, body);
            return Err(AppError::mpesa(format!("B2C failed: {}", status)));
        }

        let b2c_response: B2CResponse = response.json().await?;
        if b2c_response.response_code != "0" {
            return Err(AppError::mpesa(format!(
                "B2C rejected: {}",
                b2c_response.response_description
            )));
        }

        info!("B2C initiated: {}", b2c_response.conversation_id);
        Ok(TransferReceipt {
            transaction_id: b2c_response.conversation_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_kenyan_phone_formats() {
        assert_eq!(MpesaGateway::format_phone_number("254712345678"), "254712345678");
        assert_eq!(MpesaGateway::format_phone_number("0712345678"), "254712345678");
        assert_eq!(MpesaGateway::format_phone_number("712345678"), "254712345678");
        assert_eq!(MpesaGateway::format_phone_number(" 0712345678 "), "254712345678");
    }
}
