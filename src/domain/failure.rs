//! Classification of rejection codes returned by the remote ledger.
//!
//! Every code string maps to exactly one [`FailureCode`]; codes this crate has
//! never seen land in [`FailureCode::Unknown`] instead of being guessed at.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a rejection should be treated by the retry machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Clears on its own; safe to retry with the same key.
    Temporary,
    /// Definitive business rejection.
    Permanent,
    /// The payer must act (authenticate, confirm) before anything can succeed.
    ActionRequired,
    /// Unmapped code.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum FailureCode {
    // Issuer declines
    InsufficientFunds,
    DoNotHonor,
    CardDeclined,
    LostCard,
    StolenCard,
    ExpiredCard,
    IncorrectCvc,
    CardVelocityExceeded,
    // Risk blocks
    Fraudulent,
    MerchantBlacklist,
    // Temporary
    TryAgain,
    ProcessingError,
    RateLimited,
    // Payer action
    ActionRequired,
    AuthenticationRequired,
    // Reversal rejections
    ChargeAlreadyRefunded,
    AmountTooLarge,
    ChargeDisputed,
    InvalidRequest,
    Unknown(String),
}

impl FailureCode {
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "insufficient_funds" => Self::InsufficientFunds,
            "do_not_honor" => Self::DoNotHonor,
            "card_declined" | "generic_decline" => Self::CardDeclined,
            "lost_card" => Self::LostCard,
            "stolen_card" => Self::StolenCard,
            "expired_card" => Self::ExpiredCard,
            "incorrect_cvc" => Self::IncorrectCvc,
            "card_velocity_exceeded" => Self::CardVelocityExceeded,
            "fraudulent" => Self::Fraudulent,
            "merchant_blacklist" => Self::MerchantBlacklist,
            "try_again" | "try_again_later" => Self::TryAgain,
            "processing_error" => Self::ProcessingError,
            "rate_limited" | "rate_limit" => Self::RateLimited,
            "action_required" => Self::ActionRequired,
            "authentication_required" => Self::AuthenticationRequired,
            "charge_already_refunded" => Self::ChargeAlreadyRefunded,
            "amount_too_large" => Self::AmountTooLarge,
            "charge_disputed" => Self::ChargeDisputed,
            "invalid_request" | "parameter_invalid" | "parameter_missing" => Self::InvalidRequest,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::DoNotHonor => "do_not_honor",
            Self::CardDeclined => "card_declined",
            Self::LostCard => "lost_card",
            Self::StolenCard => "stolen_card",
            Self::ExpiredCard => "expired_card",
            Self::IncorrectCvc => "incorrect_cvc",
            Self::CardVelocityExceeded => "card_velocity_exceeded",
            Self::Fraudulent => "fraudulent",
            Self::MerchantBlacklist => "merchant_blacklist",
            Self::TryAgain => "try_again",
            Self::ProcessingError => "processing_error",
            Self::RateLimited => "rate_limited",
            Self::ActionRequired => "action_required",
            Self::AuthenticationRequired => "authentication_required",
            Self::ChargeAlreadyRefunded => "charge_already_refunded",
            Self::AmountTooLarge => "amount_too_large",
            Self::ChargeDisputed => "charge_disputed",
            Self::InvalidRequest => "invalid_request",
            Self::Unknown(code) => code,
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::TryAgain | Self::ProcessingError | Self::RateLimited => FailureClass::Temporary,
            Self::ActionRequired | Self::AuthenticationRequired => FailureClass::ActionRequired,
            Self::InsufficientFunds
            | Self::DoNotHonor
            | Self::CardDeclined
            | Self::LostCard
            | Self::StolenCard
            | Self::ExpiredCard
            | Self::IncorrectCvc
            | Self::CardVelocityExceeded
            | Self::Fraudulent
            | Self::MerchantBlacklist
            | Self::ChargeAlreadyRefunded
            | Self::AmountTooLarge
            | Self::ChargeDisputed
            | Self::InvalidRequest => FailureClass::Permanent,
            Self::Unknown(_) => FailureClass::Unknown,
        }
    }

    /// Whether the rejection was issued by the card issuer rather than by the
    /// ledger's own risk or validation layer.
    pub fn is_issuer_decline(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds
                | Self::DoNotHonor
                | Self::CardDeclined
                | Self::LostCard
                | Self::StolenCard
                | Self::ExpiredCard
                | Self::IncorrectCvc
                | Self::CardVelocityExceeded
        )
    }

    /// Operator-facing guidance for the code.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "customer needs to add funds or use another card",
            Self::DoNotHonor => "issuer blocked the charge; customer should call the issuer",
            Self::CardDeclined => "issuer declined without a reason; ask for another card",
            Self::LostCard | Self::StolenCard => "card reported lost or stolen; do not retry",
            Self::ExpiredCard => "customer must update card details",
            Self::IncorrectCvc => "ask the customer to verify the card",
            Self::CardVelocityExceeded => "too many recent charges on this card",
            Self::Fraudulent | Self::MerchantBlacklist => "blocked by risk rules; review before retrying",
            Self::TryAgain | Self::ProcessingError | Self::RateLimited => "safe to retry with the same key",
            Self::ActionRequired | Self::AuthenticationRequired => {
                "customer must complete authentication"
            }
            Self::ChargeAlreadyRefunded => "nothing left to refund",
            Self::AmountTooLarge => "amount exceeds what remains on the charge",
            Self::ChargeDisputed => "charge is under dispute; resolve the dispute first",
            Self::InvalidRequest => "request rejected as invalid; fix the parameters",
            Self::Unknown(_) => "unmapped code; investigate manually",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for FailureCode {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<FailureCode> for String {
    fn from(code: FailureCode) -> Self {
        code.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_known_codes() {
        for code in ["insufficient_funds", "do_not_honor", "rate_limited", "charge_disputed"] {
            assert_eq!(FailureCode::parse(code).as_str(), code);
        }
    }

    #[test]
    fn test_unmapped_code_is_unknown() {
        let code = FailureCode::parse("brand_new_decline");
        assert_eq!(code, FailureCode::Unknown("brand_new_decline".to_string()));
        assert_eq!(code.class(), FailureClass::Unknown);
        assert_eq!(code.to_string(), "brand_new_decline");
    }

    #[test]
    fn test_classes() {
        assert_eq!(FailureCode::TryAgain.class(), FailureClass::Temporary);
        assert_eq!(FailureCode::InsufficientFunds.class(), FailureClass::Permanent);
        assert_eq!(
            FailureCode::AuthenticationRequired.class(),
            FailureClass::ActionRequired
        );
    }

    #[test]
    fn test_guidance_follows_retry_safety() {
        assert_eq!(
            FailureCode::RateLimited.guidance(),
            "safe to retry with the same key"
        );
        assert_eq!(
            FailureCode::StolenCard.guidance(),
            FailureCode::LostCard.guidance()
        );
        assert_eq!(
            FailureCode::parse("brand_new_decline").guidance(),
            "unmapped code; investigate manually"
        );
    }

    #[test]
    fn test_issuer_declines() {
        assert!(FailureCode::ExpiredCard.is_issuer_decline());
        assert!(!FailureCode::Fraudulent.is_issuer_decline());
        assert!(!FailureCode::RateLimited.is_issuer_decline());
    }
}
