pub mod checkout;
pub mod entitlements;
pub mod stripe;
pub mod webhook_processor;
