use std::{env, net::SocketAddr};

use thiserror::Error;

use crate::models::plan::Plan;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3001";
pub const DEFAULT_JWT_AUDIENCE: &str = "authenticated";
pub const DEFAULT_WEBHOOK_TOLERANCE_SECONDS: i64 = 300;
pub const DEFAULT_BILLING_RATE_LIMIT: u64 = 10;
pub const DEFAULT_BILLING_RATE_WINDOW_SECONDS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct StripeSettings {
    pub secret_key: String,
    pub webhook_secret: String,
    pub webhook_tolerance_seconds: i64,
}

/// Configured Stripe price ids for each paid plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriceCatalog {
    pub basic: String,
    pub pro: String,
}

impl PriceCatalog {
    pub fn plan_for_price(&self, price_id: &str) -> Option<Plan> {
        if price_id == self.basic {
            Some(Plan::Basic)
        } else if price_id == self.pro {
            Some(Plan::Pro)
        } else {
            None
        }
    }

    pub fn contains(&self, price_id: &str) -> bool {
        self.plan_for_price(price_id).is_some()
    }

    pub fn price_for_plan(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Basic => Some(&self.basic),
            Plan::Pro => Some(&self.pro),
            Plan::None => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub billing_limit: u64,
    pub billing_window_seconds: u64,
    pub global_per_millisecond: u64,
    pub global_burst: u32,
}

pub struct Config {
    pub database_url: String,
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub stripe: StripeSettings,
    pub prices: PriceCatalog,
    pub jwt_audience: String,
    pub jwt_issuer: Option<String>,
    pub rate_limits: RateLimitSettings,
    pub sentry_dsn: Option<String>,
    pub environment: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file

        let bind_addr = optional("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?;

        Ok(Config {
            database_url: required("DATABASE_URL")?,
            frontend_origin: required("FRONTEND_ORIGIN")?,
            bind_addr,
            stripe: StripeSettings {
                secret_key: required("STRIPE_SECRET_KEY")?,
                webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
                webhook_tolerance_seconds: parsed(
                    "STRIPE_WEBHOOK_TOLERANCE_SECONDS",
                    DEFAULT_WEBHOOK_TOLERANCE_SECONDS,
                )?,
            },
            prices: PriceCatalog {
                basic: required("STRIPE_BASIC_PRICE_ID")?,
                pro: required("STRIPE_PRO_PRICE_ID")?,
            },
            jwt_audience: optional("JWT_AUDIENCE")
                .unwrap_or_else(|| DEFAULT_JWT_AUDIENCE.to_string()),
            jwt_issuer: optional("JWT_ISSUER"),
            rate_limits: RateLimitSettings {
                billing_limit: parsed("BILLING_RATE_LIMIT", DEFAULT_BILLING_RATE_LIMIT)?,
                billing_window_seconds: parsed(
                    "BILLING_RATE_WINDOW_SECONDS",
                    DEFAULT_BILLING_RATE_WINDOW_SECONDS,
                )?,
                // Default: 200ms/token (~5 req/sec)
                global_per_millisecond: parsed("RATE_LIMITER_MILLISECONDS", 200)?,
                global_burst: parsed("RATE_LIMITER_BURST", 20)?,
            },
            sentry_dsn: optional("SENTRY_DSN"),
            environment: optional("APP_ENV").unwrap_or_else(|| "development".to_string()),
        })
    }

    pub fn checkout_success_url(&self) -> String {
        format!(
            "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
            self.frontend_origin.trim_end_matches('/')
        )
    }

    pub fn checkout_cancel_url(&self) -> String {
        format!("{}/billing/cancel", self.frontend_origin.trim_end_matches('/'))
    }

    pub fn portal_return_url(&self) -> String {
        format!("{}/settings/billing", self.frontend_origin.trim_end_matches('/'))
    }
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
