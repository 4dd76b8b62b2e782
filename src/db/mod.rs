pub mod billing_event_repository;
pub mod mock_db;
pub mod postgres_billing_event_repository;
pub mod postgres_tenant_repository;
pub mod tenant_repository;
