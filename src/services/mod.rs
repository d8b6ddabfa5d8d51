pub mod booking;
pub mod cleanup;
pub mod notifier;
pub mod payment;
pub mod pricing;
pub mod reconciliation;
pub mod scheduling;
pub mod webhook;
