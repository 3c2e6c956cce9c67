//! phishguard: email phishing risk scoring.
//!
//! Messages come from a [`mailbox::Mailbox`], are scanned and redacted,
//! optionally classified by an external LLM service, and leave as one
//! [`pipeline::EmailEvent`] each with an aggregated risk level.

pub mod analysis;
pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
