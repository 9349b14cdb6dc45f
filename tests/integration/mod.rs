//! Integration tests for panelgen

mod batch_paced;
mod batch_pooled;
mod config_integration;
mod pipeline;
mod placement_fallback;
mod reference_workflow;
