/// Enrichment plugins
///
/// This module provides the external-enrichment layer:
/// - The four-stage invocation protocol and its result type
/// - An HTTP implementation over reqwest
/// - Status classification of vendor responses
/// - JSONPath request transformers
/// - Outcome event kinds and their handler registry

pub mod api_plugin;
pub mod events;
pub mod protocol;
pub mod status;
pub mod transform;

pub use api_plugin::ApiPlugin;
pub use events::{FollowUpEvent, PluginEventKind, PluginEventRegistry};
pub use protocol::{EnrichmentPlugin, PluginConfig, PluginInvocationResult};
pub use status::{classify, ProcessStatus};
