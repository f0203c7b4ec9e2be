/// Webhook subscriptions
///
/// Resolves which subscribers hear about an event (customer defaults merged with
/// workflow overrides), caches customer lists, and delivers webhooks over HTTP.

pub mod cache;
pub mod dispatcher;
pub mod resolver;

pub use cache::SubscriptionCache;
pub use dispatcher::{HttpWebhookSender, WebhookPayload, WebhookSender};
pub use resolver::{
    get_webhooks, merge_subscriptions, Subscription, SubscriptionKind, SystemEvent, WebhookDelivery,
};
