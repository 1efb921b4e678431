pub mod dispatcher;
pub mod pg_source;
pub mod subscription;

pub use dispatcher::{Dispatcher, EventTypeTable};
pub use pg_source::PgNotificationSource;
pub use subscription::{
    LinkEvent, LinkState, NotificationHandler, NotificationSource, SubscriptionConfig,
    SubscriptionManager, SubscriptionStats, UpstreamLink,
};
