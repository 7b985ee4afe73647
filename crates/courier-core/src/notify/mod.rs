pub mod dispatcher;
pub mod listener;
pub mod notifier;

pub use dispatcher::{NotificationDispatcher, NotificationEndpoint};
pub use listener::{NotificationListener, get_notification_listener};
pub use notifier::{
    LogDriver, MessagingDriver, NoOpDriver, Notifier, NotifierOptions, NotifyDriver,
    NotifyDriverFactory, NotifyDriverRegistry,
};
