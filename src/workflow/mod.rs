mod engine;
mod models;
mod routes;

pub use engine::{WorkflowEngine, WorkflowError};
pub use models::{
    Actor, CreateSubscriptionRequest, Decision, DecisionRequest, ListFilter, PaymentRequest,
    RenewSubscriptionRequest, Role, SubRole, Subscription, SubscriptionStatus, DEFAULT_ALERT_DAYS,
    MAX_ALERT_DAYS,
};
pub use routes::routes;
