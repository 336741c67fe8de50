pub mod ingress;
pub mod notify;
pub mod order_flow;
pub mod sweeper;
