//! Orders, their line snapshots, payment records and the status state machine.

mod model;
mod payment;
mod status;

pub use model::{Order, OrderLine};
pub use payment::{PAYMENT_METHOD_MOCK, Payment, PaymentStatus};
pub use status::OrderStatus;
